use crate::errors::{DyError, Result};
use crate::retry::RetryPolicy;
use crate::worker::EnvSource;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// File name looked up in the project root
pub const CONFIG_FILE: &str = ".dockyard.yml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub reuse: ReuseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DockerConfig {
    /// Docker CLI executable
    #[serde(default = "default_docker_binary")]
    pub binary: String,
    /// Daemon address passed as DOCKER_HOST, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            host: None,
        }
    }
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

/// How host ports are chosen for `ports([...])`
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PortStrategy {
    /// Worker-partitioned when running in parallel mode, random otherwise
    #[default]
    Auto,
    Random,
    Worker,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct PortsConfig {
    #[serde(default)]
    pub strategy: PortStrategy,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReuseConfig {
    #[serde(default = "default_wait_attempts")]
    pub wait_attempts: u32,
    #[serde(default = "default_wait_interval_ms")]
    pub wait_interval_ms: u64,
}

impl Default for ReuseConfig {
    fn default() -> Self {
        Self {
            wait_attempts: default_wait_attempts(),
            wait_interval_ms: default_wait_interval_ms(),
        }
    }
}

fn default_wait_attempts() -> u32 {
    100
}

fn default_wait_interval_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_create_attempts")]
    pub create_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            create_attempts: default_create_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_create_attempts() -> u32 {
    6
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    2000
}

impl RetryConfig {
    pub fn create_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.create_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkerConfig {
    /// Variables checked, in order, for the worker token. The first non-empty
    /// one names reusable containers, picks the port range and marks the
    /// process as a parallel worker.
    #[serde(default = "default_worker_keys")]
    pub keys: Vec<String>,
    /// Variable that switches `auto` port allocation to worker ranges
    #[serde(default = "default_parallel_key")]
    pub parallel_key: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            keys: default_worker_keys(),
            parallel_key: default_parallel_key(),
        }
    }
}

fn default_worker_keys() -> Vec<String> {
    [
        "TEST_TOKEN",
        "NEXTEST_TEST_GLOBAL_SLOT",
        "TEST_WORKER",
        "TEST_PARALLEL_PROCESS",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_parallel_key() -> String {
    "TEST_PARALLEL".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CleanupConfig {
    /// Label key attached to every non-reusable container
    #[serde(default = "default_managed_label")]
    pub managed_label: String,
    /// Register the exit-time sweep when the first container is built
    #[serde(default = "default_sweep_on_exit")]
    pub sweep_on_exit: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            managed_label: default_managed_label(),
            sweep_on_exit: default_sweep_on_exit(),
        }
    }
}

fn default_managed_label() -> String {
    "dockyard.managed".to_string()
}

fn default_sweep_on_exit() -> bool {
    true
}

impl CleanupConfig {
    /// `key=1` filter form of the managed label
    pub fn managed_filter(&self) -> String {
        format!("{}=1", self.managed_label)
    }
}

impl Config {
    /// Load config from .dockyard.yml in the project root
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: Config = serde_yml::from_str(&content)
            .map_err(|e| DyError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (DOCKER_HOST)
    pub fn with_env_overrides(mut self, env: &dyn EnvSource) -> Self {
        if let Some(host) = env.non_empty("DOCKER_HOST") {
            self.docker.host = Some(host);
        }
        self
    }

    /// Whether the parallel flag variable is set to a truthy value
    pub fn parallel_mode(&self, env: &dyn EnvSource) -> bool {
        env.non_empty(&self.worker.parallel_key)
            .map(|value| !matches!(value.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(false)
    }

    /// Effective strategy once `auto` is resolved against the environment
    pub fn effective_port_strategy(&self, env: &dyn EnvSource) -> PortStrategy {
        match self.ports.strategy {
            PortStrategy::Auto if self.parallel_mode(env) => PortStrategy::Worker,
            PortStrategy::Auto => PortStrategy::Random,
            other => other,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.docker.binary.trim().is_empty() {
            return Err(DyError::ConfigError(
                "docker.binary cannot be empty".to_string(),
            ));
        }
        if self.cleanup.managed_label.trim().is_empty() {
            return Err(DyError::ConfigError(
                "cleanup.managed_label cannot be empty".to_string(),
            ));
        }
        if self.retry.create_attempts == 0 {
            return Err(DyError::ConfigError(
                "retry.create_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
