// Container engine abstraction - the narrow set of daemon operations the
// lifecycle code depends on. Implemented by the docker CLI backend and by
// the in-memory engine used in tests.
use crate::docker::exec::ExecOutput;
use crate::errors::Result;
use crate::ports::ContainerPort;
use crate::spec::CreateRequest;
use std::collections::BTreeMap;

/// Lifecycle state reported by inspect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Other(String),
}

impl ContainerStatus {
    pub fn parse(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Other(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

/// Snapshot of a container as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub labels: BTreeMap<String, String>,
    pub exposed_ports: Vec<ContainerPort>,
    /// `None` while the engine has not published port bindings yet
    pub port_bindings: Option<BTreeMap<ContainerPort, Vec<u16>>>,
}

/// Trait that every container engine backend must implement
pub trait ContainerEngine: Send + Sync {
    /// Create (but do not start) a container, returning its id
    fn create(&self, request: &CreateRequest) -> Result<String>;

    /// Start a created or stopped container
    fn start(&self, id: &str) -> Result<()>;

    /// Stop a running container, killing it after `timeout_secs`
    fn stop(&self, id: &str, timeout_secs: u32) -> Result<()>;

    /// Delete a container
    fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Look up a container by id or name; `Ok(None)` when it does not exist
    fn inspect(&self, id_or_name: &str) -> Result<Option<ContainerInfo>>;

    /// Run a command inside a running container
    fn exec(&self, id: &str, command: &[String]) -> Result<ExecOutput>;

    /// Combined stdout/stderr log stream of a container
    fn logs(&self, id: &str) -> Result<Vec<u8>>;

    /// Ids of all containers (running or not) carrying `label_filter` (`key=value`)
    fn list_by_label(&self, label_filter: &str) -> Result<Vec<String>>;

    /// Host name or address where published ports are reachable
    fn host(&self) -> String;
}
