// Docker CLI backend
// Talks to the daemon through the `docker` executable (no shell, no injection)

use crate::config::DockerConfig;
use crate::docker::engine::{ContainerEngine, ContainerInfo, ContainerStatus};
use crate::docker::exec::ExecOutput;
use crate::errors::{DyError, Result};
use crate::ports::ContainerPort;
use crate::spec::CreateRequest;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::process::{Command, Output};

/// `ContainerEngine` implemented on top of the docker command line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    host: Option<String>,
}

impl DockerCli {
    pub fn new(config: &DockerConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            host: config.host.clone(),
        }
    }

    /// Check if the docker daemon answers
    pub fn is_available(&self) -> bool {
        self.command()
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(host) = &self.host {
            command.env("DOCKER_HOST", host);
        }
        command
    }

    fn run(&self, args: &[String]) -> Result<Output> {
        tracing::trace!(binary = %self.binary, args = ?args, "running docker command");
        Ok(self.command().args(args).output()?)
    }

    /// Run a command and turn a non-zero exit into a classified error
    fn run_checked(&self, args: &[String], subject: Option<&str>) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim(), subject));
        }
        Ok(output)
    }

    /// Build `docker create` arguments (safe from injection)
    fn build_create_args(request: &CreateRequest) -> Vec<String> {
        let mut args = vec!["create".to_string()];

        if let Some(name) = &request.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }

        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        for (key, value) in &request.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }

        for binding in &request.port_bindings {
            args.push("--publish".to_string());
            args.push(format!(
                "{}:{}/{}",
                binding.host,
                binding.container.port,
                binding.container.protocol.as_str()
            ));
        }

        for mount in &request.mounts {
            args.push("--volume".to_string());
            args.push(format!("{}:{}", mount.source, mount.target));
        }

        if let Some(entrypoint) = &request.entrypoint {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
        }

        args.push(request.image.clone());

        if let Some(command) = &request.command {
            args.extend(command.iter().cloned());
        }

        args
    }
}

impl ContainerEngine for DockerCli {
    fn create(&self, request: &CreateRequest) -> Result<String> {
        let args = Self::build_create_args(request);
        let output = self.run_checked(&args, request.name.as_deref())?;
        let id = String::from_utf8_lossy(&output.stdout)
            .lines()
            .last()
            .map(|line| line.trim().to_string())
            .unwrap_or_default();

        if id.is_empty() {
            return Err(DyError::DockerError(
                "docker create did not report a container id".to_string(),
            ));
        }
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<()> {
        self.run_checked(&["start".to_string(), id.to_string()], Some(id))?;
        Ok(())
    }

    fn stop(&self, id: &str, timeout_secs: u32) -> Result<()> {
        self.run_checked(
            &[
                "stop".to_string(),
                "--time".to_string(),
                timeout_secs.to_string(),
                id.to_string(),
            ],
            Some(id),
        )?;
        Ok(())
    }

    fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(id.to_string());
        self.run_checked(&args, Some(id))?;
        Ok(())
    }

    fn inspect(&self, id_or_name: &str) -> Result<Option<ContainerInfo>> {
        let args = vec![
            "container".to_string(),
            "inspect".to_string(),
            id_or_name.to_string(),
        ];

        match self.run_checked(&args, Some(id_or_name)) {
            Ok(output) => parse_inspect(&output.stdout),
            Err(DyError::ContainerNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn exec(&self, id: &str, command: &[String]) -> Result<ExecOutput> {
        let mut args = vec!["exec".to_string(), id.to_string()];
        args.extend(command.iter().cloned());

        let output = self.run(&args)?;
        if let Some(error) = exec_cli_failure(&String::from_utf8_lossy(&output.stderr), id) {
            return Err(error);
        }

        Ok(ExecOutput {
            exit_code: output.status.code().map(i64::from),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn logs(&self, id: &str) -> Result<Vec<u8>> {
        let output = self.run_checked(&["logs".to_string(), id.to_string()], Some(id))?;
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(combined)
    }

    fn list_by_label(&self, label_filter: &str) -> Result<Vec<String>> {
        let args = vec![
            "ps".to_string(),
            "--all".to_string(),
            "--quiet".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("label={}", label_filter),
        ];
        let output = self.run_checked(&args, None)?;

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(|line| line.to_string())
            .collect())
    }

    fn host(&self) -> String {
        host_from_docker_host(self.host.as_deref())
    }
}

/// Host part of a `tcp://host:port` DOCKER_HOST, loopback otherwise
pub fn host_from_docker_host(docker_host: Option<&str>) -> String {
    docker_host
        .and_then(|value| {
            value
                .strip_prefix("tcp://")
                .or_else(|| value.strip_prefix("http://"))
                .or_else(|| value.strip_prefix("https://"))
        })
        .map(|rest| {
            let authority = rest.split('/').next().unwrap_or(rest);
            match authority.rsplit_once(':') {
                Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
                _ => authority,
            }
        })
        .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Docker's own exec failures (missing or stopped container, daemon errors),
/// told apart from the command's output by the CLI's error prefix. The exit
/// code is not enough: the CLI reports these with 1, 125 or 126.
fn exec_cli_failure(stderr: &str, id: &str) -> Option<DyError> {
    let first_line = stderr.trim_start().lines().next().unwrap_or_default();
    let from_cli = first_line.starts_with("Error response from daemon")
        || first_line.starts_with("Error: No such container");
    from_cli.then(|| classify_failure(stderr.trim(), Some(id)))
}

/// Map docker CLI stderr onto the error taxonomy
pub fn classify_failure(stderr: &str, subject: Option<&str>) -> DyError {
    let lower = stderr.to_lowercase();

    if lower.contains("is already in use by container") {
        return DyError::NameConflict {
            name: subject.unwrap_or_default().to_string(),
            message: stderr.to_string(),
        };
    }
    if lower.contains("no such container") || lower.contains("no such object") {
        return DyError::ContainerNotFound(subject.unwrap_or(stderr).to_string());
    }
    if lower.contains("port is already allocated") || lower.contains("address already in use") {
        return DyError::PortConflict(stderr.to_string());
    }

    DyError::DockerError(stderr.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectJson {
    id: String,
    #[serde(default)]
    name: String,
    state: Option<StateJson>,
    config: Option<ConfigJson>,
    network_settings: Option<NetworkSettingsJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateJson {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigJson {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    #[serde(default)]
    exposed_ports: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettingsJson {
    #[serde(default)]
    ports: Option<HashMap<String, Option<Vec<HostBindingJson>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostBindingJson {
    #[serde(default)]
    host_port: String,
}

fn parse_inspect(stdout: &[u8]) -> Result<Option<ContainerInfo>> {
    let entries: Vec<InspectJson> = serde_json::from_slice(stdout)?;
    let Some(entry) = entries.into_iter().next() else {
        return Ok(None);
    };

    let labels = entry
        .config
        .as_ref()
        .and_then(|c| c.labels.clone())
        .unwrap_or_default()
        .into_iter()
        .collect::<BTreeMap<_, _>>();

    let mut exposed_ports: Vec<ContainerPort> = entry
        .config
        .as_ref()
        .and_then(|c| c.exposed_ports.as_ref())
        .map(|ports| ports.keys().filter_map(|key| key.parse().ok()).collect())
        .unwrap_or_default();
    exposed_ports.sort();

    let port_bindings = entry
        .network_settings
        .and_then(|settings| settings.ports)
        .map(|ports| {
            ports
                .into_iter()
                .filter_map(|(key, bindings)| {
                    let container_port = key.parse::<ContainerPort>().ok()?;
                    let mut hosts: Vec<u16> = bindings
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|b| b.host_port.parse().ok())
                        .collect();
                    hosts.dedup();
                    Some((container_port, hosts))
                })
                .collect::<BTreeMap<_, _>>()
        });

    Ok(Some(ContainerInfo {
        id: entry.id,
        name: entry.name.trim_start_matches('/').to_string(),
        status: entry
            .state
            .map(|s| ContainerStatus::parse(&s.status))
            .unwrap_or_else(|| ContainerStatus::Other("unknown".to_string())),
        labels,
        exposed_ports,
        port_bindings,
    }))
}
