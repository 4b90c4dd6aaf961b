// Host port allocation for container port bindings
// Random-unique, fixed-sequence and worker-partitioned strategies

pub mod checker;
pub mod fixed;
pub mod random;
pub mod worker;

pub use checker::{PortAvailabilityChecker, PortProbe, Transport};
pub use fixed::FixedPortSequence;
pub use random::{AssignedPorts, RandomUniquePortAllocator};
pub use worker::{WorkerPortAllocator, WorkerPortSequence};

use crate::errors::{DyError, Result};
use std::fmt;
use std::str::FromStr;

/// Transport protocol of a container port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A container-internal port, e.g. `5432` or `5353/udp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerPort {
    pub port: u16,
    pub protocol: Protocol,
}

impl ContainerPort {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }

    pub fn udp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Udp,
        }
    }
}

impl fmt::Display for ContainerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol.as_str())
    }
}

impl FromStr for ContainerPort {
    type Err = DyError;

    /// Parse `8080`, `8080/tcp` or `5353/udp`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (number, protocol) = match trimmed.split_once('/') {
            Some((number, proto)) => {
                let protocol = match proto.to_lowercase().as_str() {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    other => {
                        return Err(DyError::ConfigError(format!(
                            "Unsupported protocol '{}' in container port '{}'",
                            other, s
                        )))
                    }
                };
                (number, protocol)
            }
            None => (trimmed, Protocol::Tcp),
        };

        let port = number
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| DyError::ConfigError(format!("Invalid container port '{}'", s)))?;

        Ok(Self { port, protocol })
    }
}

/// Values accepted wherever a container port is expected
pub trait IntoContainerPort {
    fn into_container_port(self) -> Result<ContainerPort>;
}

impl IntoContainerPort for ContainerPort {
    fn into_container_port(self) -> Result<ContainerPort> {
        Ok(self)
    }
}

impl IntoContainerPort for u16 {
    fn into_container_port(self) -> Result<ContainerPort> {
        if self == 0 {
            return Err(DyError::ConfigError("Invalid container port '0'".to_string()));
        }
        Ok(ContainerPort::tcp(self))
    }
}

impl IntoContainerPort for &str {
    fn into_container_port(self) -> Result<ContainerPort> {
        self.parse()
    }
}

impl IntoContainerPort for String {
    fn into_container_port(self) -> Result<ContainerPort> {
        self.parse()
    }
}

/// Values accepted as an explicit host port: integers or digit-only strings
pub trait IntoHostPort {
    fn into_host_port(self, container_port: &ContainerPort) -> Result<u16>;
}

fn host_port_error(container_port: &ContainerPort) -> DyError {
    DyError::ConfigError(format!(
        "Host port must be an integer (for example port_mappings([(\"{}\", 8080)])).",
        container_port
    ))
}

impl IntoHostPort for u16 {
    fn into_host_port(self, container_port: &ContainerPort) -> Result<u16> {
        if self == 0 {
            return Err(host_port_error(container_port));
        }
        Ok(self)
    }
}

impl IntoHostPort for i64 {
    fn into_host_port(self, container_port: &ContainerPort) -> Result<u16> {
        u16::try_from(self)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| host_port_error(container_port))
    }
}

impl IntoHostPort for i32 {
    fn into_host_port(self, container_port: &ContainerPort) -> Result<u16> {
        (self as i64).into_host_port(container_port)
    }
}

impl IntoHostPort for &str {
    fn into_host_port(self, container_port: &ContainerPort) -> Result<u16> {
        if self.is_empty() || !self.chars().all(|c| c.is_ascii_digit()) {
            return Err(host_port_error(container_port));
        }
        self.parse::<i64>()
            .map_err(|_| host_port_error(container_port))?
            .into_host_port(container_port)
    }
}

impl IntoHostPort for String {
    fn into_host_port(self, container_port: &ContainerPort) -> Result<u16> {
        self.as_str().into_host_port(container_port)
    }
}

/// Produces a host port for each container port that needs one
pub trait PortAllocator: Send + Sync {
    fn allocate_for_container_port(&self, container_port: &ContainerPort) -> Result<u16>;
}
