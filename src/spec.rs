// Desired container configuration, assembled by the builder

use crate::ports::ContainerPort;
use crate::wait::WaitStrategy;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Host path bind-mounted into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
}

/// A container port published on a concrete host port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub container: ContainerPort,
    pub host: u16,
}

/// Everything needed to create a container, before host ports are chosen
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub exposed_ports: Vec<ContainerPort>,
    pub port_bindings: Vec<PortBinding>,
    /// Host ports came from the allocator and may be drawn again on conflict
    pub ports_auto_allocated: bool,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<String>,
    pub waits: Vec<Arc<dyn WaitStrategy>>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Engine request for this spec with the given host bindings
    pub fn create_request(&self, port_bindings: Vec<PortBinding>) -> CreateRequest {
        CreateRequest {
            image: self.image.clone(),
            name: self.name.clone(),
            env: self.env.clone(),
            labels: self.labels.clone(),
            mounts: self.mounts.clone(),
            command: self.command.clone(),
            entrypoint: self.entrypoint.clone(),
            port_bindings,
        }
    }
}

/// Fully resolved create call sent to the container engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateRequest {
    pub image: String,
    pub name: Option<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<String>,
    pub port_bindings: Vec<PortBinding>,
}
