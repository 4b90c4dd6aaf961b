// Explicit host ports replayed in a cycle

use super::{ContainerPort, PortAllocator};
use crate::errors::{DyError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out a fixed list of host ports in order, wrapping around at the end
/// so repeated container starts see the same sequence again.
#[derive(Debug)]
pub struct FixedPortSequence {
    ports: Vec<u16>,
    next: AtomicUsize,
}

impl FixedPortSequence {
    pub fn new(ports: Vec<u16>) -> Result<Self> {
        if ports.is_empty() {
            return Err(DyError::ConfigError(
                "Fixed port sequence needs at least one host port.".to_string(),
            ));
        }
        Ok(Self {
            ports,
            next: AtomicUsize::new(0),
        })
    }

    pub fn next_port(&self) -> u16 {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        self.ports[index % self.ports.len()]
    }

    /// Restart the cycle from the first port
    pub fn rewind(&self) {
        self.next.store(0, Ordering::SeqCst);
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

impl Clone for FixedPortSequence {
    fn clone(&self) -> Self {
        Self {
            ports: self.ports.clone(),
            next: AtomicUsize::new(self.next.load(Ordering::SeqCst)),
        }
    }
}

impl PortAllocator for FixedPortSequence {
    fn allocate_for_container_port(&self, _container_port: &ContainerPort) -> Result<u16> {
        Ok(self.next_port())
    }
}
