// Random host ports that never repeat within a process

use super::checker::{PortAvailabilityChecker, PortProbe, Transport};
use super::{ContainerPort, PortAllocator};
use crate::errors::{DyError, Result};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

pub const MIN_PORT: u16 = 10000;
pub const MAX_PORT: u16 = 65535;
pub const MAX_ATTEMPTS: usize = 200;

/// Host ports handed out so far. Grows for the life of the registry and never
/// releases a port.
#[derive(Debug, Default)]
pub struct AssignedPorts {
    ports: Mutex<HashSet<u16>>,
}

impl AssignedPorts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registry shared by every allocator in this process
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<AssignedPorts>> = OnceLock::new();
        GLOBAL.get_or_init(AssignedPorts::new).clone()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports.lock().contains(&port)
    }

    pub fn len(&self) -> usize {
        self.ports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record `port` if it is new and `accept` approves it, atomically
    fn claim_if(&self, port: u16, accept: impl FnOnce() -> bool) -> bool {
        let mut ports = self.ports.lock();
        if ports.contains(&port) || !accept() {
            return false;
        }
        ports.insert(port)
    }
}

type PortDraw = Box<dyn Fn() -> u16 + Send + Sync>;

fn os_random_port() -> u16 {
    OsRng.gen_range(MIN_PORT..=MAX_PORT)
}

/// Draws random ports in `[10000, 65535]`, skipping ports already assigned in
/// this process and ports that fail the bind probe.
pub struct RandomUniquePortAllocator {
    assigned: Arc<AssignedPorts>,
    probe: Arc<dyn PortProbe>,
    draw: PortDraw,
}

impl RandomUniquePortAllocator {
    /// Allocator backed by the process-wide registry and a loopback probe
    pub fn new() -> Self {
        Self::with_registry(AssignedPorts::global())
    }

    pub fn with_registry(assigned: Arc<AssignedPorts>) -> Self {
        Self {
            assigned,
            probe: Arc::new(PortAvailabilityChecker),
            draw: Box::new(os_random_port),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replace the random source; used to exercise collision handling
    pub fn with_draw<F>(mut self, draw: F) -> Self
    where
        F: Fn() -> u16 + Send + Sync + 'static,
    {
        self.draw = Box::new(draw);
        self
    }

    pub fn registry(&self) -> &Arc<AssignedPorts> {
        &self.assigned
    }
}

impl Default for RandomUniquePortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator for RandomUniquePortAllocator {
    fn allocate_for_container_port(&self, container_port: &ContainerPort) -> Result<u16> {
        let transport = Transport::from(container_port.protocol);

        for _ in 0..MAX_ATTEMPTS {
            let port = (self.draw)();
            if self
                .assigned
                .claim_if(port, || self.probe.is_available(port, transport))
            {
                tracing::debug!(port, container_port = %container_port, "allocated random host port");
                return Ok(port);
            }
        }

        Err(DyError::PortAllocationError(format!(
            "Failed to find an available random host port for {} after {} attempts",
            container_port.protocol.as_str(),
            MAX_ATTEMPTS
        )))
    }
}
