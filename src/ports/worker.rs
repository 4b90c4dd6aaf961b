// Worker-partitioned host ports
// Each parallel worker owns 100 consecutive ports starting at 49152

use super::{ContainerPort, PortAllocator};
use crate::errors::{DyError, Result};
use crate::worker::{self, EnvSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

pub const BASE_PORT: u16 = 49152;
pub const PORTS_PER_WORKER: u16 = 100;

/// Sequential ports from one worker's range. Running past the end of the
/// range is fatal: it means the suite starts too many containers per worker.
#[derive(Debug)]
pub struct WorkerPortSequence {
    base_port: u16,
    counter: Mutex<u16>,
}

impl WorkerPortSequence {
    pub fn for_worker(worker_id: u16) -> Result<Self> {
        let base = BASE_PORT as u32 + worker_id as u32 * PORTS_PER_WORKER as u32;
        let last = base + PORTS_PER_WORKER as u32 - 1;
        if last > u16::MAX as u32 {
            return Err(DyError::PortAllocationError(format!(
                "Worker id {} has no port range below 65535",
                worker_id
            )));
        }

        Ok(Self {
            base_port: base as u16,
            counter: Mutex::new(0),
        })
    }

    /// Sequence for the worker identified by the first matching variable
    pub fn from_env(keys: &[String], env: &dyn EnvSource) -> Result<Self> {
        Self::for_worker(worker::worker_id(keys, env))
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    pub fn range_end(&self) -> u16 {
        self.base_port + PORTS_PER_WORKER - 1
    }

    pub fn next_port(&self) -> Result<u16> {
        let mut counter = self.counter.lock();
        if *counter >= PORTS_PER_WORKER {
            return Err(DyError::WorkerRangeExhausted {
                used: *counter,
                start: self.base_port,
                end: self.range_end(),
            });
        }

        let port = self.base_port + *counter;
        *counter += 1;
        Ok(port)
    }
}

/// `PortAllocator` view over a worker sequence
#[derive(Debug)]
pub struct WorkerPortAllocator {
    sequence: WorkerPortSequence,
}

impl WorkerPortAllocator {
    pub fn new(sequence: WorkerPortSequence) -> Self {
        Self { sequence }
    }

    pub fn sequence(&self) -> &WorkerPortSequence {
        &self.sequence
    }

    /// Process-wide allocator for a worker, so every context in the process
    /// draws from one counter.
    pub fn shared(worker_id: u16) -> Result<Arc<Self>> {
        static ALLOCATORS: OnceLock<Mutex<HashMap<u16, Arc<WorkerPortAllocator>>>> =
            OnceLock::new();

        let mut allocators = ALLOCATORS.get_or_init(Default::default).lock();
        if let Some(existing) = allocators.get(&worker_id) {
            return Ok(existing.clone());
        }

        let allocator = Arc::new(Self::new(WorkerPortSequence::for_worker(worker_id)?));
        allocators.insert(worker_id, allocator.clone());
        Ok(allocator)
    }
}

impl PortAllocator for WorkerPortAllocator {
    fn allocate_for_container_port(&self, _container_port: &ContainerPort) -> Result<u16> {
        self.sequence.next_port()
    }
}
