// Process-exit sweep of leaked managed containers

use crate::config::CleanupConfig;
use crate::docker::ContainerEngine;
use crate::worker::{self, EnvSource};
use std::sync::{Arc, OnceLock};

/// Force-removes every container carrying the managed label
pub struct ShutdownSweep {
    engine: Arc<dyn ContainerEngine>,
    filter: String,
}

impl ShutdownSweep {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: &CleanupConfig) -> Self {
        Self {
            engine,
            filter: config.managed_filter(),
        }
    }

    /// Remove managed containers, returning how many went away. Never fails.
    pub fn run(&self) -> usize {
        let ids = match self.engine.list_by_label(&self.filter) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::debug!(error = %e, "shutdown sweep could not list containers");
                return 0;
            }
        };

        let removed = ids
            .iter()
            .filter(|id| !id.is_empty())
            .filter(|id| match self.engine.remove(id, true) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(id = %id, error = %e, "shutdown sweep could not remove container");
                    false
                }
            })
            .count();

        tracing::info!(removed, filter = %self.filter, "shutdown sweep finished");
        removed
    }
}

static SWEEP: OnceLock<ShutdownSweep> = OnceLock::new();

/// Run `sweep` when the process exits. Only the first call in a process
/// registers anything, and parallel worker processes never register: the
/// coordinating process owns cleanup. Worker detection reads the same
/// `keys` that name reusable containers and pick port ranges.
///
/// Returns whether this call registered the sweep.
pub fn register_shutdown_sweep(
    sweep: ShutdownSweep,
    keys: &[String],
    env: &dyn EnvSource,
) -> bool {
    if worker::is_parallel_worker_process(keys, env) {
        return false;
    }
    SWEEP.set(sweep).is_ok()
}

#[ctor::dtor]
fn sweep_at_exit() {
    if let Some(sweep) = SWEEP.get() {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sweep.run()));
    }
}
