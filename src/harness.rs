// Cleanup registry and skip signal provided by the test harness

use crate::docker::StartedContainer;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// What the lifecycle code needs from the surrounding test framework
pub trait Harness: Send + Sync {
    /// Track a started container for teardown and hand it back
    fn register(&self, container: StartedContainer) -> StartedContainer;

    /// Abandon the current test without failing it
    fn skip(&self, message: &str) -> !;
}

/// Default harness: stops every owned container on `stop_all` or drop, and
/// skips by panicking with a `test skipped:` message.
///
/// libtest has no runtime skip, so that panic shows up as a failed test.
/// Suites that must stay green without a daemon should call
/// `ContainerBuilder::start_if_available` and return early on `None`, or
/// plug in a `Harness` whose `skip` talks to their test framework.
///
/// Reused containers (`skip_auto_cleanup`) are handed back untracked.
#[derive(Default)]
pub struct ContainerRegistry {
    containers: Arc<Mutex<Vec<StartedContainer>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of containers awaiting teardown
    pub fn len(&self) -> usize {
        self.containers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.lock().is_empty()
    }

    pub fn tracks(&self, container: &StartedContainer) -> bool {
        self.containers
            .lock()
            .iter()
            .any(|tracked| tracked.same_container(container))
    }

    /// Stop every tracked container; failures are logged and ignored
    pub fn stop_all(&self) {
        let containers = std::mem::take(&mut *self.containers.lock());
        for container in containers {
            if let Err(e) = container.stop() {
                tracing::warn!(container = %container.name(), error = %e, "failed to stop container during teardown");
            }
        }
    }
}

impl Harness for ContainerRegistry {
    fn register(&self, container: StartedContainer) -> StartedContainer {
        if container.skip_auto_cleanup() {
            return container;
        }

        let registry: Weak<Mutex<Vec<StartedContainer>>> = Arc::downgrade(&self.containers);
        container.on_stop(move |stopped| {
            if let Some(containers) = registry.upgrade() {
                containers.lock().retain(|c| !c.same_container(stopped));
            }
        });

        self.containers.lock().push(container.clone());
        container
    }

    fn skip(&self, message: &str) -> ! {
        tracing::warn!(%message, "skipping test");
        panic!("test skipped: {}", message);
    }
}

impl Drop for ContainerRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}
