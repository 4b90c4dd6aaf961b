// Finds, restarts and waits for named reusable containers
// Every call re-queries the engine; nothing is cached between calls

use crate::clock::Clock;
use crate::config::ReuseConfig;
use crate::docker::{ContainerEngine, ContainerInfo, StartedContainer};
use crate::errors::Result;
use std::sync::Arc;
use std::time::Duration;

pub struct ReusableContainerResolver {
    engine: Arc<dyn ContainerEngine>,
    clock: Arc<dyn Clock>,
    wait_attempts: u32,
    wait_interval: Duration,
}

impl ReusableContainerResolver {
    pub fn new(engine: Arc<dyn ContainerEngine>, clock: Arc<dyn Clock>, config: &ReuseConfig) -> Self {
        Self {
            engine,
            clock,
            wait_attempts: config.wait_attempts,
            wait_interval: Duration::from_millis(config.wait_interval_ms),
        }
    }

    /// Handle to the named container if it exists and is running.
    ///
    /// The handle never cleans the container up automatically: it outlives the
    /// current test.
    pub fn resolve_running(&self, name: &str) -> Result<Option<StartedContainer>> {
        Ok(self
            .engine
            .inspect(name)?
            .filter(|info| info.status.is_running())
            .map(|info| self.wrap(&info)))
    }

    /// Like `resolve_running`, but starts the container when it exists and is
    /// stopped. Failures while restarting count as "not available".
    pub fn resolve_running_or_start(&self, name: &str) -> Result<Option<StartedContainer>> {
        let Some(info) = self.engine.inspect(name)? else {
            return Ok(None);
        };

        if info.status.is_running() {
            return Ok(Some(self.wrap(&info)));
        }

        if let Err(e) = self.engine.start(&info.id) {
            tracing::debug!(name, error = %e, "restart of reusable container failed");
            return Ok(None);
        }

        self.resolve_running(name)
    }

    /// Poll until a competing process has the named container running
    pub fn wait_until_running(&self, name: &str) -> Option<StartedContainer> {
        for attempt in 0..self.wait_attempts {
            match self.resolve_running_or_start(name) {
                Ok(Some(container)) => {
                    tracing::debug!(name, attempt, "reusable container became available");
                    return Some(container);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(name, attempt, error = %e, "reusable container lookup failed"),
            }
            self.clock.sleep(self.wait_interval);
        }

        tracing::warn!(name, attempts = self.wait_attempts, "reusable container never became available");
        None
    }

    fn wrap(&self, info: &ContainerInfo) -> StartedContainer {
        let container = StartedContainer::from_info(info, self.engine.clone(), self.clock.clone());
        container.set_skip_auto_cleanup(true);
        container
    }
}
