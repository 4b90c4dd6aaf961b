// Shared wiring for container fixtures
// Engine, config, environment, clock and port allocator in one cloneable value

use crate::builder::ContainerBuilder;
use crate::cleanup::{self, ShutdownSweep};
use crate::clock::{self, Clock};
use crate::config::{Config, PortStrategy};
use crate::docker::{ContainerEngine, DockerCli};
use crate::errors::Result;
use crate::harness::Harness;
use crate::ports::{PortAllocator, RandomUniquePortAllocator, WorkerPortAllocator};
use crate::reuse::ReusableContainerResolver;
use crate::worker::{self, EnvSource, ProcessEnv};
use std::path::Path;
use std::sync::Arc;

/// Entry point for building containers.
///
/// Cheap to clone; every builder holds its own copy.
#[derive(Clone)]
pub struct Dockyard {
    engine: Arc<dyn ContainerEngine>,
    config: Arc<Config>,
    env: Arc<dyn EnvSource>,
    clock: Arc<dyn Clock>,
    allocator: Arc<dyn PortAllocator>,
}

impl Dockyard {
    /// Docker CLI backed context configured from `.dockyard.yml` in
    /// `project_root` and the process environment
    pub fn from_env(project_root: &Path) -> Result<Self> {
        let env: Arc<dyn EnvSource> = Arc::new(ProcessEnv);
        let config = Config::load(project_root)?.with_env_overrides(env.as_ref());
        let engine = Arc::new(DockerCli::new(&config.docker));
        Self::with_parts(engine, config, env, clock::system())
    }

    /// Context from explicit parts; the allocator follows the configured strategy
    pub fn with_parts(
        engine: Arc<dyn ContainerEngine>,
        config: Config,
        env: Arc<dyn EnvSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let allocator = Self::allocator_for(&config, env.as_ref())?;
        Ok(Self {
            engine,
            config: Arc::new(config),
            env,
            clock,
            allocator,
        })
    }

    /// Random allocation for serial runs, worker ranges under parallel runs
    pub fn allocator_for(config: &Config, env: &dyn EnvSource) -> Result<Arc<dyn PortAllocator>> {
        match config.effective_port_strategy(env) {
            PortStrategy::Worker => {
                let worker_id = worker::worker_id(&config.worker.keys, env);
                tracing::debug!(worker_id, "using worker-partitioned host ports");
                Ok(WorkerPortAllocator::shared(worker_id)?)
            }
            PortStrategy::Random | PortStrategy::Auto => Ok(Arc::new(RandomUniquePortAllocator::new())),
        }
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn PortAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Start configuring a container from `image`
    pub fn container<'h>(&self, image: impl Into<String>, harness: &'h dyn Harness) -> ContainerBuilder<'h> {
        ContainerBuilder::new(self.clone(), image, harness)
    }

    pub fn resolver(&self) -> ReusableContainerResolver {
        ReusableContainerResolver::new(self.engine.clone(), self.clock.clone(), &self.config.reuse)
    }

    pub fn shutdown_sweep(&self) -> ShutdownSweep {
        ShutdownSweep::new(self.engine.clone(), &self.config.cleanup)
    }

    /// Register the exit-time sweep once per process when enabled; returns
    /// whether this call registered it
    pub fn ensure_shutdown_sweep(&self) -> bool {
        let registered = self.config.cleanup.sweep_on_exit
            && cleanup::register_shutdown_sweep(
                self.shutdown_sweep(),
                &self.config.worker.keys,
                self.env.as_ref(),
            );
        if registered {
            tracing::debug!(filter = %self.config.cleanup.managed_filter(), "registered exit sweep");
        }
        registered
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn env(&self) -> &dyn EnvSource {
        self.env.as_ref()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn allocator(&self) -> &Arc<dyn PortAllocator> {
        &self.allocator
    }
}
