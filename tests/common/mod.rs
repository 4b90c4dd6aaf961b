//! Common test utilities for dockyard integration tests
#![allow(dead_code)]

use dockyard::clock::Clock;
use dockyard::config::{Config, DockerConfig};
use dockyard::docker::DockerCli;
use dockyard::ports::{AssignedPorts, RandomUniquePortAllocator};
use dockyard::worker::StaticEnv;
use dockyard::{ContainerRegistry, Dockyard, MemoryEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock whose sleeps return immediately but still move time forward
#[derive(Clone)]
pub struct InstantClock {
    now: Arc<Mutex<Instant>>,
    slept: Arc<Mutex<Duration>>,
}

impl InstantClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
            slept: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Total time "slept" so far
    pub fn slept(&self) -> Duration {
        *self.slept.lock()
    }
}

impl Clock for InstantClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        *self.now.lock() += duration;
        *self.slept.lock() += duration;
    }
}

/// In-memory engine, harness and context wired together
pub struct TestFixture {
    pub engine: Arc<MemoryEngine>,
    pub registry: ContainerRegistry,
    pub context: Dockyard,
    pub clock: InstantClock,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_env(&[])
    }

    /// Fixture whose environment holds exactly `vars`
    pub fn with_env(vars: &[(&str, &str)]) -> Self {
        Self::sharing(Arc::new(MemoryEngine::new()), vars)
    }

    /// Fixture on an existing engine, as a second test process would see it
    pub fn sharing(engine: Arc<MemoryEngine>, vars: &[(&str, &str)]) -> Self {
        let clock = InstantClock::new();
        let context = Dockyard::with_parts(
            engine.clone(),
            test_config(),
            Arc::new(StaticEnv::new(vars)),
            Arc::new(clock.clone()),
        )
        .expect("Failed to build test context")
        .with_allocator(Arc::new(RandomUniquePortAllocator::with_registry(
            AssignedPorts::new(),
        )));

        TestFixture {
            engine,
            registry: ContainerRegistry::new(),
            context,
            clock,
        }
    }
}

/// Defaults with the exit sweep off and short reuse waits
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.cleanup.sweep_on_exit = false;
    config.reuse.wait_attempts = 3;
    config
}

/// Whether a real docker daemon answers
pub fn docker_available() -> bool {
    DockerCli::new(&DockerConfig::default()).is_available()
}
