// Library interface for dockyard
// Ephemeral and reusable Docker containers for integration tests

pub mod availability;
pub mod builder;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod context;
pub mod docker;
pub mod errors;
pub mod harness;
pub mod ports;
pub mod retry;
pub mod reuse;
pub mod spec;
pub mod wait;
pub mod worker;

pub use builder::{BuildStep, ContainerBuilder, StartOutcome, Started};
pub use context::Dockyard;
pub use docker::{ContainerEngine, DockerCli, ExecResult, MemoryEngine, StartedContainer};
pub use errors::{DyError, Result};
pub use harness::{ContainerRegistry, Harness};
