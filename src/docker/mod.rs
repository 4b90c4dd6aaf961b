// Docker integration module
// Engine backends and the started-container handle

pub mod cli;
pub mod container;
pub mod engine;
pub mod exec;
pub mod memory;

pub use cli::DockerCli;
pub use container::StartedContainer;
pub use engine::{ContainerEngine, ContainerInfo, ContainerStatus};
pub use exec::{ExecOutput, ExecResult};
pub use memory::MemoryEngine;
