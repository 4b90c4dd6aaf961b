use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DyError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Docker error: {0}")]
    DockerError(String),

    #[error("Conflict: container name '{name}' is already in use by container: {message}")]
    NameConflict { name: String, message: String },

    #[error("No such container: {0}")]
    ContainerNotFound(String),

    #[error("Port conflict: {0}")]
    PortConflict(String),

    #[error("Port bindings for container '{0}' are not published yet")]
    PortsNotPublished(String),

    #[error("No host port left to assign for mapped container ports.")]
    NoHostPortLeft,

    #[error("Port {port} is not exposed by container '{container}'")]
    PortNotExposed { container: String, port: String },

    #[error("Port allocation error: {0}")]
    PortAllocationError(String),

    #[error("Worker port range exhausted. Used {used} ports from range {start}-{end}.")]
    WorkerRangeExhausted { used: u16, start: u16, end: u16 },

    #[error("{operation} failed after {attempts} attempts")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<DyError>,
    },

    #[error("Timed out after {timeout:?} waiting for {strategy} on container '{container}'")]
    WaitTimeout {
        strategy: String,
        container: String,
        timeout: Duration,
    },

    #[error("Unable to determine exit code for container exec command.")]
    ExitCodeUnavailable,

    #[error("Connection name was not initialized on the started container.")]
    ConnectionNameNotInitialized,

    #[error("Connection name is already set to '{0}'")]
    ConnectionNameAlreadySet(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DyError {
    /// Short name of the error kind, used when rendering failure chains
    pub fn kind(&self) -> &'static str {
        match self {
            DyError::ConfigError(_) => "ConfigError",
            DyError::DockerError(_) => "DockerError",
            DyError::NameConflict { .. } => "NameConflict",
            DyError::ContainerNotFound(_) => "ContainerNotFound",
            DyError::PortConflict(_) => "PortConflict",
            DyError::PortsNotPublished(_) => "PortsNotPublished",
            DyError::NoHostPortLeft => "NoHostPortLeft",
            DyError::PortNotExposed { .. } => "PortNotExposed",
            DyError::PortAllocationError(_) => "PortAllocationError",
            DyError::WorkerRangeExhausted { .. } => "WorkerRangeExhausted",
            DyError::RetryExhausted { .. } => "RetryExhausted",
            DyError::WaitTimeout { .. } => "WaitTimeout",
            DyError::ExitCodeUnavailable => "ExitCodeUnavailable",
            DyError::ConnectionNameNotInitialized => "ConnectionNameNotInitialized",
            DyError::ConnectionNameAlreadySet(_) => "ConnectionNameAlreadySet",
            DyError::CommandFailed(_) => "CommandFailed",
            DyError::Io(_) => "Io",
            DyError::Json(_) => "Json",
            DyError::Http(_) => "Http",
        }
    }
}

pub type Result<T> = std::result::Result<T, DyError>;

/// Iterate over an error and every error in its `source()` chain
pub fn chain<'a>(
    error: &'a (dyn std::error::Error + 'static),
) -> impl Iterator<Item = &'a (dyn std::error::Error + 'static)> {
    std::iter::successors(Some(error), |current| current.source())
}

/// View a cause as a `DyError`, including boxed sources
pub fn as_dy_error<'a>(cause: &'a (dyn std::error::Error + 'static)) -> Option<&'a DyError> {
    cause
        .downcast_ref::<DyError>()
        .or_else(|| cause.downcast_ref::<Box<DyError>>().map(|boxed| boxed.as_ref()))
}

/// Render the whole cause chain as `Kind: message` segments
pub fn describe_chain(error: &(dyn std::error::Error + 'static)) -> String {
    chain(error)
        .map(|cause| {
            let kind = as_dy_error(cause).map(DyError::kind).unwrap_or("Error");
            format!("{}: {}", kind, cause)
        })
        .collect::<Vec<_>>()
        .join(" <- caused by ")
}
