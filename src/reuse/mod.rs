// Container reuse across tests, runs and parallel workers

pub mod resolver;

pub use resolver::ReusableContainerResolver;

use crate::errors::{self, DyError, Result};
use crate::worker::{EnvSource, WorkerTokenResolver};

/// Reuse settings recorded by `ContainerBuilder::reuse`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReuseOptions {
    pub name: String,
    pub per_worker: bool,
}

impl ReuseOptions {
    pub fn new(name: impl Into<String>, per_worker: bool) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DyError::ConfigError(
                "Reuse container name cannot be empty.".to_string(),
            ));
        }
        Ok(Self { name, per_worker })
    }

    /// Final container name: `name-worker-<token>` when scoped per worker and
    /// a worker token is available, the plain name otherwise.
    pub fn resolve_name(&self, keys: &[String], env: &dyn EnvSource) -> String {
        if !self.per_worker {
            return self.name.clone();
        }

        match WorkerTokenResolver::new(keys).resolve(env) {
            Some(token) => format!("{}-worker-{}", self.name, token),
            None => self.name.clone(),
        }
    }
}

/// Whether a failure (or any of its causes) means the container name is taken
pub fn is_name_conflict(error: &(dyn std::error::Error + 'static)) -> bool {
    errors::chain(error).any(|cause| match errors::as_dy_error(cause) {
        Some(DyError::NameConflict { .. }) => true,
        Some(DyError::PortConflict(_)) => false,
        _ => {
            let message = cause.to_string().to_lowercase();
            message.contains("is already in use by container") || message.contains("conflict")
        }
    })
}
