// Started container handle
// Mapped ports, exec, logs and idempotent stop for one running container

use crate::clock::Clock;
use crate::docker::engine::{ContainerEngine, ContainerInfo};
use crate::docker::exec::{lossy_utf8, sanitize_output, ExecResult};
use crate::errors::{DyError, Result};
use crate::ports::{ContainerPort, IntoContainerPort};
use crate::retry::RetryPolicy;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

type StopCallback = Box<dyn FnOnce(&StartedContainer) + Send>;

struct StopState {
    stopped: bool,
    callbacks: Vec<StopCallback>,
}

struct Inner {
    id: String,
    name: String,
    engine: Arc<dyn ContainerEngine>,
    clock: Arc<dyn Clock>,
    exposed_ports: Vec<ContainerPort>,
    state: Mutex<StopState>,
    connection_name: OnceLock<String>,
    skip_auto_cleanup: AtomicBool,
}

/// Handle to a running container.
///
/// Clones share the same underlying state: stopping through one clone marks
/// every clone stopped, and stop callbacks fire once in total.
#[derive(Clone)]
pub struct StartedContainer {
    inner: Arc<Inner>,
}

impl StartedContainer {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        engine: Arc<dyn ContainerEngine>,
        clock: Arc<dyn Clock>,
        exposed_ports: Vec<ContainerPort>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                name: name.into(),
                engine,
                clock,
                exposed_ports,
                state: Mutex::new(StopState {
                    stopped: false,
                    callbacks: Vec::new(),
                }),
                connection_name: OnceLock::new(),
                skip_auto_cleanup: AtomicBool::new(false),
            }),
        }
    }

    /// Wrap a container found through inspect
    pub fn from_info(
        info: &ContainerInfo,
        engine: Arc<dyn ContainerEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            info.id.clone(),
            info.name.clone(),
            engine,
            clock,
            info.exposed_ports.clone(),
        )
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn exposed_ports(&self) -> &[ContainerPort] {
        &self.inner.exposed_ports
    }

    /// Host where mapped ports are reachable
    pub fn host(&self) -> String {
        self.inner.engine.host()
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.inner.engine
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Whether two handles point at the same engine container
    pub fn same_container(&self, other: &StartedContainer) -> bool {
        self.inner.id == other.inner.id
    }

    /// Host port bound to `container_port`, retrying while the engine is
    /// still publishing bindings.
    pub fn mapped_port(&self, container_port: impl IntoContainerPort) -> Result<u16> {
        let container_port = container_port.into_container_port()?;

        RetryPolicy::mapped_port().run(
            self.inner.clock.as_ref(),
            "mapped port lookup",
            |_| self.lookup_mapped_port(&container_port),
            is_transient_port_error,
        )
    }

    /// Host port of the first exposed container port
    pub fn first_mapped_port(&self) -> Result<u16> {
        let first = self.inner.exposed_ports.first().copied().ok_or_else(|| {
            DyError::PortNotExposed {
                container: self.inner.name.clone(),
                port: "<any>".to_string(),
            }
        })?;
        self.mapped_port(first)
    }

    /// Single mapped-port lookup without retry
    pub fn lookup_mapped_port(&self, container_port: &ContainerPort) -> Result<u16> {
        let info = self
            .inner
            .engine
            .inspect(&self.inner.id)?
            .ok_or_else(|| DyError::ContainerNotFound(self.inner.id.clone()))?;

        let bindings = info
            .port_bindings
            .ok_or_else(|| DyError::PortsNotPublished(self.inner.name.clone()))?;

        match bindings.get(container_port) {
            Some(hosts) => hosts.first().copied().ok_or(DyError::NoHostPortLeft),
            None => Err(DyError::PortNotExposed {
                container: self.inner.name.clone(),
                port: container_port.to_string(),
            }),
        }
    }

    /// Run a command in the container, sanitizing its combined output
    pub fn exec<I, S>(&self, command: I) -> Result<ExecResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_with(command, false)
    }

    /// Run a command in the container, keeping its output as produced
    pub fn exec_raw<I, S>(&self, command: I) -> Result<ExecResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_with(command, true)
    }

    fn exec_with<I, S>(&self, command: I, raw: bool) -> Result<ExecResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command: Vec<String> = command.into_iter().map(Into::into).collect();
        tracing::debug!(container = %self.inner.name, command = ?command, "exec");

        let output = self.inner.engine.exec(&self.inner.id, &command)?;
        ExecResult::from_output(&command, output, raw)
    }

    /// Container logs with control characters removed
    pub fn logs(&self) -> Result<String> {
        Ok(sanitize_output(&self.inner.engine.logs(&self.inner.id)?))
    }

    pub fn raw_logs(&self) -> Result<String> {
        Ok(lossy_utf8(&self.inner.engine.logs(&self.inner.id)?))
    }

    /// Stop and remove the container. Only the first successful call talks to
    /// the engine and fires the stop callbacks.
    pub fn stop(&self) -> Result<()> {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return Ok(());
            }

            self.halt()?;
            state.stopped = true;
            std::mem::take(&mut state.callbacks)
        };

        tracing::info!(container = %self.inner.name, id = %self.inner.id, "container stopped");
        for callback in callbacks {
            callback(self);
        }
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        let engine = &self.inner.engine;
        match engine.stop(&self.inner.id, 0) {
            Ok(()) | Err(DyError::ContainerNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match engine.remove(&self.inner.id, true) {
            Ok(()) | Err(DyError::ContainerNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// Register a callback for the transition to stopped; runs right away
    /// when the handle is already stopped.
    pub fn on_stop<F>(&self, callback: F)
    where
        F: FnOnce(&StartedContainer) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.stopped {
            drop(state);
            callback(self);
            return;
        }
        state.callbacks.push(Box::new(callback));
    }

    /// True for long-lived reused containers this test does not own
    pub fn skip_auto_cleanup(&self) -> bool {
        self.inner.skip_auto_cleanup.load(Ordering::SeqCst)
    }

    pub fn set_skip_auto_cleanup(&self, skip: bool) {
        self.inner.skip_auto_cleanup.store(skip, Ordering::SeqCst);
    }

    /// Assign the connection name; it cannot change afterwards
    pub fn with_connection_name(&self, name: impl Into<String>) -> Result<&Self> {
        let name = name.into();
        if let Err(rejected) = self.inner.connection_name.set(name) {
            let current = self
                .inner
                .connection_name
                .get()
                .cloned()
                .unwrap_or(rejected);
            return Err(DyError::ConnectionNameAlreadySet(current));
        }
        Ok(self)
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.inner.connection_name.get().map(String::as_str)
    }

    /// Connection name, failing when it was never assigned
    pub fn resolved_connection_name(&self) -> Result<&str> {
        self.connection_name()
            .ok_or(DyError::ConnectionNameNotInitialized)
    }
}

impl fmt::Debug for StartedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartedContainer")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("stopped", &self.is_stopped())
            .field("skip_auto_cleanup", &self.skip_auto_cleanup())
            .field("connection_name", &self.connection_name())
            .finish()
    }
}

/// Races between inspect and port publishing that are worth retrying
pub fn is_transient_port_error(error: &DyError) -> bool {
    matches!(error, DyError::PortsNotPublished(_) | DyError::NoHostPortLeft)
}
