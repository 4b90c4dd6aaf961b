// In-memory container engine
// Mimics the docker daemon closely enough to drive lifecycle code without one

use crate::docker::engine::{ContainerEngine, ContainerInfo, ContainerStatus};
use crate::docker::exec::ExecOutput;
use crate::errors::{DyError, Result};
use crate::ports::ContainerPort;
use crate::spec::{CreateRequest, PortBinding};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Engine operations that can be counted and intercepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
    Exec,
    Logs,
    List,
}

type Hook = Box<dyn FnOnce(&MemoryEngine) -> Result<()> + Send>;
type ExecHandler = Arc<dyn Fn(&str, &[String]) -> ExecOutput + Send + Sync>;

#[derive(Debug, Clone)]
struct MemContainer {
    id: String,
    name: String,
    running: bool,
    labels: BTreeMap<String, String>,
    bindings: Vec<PortBinding>,
    logs: Vec<u8>,
}

#[derive(Default)]
struct State {
    containers: Vec<MemContainer>,
    next_id: u64,
    calls: HashMap<Operation, usize>,
    hooks: HashMap<Operation, VecDeque<Hook>>,
}

impl State {
    fn find(&self, id_or_name: &str) -> Option<&MemContainer> {
        self.containers
            .iter()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
    }

    fn find_mut(&mut self, id_or_name: &str) -> Option<&mut MemContainer> {
        self.containers
            .iter_mut()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:012x}", 0xd0c0_0000_u64 + self.next_id)
    }
}

/// `ContainerEngine` kept entirely in process memory.
///
/// Hooks registered with [`MemoryEngine::before_next`] run before the next call
/// of an operation, outside the state lock, and may fail that call or mutate the
/// engine (for example to simulate a competing process creating a container).
pub struct MemoryEngine {
    state: Mutex<State>,
    exec_handler: Mutex<Option<ExecHandler>>,
    host: String,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            exec_handler: Mutex::new(None),
            host: "127.0.0.1".to_string(),
        }
    }

    /// Run `hook` before the next call of `operation`
    pub fn before_next<F>(&self, operation: Operation, hook: F)
    where
        F: FnOnce(&MemoryEngine) -> Result<()> + Send + 'static,
    {
        self.state
            .lock()
            .hooks
            .entry(operation)
            .or_default()
            .push_back(Box::new(hook));
    }

    /// Fail the next call of `operation` with the error built by `error`
    pub fn fail_next<F>(&self, operation: Operation, error: F)
    where
        F: FnOnce() -> DyError + Send + 'static,
    {
        self.before_next(operation, move |_| Err(error()));
    }

    /// How many times `operation` was called, failed calls included
    pub fn calls(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Answer exec calls with `handler` instead of an empty success
    pub fn on_exec<F>(&self, handler: F)
    where
        F: Fn(&str, &[String]) -> ExecOutput + Send + Sync + 'static,
    {
        *self.exec_handler.lock() = Some(Arc::new(handler));
    }

    /// Add a container as if another process had created it
    pub fn seed(&self, name: &str, running: bool, labels: &[(&str, &str)]) -> String {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.containers.push(MemContainer {
            id: id.clone(),
            name: name.to_string(),
            running,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            bindings: Vec::new(),
            logs: Vec::new(),
        });
        id
    }

    pub fn append_log(&self, id_or_name: &str, bytes: &[u8]) {
        if let Some(container) = self.state.lock().find_mut(id_or_name) {
            container.logs.extend_from_slice(bytes);
        }
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    pub fn exists(&self, id_or_name: &str) -> bool {
        self.state.lock().find(id_or_name).is_some()
    }

    pub fn is_running(&self, id_or_name: &str) -> bool {
        self.state
            .lock()
            .find(id_or_name)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    /// Count the call and run a pending hook, if any
    fn enter(&self, operation: Operation) -> Result<()> {
        let hook = {
            let mut state = self.state.lock();
            *state.calls.entry(operation).or_insert(0) += 1;
            state
                .hooks
                .get_mut(&operation)
                .and_then(|queue| queue.pop_front())
        };

        match hook {
            Some(hook) => hook(self),
            None => Ok(()),
        }
    }
}

impl ContainerEngine for MemoryEngine {
    fn create(&self, request: &CreateRequest) -> Result<String> {
        self.enter(Operation::Create)?;
        let mut state = self.state.lock();

        let name = match &request.name {
            Some(name) => {
                if let Some(existing) = state.find(name) {
                    return Err(DyError::NameConflict {
                        name: name.clone(),
                        message: format!(
                            "Conflict. The container name \"/{}\" is already in use by container \"{}\".",
                            name, existing.id
                        ),
                    });
                }
                name.clone()
            }
            None => format!("mem_{}", state.next_id + 1),
        };

        let id = state.allocate_id();
        state.containers.push(MemContainer {
            id: id.clone(),
            name,
            running: false,
            labels: request.labels.clone(),
            bindings: request.port_bindings.clone(),
            logs: Vec::new(),
        });
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<()> {
        self.enter(Operation::Start)?;
        let mut state = self.state.lock();

        let Some(container) = state.find(id).cloned() else {
            return Err(DyError::ContainerNotFound(id.to_string()));
        };

        let taken = state
            .containers
            .iter()
            .filter(|other| other.running && other.id != container.id)
            .flat_map(|other| other.bindings.iter())
            .find(|bound| container.bindings.iter().any(|b| b.host == bound.host));
        if let Some(bound) = taken {
            return Err(DyError::PortConflict(format!(
                "Bind for 0.0.0.0:{} failed: port is already allocated",
                bound.host
            )));
        }

        if let Some(container) = state.find_mut(id) {
            container.running = true;
        }
        Ok(())
    }

    fn stop(&self, id: &str, _timeout_secs: u32) -> Result<()> {
        self.enter(Operation::Stop)?;
        match self.state.lock().find_mut(id) {
            Some(container) => {
                container.running = false;
                Ok(())
            }
            None => Err(DyError::ContainerNotFound(id.to_string())),
        }
    }

    fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.enter(Operation::Remove)?;
        let mut state = self.state.lock();

        let Some(index) = state
            .containers
            .iter()
            .position(|c| c.id == id || c.name == id)
        else {
            return Err(DyError::ContainerNotFound(id.to_string()));
        };

        if state.containers[index].running && !force {
            return Err(DyError::DockerError(format!(
                "cannot remove container \"{}\": container is running: stop the container before removing or force remove",
                id
            )));
        }

        state.containers.remove(index);
        Ok(())
    }

    fn inspect(&self, id_or_name: &str) -> Result<Option<ContainerInfo>> {
        self.enter(Operation::Inspect)?;
        let state = self.state.lock();

        Ok(state.find(id_or_name).map(|container| {
            let mut exposed_ports: Vec<ContainerPort> =
                container.bindings.iter().map(|b| b.container).collect();
            exposed_ports.sort();
            exposed_ports.dedup();

            let port_bindings = container.running.then(|| {
                let mut bindings: BTreeMap<ContainerPort, Vec<u16>> = BTreeMap::new();
                for binding in &container.bindings {
                    bindings
                        .entry(binding.container)
                        .or_default()
                        .push(binding.host);
                }
                bindings
            });

            ContainerInfo {
                id: container.id.clone(),
                name: container.name.clone(),
                status: if container.running {
                    ContainerStatus::Running
                } else {
                    ContainerStatus::Exited
                },
                labels: container.labels.clone(),
                exposed_ports,
                port_bindings,
            }
        }))
    }

    fn exec(&self, id: &str, command: &[String]) -> Result<ExecOutput> {
        self.enter(Operation::Exec)?;
        let container_id = {
            let state = self.state.lock();
            match state.find(id) {
                Some(container) if container.running => container.id.clone(),
                Some(_) => {
                    return Err(DyError::DockerError(format!(
                        "Container {} is not running",
                        id
                    )))
                }
                None => return Err(DyError::ContainerNotFound(id.to_string())),
            }
        };

        let handler = self.exec_handler.lock().clone();
        Ok(match handler {
            Some(handler) => handler(&container_id, command),
            None => ExecOutput {
                exit_code: Some(0),
                ..Default::default()
            },
        })
    }

    fn logs(&self, id: &str) -> Result<Vec<u8>> {
        self.enter(Operation::Logs)?;
        self.state
            .lock()
            .find(id)
            .map(|c| c.logs.clone())
            .ok_or_else(|| DyError::ContainerNotFound(id.to_string()))
    }

    fn list_by_label(&self, label_filter: &str) -> Result<Vec<String>> {
        self.enter(Operation::List)?;
        let (key, value) = label_filter
            .split_once('=')
            .unwrap_or((label_filter, ""));

        Ok(self
            .state
            .lock()
            .containers
            .iter()
            .filter(|c| match c.labels.get(key) {
                Some(actual) => value.is_empty() || actual == value,
                None => false,
            })
            .map(|c| c.id.clone())
            .collect())
    }

    fn host(&self) -> String {
        self.host.clone()
    }
}
