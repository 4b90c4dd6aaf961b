// Container builder and start orchestration
// Reuse lookup, create with retry, name-conflict recovery, skip on infra failure

use crate::availability;
use crate::context::Dockyard;
use crate::docker::StartedContainer;
use crate::errors::{DyError, Result};
use crate::harness::Harness;
use crate::ports::{
    ContainerPort, FixedPortSequence, IntoContainerPort, IntoHostPort, PortAllocator,
};
use crate::reuse::{self, ReuseOptions};
use crate::spec::{ContainerSpec, CreateRequest, Mount, PortBinding};
use crate::wait::{WaitForExec, WaitForLog, WaitForPort, WaitStrategy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Docker messages that no amount of retrying will fix
const PERMANENT_CREATE_MARKERS: &[&str] = &[
    "pull access denied",
    "manifest unknown",
    "invalid reference format",
    "no such image",
    "failed to parse port bindings",
];

/// One recorded configuration call, replayed onto a fresh spec when the
/// image changes.
#[derive(Debug, Clone)]
pub enum BuildStep {
    Ports {
        bindings: Vec<PortBinding>,
        auto_allocated: bool,
    },
    Env(BTreeMap<String, String>),
    Labels(BTreeMap<String, String>),
    Volume(Mount),
    Command(Vec<String>),
    Entrypoint(String),
    Wait(Arc<dyn WaitStrategy>),
}

impl BuildStep {
    pub fn apply(&self, spec: &mut ContainerSpec) {
        match self {
            BuildStep::Ports {
                bindings,
                auto_allocated,
            } => {
                spec.exposed_ports = bindings.iter().map(|b| b.container).collect();
                spec.port_bindings = bindings.clone();
                spec.ports_auto_allocated = *auto_allocated;
            }
            BuildStep::Env(vars) => spec.env.extend(vars.clone()),
            BuildStep::Labels(labels) => spec.labels.extend(labels.clone()),
            BuildStep::Volume(mount) => spec.mounts.push(mount.clone()),
            BuildStep::Command(command) => spec.command = Some(command.clone()),
            BuildStep::Entrypoint(entrypoint) => spec.entrypoint = Some(entrypoint.clone()),
            BuildStep::Wait(wait) => spec.waits.push(wait.clone()),
        }
    }
}

/// Terminal state reached by a successful start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A running reusable container was found
    Reused,
    /// A new container was created
    Created,
    /// Creation hit a name conflict and the competing container became ready
    ReusedAfterConflict,
    /// Creation hit a name conflict, nothing became ready, and a retry succeeded
    CreatedAfterConflict,
}

#[derive(Debug)]
pub struct Started {
    pub container: StartedContainer,
    pub outcome: StartOutcome,
}

/// Fluent container configuration followed by `start`
pub struct ContainerBuilder<'h> {
    context: Dockyard,
    harness: &'h dyn Harness,
    spec: ContainerSpec,
    steps: Vec<BuildStep>,
    reuse: Option<ReuseOptions>,
}

impl<'h> ContainerBuilder<'h> {
    pub fn new(context: Dockyard, image: impl Into<String>, harness: &'h dyn Harness) -> Self {
        Self {
            context,
            harness,
            spec: ContainerSpec::new(image),
            steps: Vec::new(),
            reuse: None,
        }
    }

    fn record(mut self, step: BuildStep) -> Self {
        step.apply(&mut self.spec);
        self.steps.push(step);
        self
    }

    /// Expose container ports on host ports chosen by the context's allocator
    pub fn ports<I, P>(self, ports: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: IntoContainerPort,
    {
        let container_ports = ports
            .into_iter()
            .map(IntoContainerPort::into_container_port)
            .collect::<Result<Vec<_>>>()?;

        let allocator = self.context.allocator();
        let host_ports = container_ports
            .iter()
            .map(|port| allocator.allocate_for_container_port(port))
            .collect::<Result<Vec<_>>>()?;

        let bindings = bind_in_sequence(&container_ports, host_ports)?;
        Ok(self.record(BuildStep::Ports {
            bindings,
            auto_allocated: true,
        }))
    }

    /// Expose container ports on explicit host ports
    pub fn port_mappings<I, C, H>(self, mappings: I) -> Result<Self>
    where
        I: IntoIterator<Item = (C, H)>,
        C: IntoContainerPort,
        H: IntoHostPort,
    {
        let mut container_ports = Vec::new();
        let mut host_ports = Vec::new();
        for (container_port, host_port) in mappings {
            let container_port = container_port.into_container_port()?;
            host_ports.push(host_port.into_host_port(&container_port)?);
            container_ports.push(container_port);
        }

        let bindings = bind_in_sequence(&container_ports, host_ports)?;
        Ok(self.record(BuildStep::Ports {
            bindings,
            auto_allocated: false,
        }))
    }

    pub fn env<K, V>(self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.record(BuildStep::Env(vars))
    }

    pub fn labels<K, V>(self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.record(BuildStep::Labels(labels))
    }

    pub fn volume(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.record(BuildStep::Volume(Mount {
            source: source.into(),
            target: target.into(),
        }))
    }

    pub fn command<I, S>(self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record(BuildStep::Command(
            command.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn entrypoint(self, entrypoint: impl Into<String>) -> Self {
        self.record(BuildStep::Entrypoint(entrypoint.into()))
    }

    /// Keep the container across tests and runs under `name`, optionally one
    /// instance per parallel worker. Can be set once.
    pub fn reuse(mut self, name: impl Into<String>, per_worker: bool) -> Result<Self> {
        if let Some(existing) = &self.reuse {
            return Err(DyError::ConfigError(format!(
                "Reuse is already configured as '{}'",
                existing.name
            )));
        }
        self.reuse = Some(ReuseOptions::new(name, per_worker)?);
        Ok(self)
    }

    pub fn wait_for(self, strategy: impl WaitStrategy + 'static) -> Self {
        self.record(BuildStep::Wait(Arc::new(strategy)))
    }

    /// Wait for a TCP port; `None` waits on the first exposed port
    pub fn wait_for_port(self, port: Option<ContainerPort>) -> Self {
        let wait = WaitForPort::first_exposed();
        self.wait_for(match port {
            Some(port) => wait.on_port(port),
            None => wait,
        })
    }

    pub fn wait_for_log(self, message: impl Into<String>) -> Self {
        self.wait_for(WaitForLog::new(message))
    }

    pub fn wait_for_command<I, S>(self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wait_for(WaitForExec::new(command))
    }

    /// Readiness probe run inside the container until it exits 0
    pub fn healthcheck<I, S>(self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wait_for_command(command)
    }

    /// Swap the image and replay every recorded configuration step
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        let mut spec = ContainerSpec::new(image);
        for step in &self.steps {
            step.apply(&mut spec);
        }
        self.spec = spec;
        self
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    /// Final reuse container name, if reuse was configured
    pub fn configured_reuse_name(&self) -> Option<String> {
        let config = self.context.config();
        self.reuse
            .as_ref()
            .map(|options| options.resolve_name(&config.worker.keys, self.context.env()))
    }

    /// Start the container. Infrastructure failures skip the test through the
    /// harness; only local usage errors come back as `Err`.
    pub fn start(&self) -> Result<StartedContainer> {
        match self.start_or_skip()? {
            Ok(container) => Ok(container),
            Err(message) => self.harness.skip(&message),
        }
    }

    /// Like `start`, but hands infrastructure failures back as `Ok(None)`
    /// instead of going through `Harness::skip`.
    ///
    /// `ContainerRegistry::skip` panics, which libtest reports as a failure.
    /// Tests that must pass without a daemon can return early on `None`.
    pub fn start_if_available(&self) -> Result<Option<StartedContainer>> {
        Ok(self.start_or_skip()?.ok())
    }

    /// Started container, or the skip message for an infrastructure failure
    fn start_or_skip(&self) -> Result<std::result::Result<StartedContainer, String>> {
        match self.try_start() {
            Ok(started) => Ok(Ok(started.container)),
            Err(e) if is_fatal_local_error(&e) => Err(e),
            Err(e) => {
                let message = availability::skip_message(&e);
                tracing::warn!(image = %self.spec.image, %message, "container start failed");
                Ok(Err(message))
            }
        }
    }

    /// Start the container and report which path produced it
    pub fn try_start(&self) -> Result<Started> {
        self.context.ensure_shutdown_sweep();
        let reuse_name = self.configured_reuse_name();

        if let Some(name) = &reuse_name {
            if let Some(container) = self.context.resolver().resolve_running(name)? {
                tracing::info!(name = %name, id = %container.id(), "reusing running container");
                return Ok(self.finish(container, StartOutcome::Reused));
            }
        }

        let error = match self.create_with_retry(reuse_name.as_deref()) {
            Ok(container) => return Ok(self.finish(container, StartOutcome::Created)),
            Err(e) => e,
        };

        let Some(name) = reuse_name.filter(|_| reuse::is_name_conflict(&error)) else {
            return Err(error);
        };

        tracing::info!(name = %name, "container name taken, waiting for the other creator");
        if let Some(container) = self.context.resolver().wait_until_running(&name) {
            return Ok(self.finish(container, StartOutcome::ReusedAfterConflict));
        }

        let container = self.create_with_retry(Some(&name))?;
        Ok(self.finish(container, StartOutcome::CreatedAfterConflict))
    }

    fn finish(&self, container: StartedContainer, outcome: StartOutcome) -> Started {
        if self.reuse.is_some() {
            container.set_skip_auto_cleanup(true);
        }
        Started {
            container: self.harness.register(container),
            outcome,
        }
    }

    fn create_with_retry(&self, name: Option<&str>) -> Result<StartedContainer> {
        let config = self.context.config();
        let policy = config.retry.create_policy();
        let mut bindings = self.spec.port_bindings.clone();
        let mut redraw_ports = false;

        policy.run(
            self.context.clock().as_ref(),
            "container create",
            |attempt| {
                if redraw_ports {
                    bindings = self.redraw_ports(&bindings)?;
                    redraw_ports = false;
                }

                tracing::debug!(image = %self.spec.image, attempt, "creating container");
                let result = self.create_once(name, &bindings);
                if self.spec.ports_auto_allocated && matches!(result, Err(DyError::PortConflict(_))) {
                    redraw_ports = true;
                }
                result
            },
            is_transient_create_error,
        )
    }

    fn redraw_ports(&self, bindings: &[PortBinding]) -> Result<Vec<PortBinding>> {
        let allocator = self.context.allocator();
        bindings
            .iter()
            .map(|binding| {
                Ok(PortBinding {
                    container: binding.container,
                    host: allocator.allocate_for_container_port(&binding.container)?,
                })
            })
            .collect()
    }

    fn create_request(&self, name: Option<&str>, bindings: &[PortBinding]) -> CreateRequest {
        let mut request = self.spec.create_request(bindings.to_vec());
        request.name = name.map(str::to_string).or(request.name);

        // reusable containers outlive the process and must escape the exit sweep
        if name.is_none() {
            request
                .labels
                .insert(self.context.config().cleanup.managed_label.clone(), "1".to_string());
        }
        request
    }

    /// One create, start and readiness attempt; a failed attempt removes the
    /// partial container before reporting the error.
    fn create_once(&self, name: Option<&str>, bindings: &[PortBinding]) -> Result<StartedContainer> {
        let engine = self.context.engine();
        let request = self.create_request(name, bindings);
        let id = engine.create(&request)?;

        let container = StartedContainer::new(
            id.clone(),
            request.name.clone().unwrap_or_else(|| short_id(&id)),
            engine.clone(),
            self.context.clock().clone(),
            self.spec.exposed_ports.clone(),
        );

        let ready = engine.start(&id).and_then(|()| {
            self.spec
                .waits
                .iter()
                .try_for_each(|wait| wait.wait_until_ready(&container))
        });

        match ready {
            Ok(()) => {
                tracing::info!(image = %self.spec.image, id = %short_id(&id), "container started");
                Ok(container)
            }
            Err(e) => {
                if let Err(remove_error) = engine.remove(&id, true) {
                    tracing::debug!(id = %id, error = %remove_error, "could not remove partial container");
                }
                Err(e)
            }
        }
    }
}

/// Pair container ports with host ports through a cycling fixed sequence
fn bind_in_sequence(container_ports: &[ContainerPort], host_ports: Vec<u16>) -> Result<Vec<PortBinding>> {
    let sequence = FixedPortSequence::new(host_ports)?;
    container_ports
        .iter()
        .map(|container_port| {
            Ok(PortBinding {
                container: *container_port,
                host: sequence.allocate_for_container_port(container_port)?,
            })
        })
        .collect()
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

/// Failures worth another create attempt
pub fn is_transient_create_error(error: &DyError) -> bool {
    match error {
        DyError::PortConflict(_)
        | DyError::ContainerNotFound(_)
        | DyError::PortsNotPublished(_)
        | DyError::NoHostPortLeft => true,
        DyError::DockerError(message) | DyError::CommandFailed(message) => {
            let lower = message.to_lowercase();
            !availability::is_docker_unavailable(error)
                && !PERMANENT_CREATE_MARKERS
                    .iter()
                    .any(|marker| lower.contains(marker))
        }
        DyError::Io(_) => !availability::is_docker_unavailable(error),
        _ => false,
    }
}

/// Usage and resource-exhaustion bugs that must fail loudly instead of skipping
pub fn is_fatal_local_error(error: &DyError) -> bool {
    matches!(
        error,
        DyError::WorkerRangeExhausted { .. }
            | DyError::ExitCodeUnavailable
            | DyError::ConnectionNameNotInitialized
            | DyError::ConfigError(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::harness::ContainerRegistry;
    use crate::worker::StaticEnv;

    fn context() -> Dockyard {
        use crate::clock::test_support::FakeClock;
        use crate::docker::MemoryEngine;

        let mut config = Config::default();
        config.cleanup.sweep_on_exit = false;
        Dockyard::with_parts(
            Arc::new(MemoryEngine::new()),
            config,
            Arc::new(StaticEnv::new(&[])),
            Arc::new(FakeClock::new()),
        )
        .unwrap()
        .with_allocator(Arc::new(FixedPortSequence::new(vec![31000, 31001]).unwrap()))
    }

    #[test]
    fn test_ports_use_allocator() {
        let registry = ContainerRegistry::new();
        let builder = context()
            .container("redis:7", &registry)
            .ports(["6379", "6380/udp"])
            .unwrap();

        let spec = builder.spec();
        assert_eq!(spec.exposed_ports, vec![ContainerPort::tcp(6379), ContainerPort::udp(6380)]);
        assert_eq!(
            spec.port_bindings.iter().map(|b| b.host).collect::<Vec<_>>(),
            vec![31000, 31001]
        );
        assert!(spec.ports_auto_allocated);
    }

    #[test]
    fn test_port_mappings_validate_host_ports() {
        let registry = ContainerRegistry::new();
        let builder = context()
            .container("postgres:16", &registry)
            .port_mappings([("5432", "15432")])
            .unwrap();
        assert_eq!(builder.spec().port_bindings[0].host, 15432);
        assert!(!builder.spec().ports_auto_allocated);

        let err = context()
            .container("postgres:16", &registry)
            .port_mappings([("5432", "15k")])
            .err()
            .unwrap();
        assert!(err.to_string().contains("Host port must be an integer"));

        let empty: Vec<(&str, u16)> = Vec::new();
        let err = context()
            .container("postgres:16", &registry)
            .port_mappings(empty)
            .err()
            .unwrap();
        assert!(err.to_string().contains("at least one host port"));
    }

    #[test]
    fn test_reuse_validation() {
        let registry = ContainerRegistry::new();
        assert!(context().container("x", &registry).reuse("", false).is_err());

        let builder = context().container("x", &registry).reuse("cache", false).unwrap();
        assert_eq!(builder.configured_reuse_name().as_deref(), Some("cache"));
        assert!(builder.reuse("other", false).is_err());
    }

    #[test]
    fn test_with_image_replays_steps() {
        let registry = ContainerRegistry::new();
        let builder = context()
            .container("mysql:8", &registry)
            .port_mappings([("3306", 13306)])
            .unwrap()
            .env([("MYSQL_ROOT_PASSWORD", "secret")])
            .labels([("team", "core")])
            .volume("/tmp/init", "/docker-entrypoint-initdb.d")
            .command(["--default-authentication-plugin=mysql_native_password"])
            .wait_for_log("ready for connections")
            .with_image("mariadb:11");

        let spec = builder.spec();
        assert_eq!(spec.image, "mariadb:11");
        assert_eq!(spec.port_bindings[0].host, 13306);
        assert_eq!(spec.env["MYSQL_ROOT_PASSWORD"], "secret");
        assert_eq!(spec.labels["team"], "core");
        assert_eq!(spec.mounts.len(), 1);
        assert_eq!(spec.waits.len(), 1);
        assert_eq!(builder.steps().len(), 6);
    }

    #[test]
    fn test_transient_create_classification() {
        assert!(is_transient_create_error(&DyError::PortConflict("taken".to_string())));
        assert!(is_transient_create_error(&DyError::DockerError("i/o timeout".to_string())));
        assert!(!is_transient_create_error(&DyError::DockerError(
            "pull access denied for nope".to_string()
        )));
        assert!(!is_transient_create_error(&DyError::DockerError(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock".to_string()
        )));
        assert!(!is_transient_create_error(&DyError::NameConflict {
            name: "pg".to_string(),
            message: "taken".to_string(),
        }));
    }
}
