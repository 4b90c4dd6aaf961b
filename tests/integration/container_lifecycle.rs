use crate::common::TestFixture;
use dockyard::docker::memory::Operation;
use dockyard::docker::ExecOutput;
use dockyard::wait::{WaitForLog, WaitTiming};
use dockyard::{ContainerEngine, DyError, Harness, StartOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_start_creates_managed_container() {
    let fixture = TestFixture::new();

    let container = fixture
        .context
        .container("redis:7-alpine", &fixture.registry)
        .ports(["6379"])
        .unwrap()
        .env([("REDIS_ARGS", "--appendonly no")])
        .start()
        .unwrap();

    assert!(fixture.engine.is_running(container.id()));
    assert!(!container.skip_auto_cleanup());
    assert!(fixture.registry.tracks(&container));

    // Non-reusable containers carry the managed label for the exit sweep
    let managed = fixture.engine.list_by_label("dockyard.managed=1").unwrap();
    assert_eq!(managed, vec![container.id().to_string()]);

    let port = container.mapped_port("6379/tcp").unwrap();
    assert!(port >= 10000);
}

#[test]
fn test_stop_twice_fires_callback_once() {
    let fixture = TestFixture::new();
    let container = fixture
        .context
        .container("nginx:alpine", &fixture.registry)
        .ports([80u16])
        .unwrap()
        .start()
        .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    container.on_stop(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    container.stop().unwrap();
    container.stop().unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.engine.container_count(), 0);
    assert!(fixture.registry.is_empty());
}

#[test]
fn test_registry_teardown_removes_containers() {
    let fixture = TestFixture::new();
    for image in ["alpine:3", "busybox:1"] {
        fixture
            .context
            .container(image, &fixture.registry)
            .command(["sleep", "infinity"])
            .start()
            .unwrap();
    }
    assert_eq!(fixture.engine.container_count(), 2);

    let TestFixture {
        engine, registry, ..
    } = fixture;
    drop(registry);
    assert_eq!(engine.container_count(), 0);
}

#[test]
fn test_create_retries_transient_failures() {
    let fixture = TestFixture::new();
    fixture.engine.fail_next(Operation::Create, || {
        DyError::DockerError("net/http: TLS handshake timeout".to_string())
    });
    fixture.engine.fail_next(Operation::Start, || {
        DyError::DockerError("OCI runtime create failed: context deadline exceeded".to_string())
    });

    let started = fixture
        .context
        .container("postgres:16-alpine", &fixture.registry)
        .ports(["5432"])
        .unwrap()
        .try_start()
        .unwrap();

    assert_eq!(started.outcome, StartOutcome::Created);
    assert_eq!(fixture.engine.calls(Operation::Create), 3);
    // The container whose start failed was removed before retrying
    assert_eq!(fixture.engine.calls(Operation::Remove), 1);
    assert_eq!(fixture.engine.container_count(), 1);
    assert!(fixture.clock.slept() > Duration::ZERO);
}

#[test]
fn test_port_conflict_redraws_allocated_ports() {
    let fixture = TestFixture::new();
    let builder = fixture
        .context
        .container("mysql:8", &fixture.registry)
        .ports(["3306"])
        .unwrap();
    let first_choice = builder.spec().port_bindings[0].host;

    fixture.engine.fail_next(Operation::Start, move || {
        DyError::PortConflict(format!(
            "Bind for 0.0.0.0:{} failed: port is already allocated",
            first_choice
        ))
    });

    let container = builder.start().unwrap();
    assert_ne!(container.mapped_port("3306").unwrap(), first_choice);
}

#[test]
fn test_explicit_ports_are_kept_on_conflict() {
    let fixture = TestFixture::new();
    fixture
        .engine
        .fail_next(Operation::Start, || DyError::PortConflict("port is already allocated".to_string()));

    let container = fixture
        .context
        .container("mysql:8", &fixture.registry)
        .port_mappings([("3306", "23306")])
        .unwrap()
        .start()
        .unwrap();

    assert_eq!(container.mapped_port("3306").unwrap(), 23306);
}

#[test]
fn test_wait_failure_removes_container() {
    let fixture = TestFixture::new();

    let result = fixture
        .context
        .container("app:latest", &fixture.registry)
        .wait_for(
            WaitForLog::new("never printed")
                .with_timing(WaitTiming::new(Duration::from_secs(1), Duration::from_millis(100))),
        )
        .try_start();

    assert!(matches!(result, Err(DyError::WaitTimeout { .. })));
    assert_eq!(fixture.engine.container_count(), 0);
    assert_eq!(fixture.engine.calls(Operation::Create), 1);
}

#[test]
fn test_exec_and_logs_through_handle() {
    let fixture = TestFixture::new();
    fixture.engine.on_exec(|_, command| ExecOutput {
        stdout: format!("ran {}\n", command.join(" ")).into_bytes(),
        stderr: Vec::new(),
        exit_code: Some(0),
    });

    let container = fixture
        .context
        .container("alpine:3", &fixture.registry)
        .healthcheck(["true"])
        .start()
        .unwrap();
    fixture.engine.append_log(container.id(), b"booted\n");

    let result = container.exec(["echo", "hi"]).unwrap();
    assert_eq!(result.command, vec!["echo", "hi"]);
    assert_eq!(result.output, "ran echo hi\n");
    assert!(result.successful());
    assert_eq!(container.logs().unwrap(), "booted\n");
}

#[test]
fn test_missing_exit_code_is_fatal() {
    let fixture = TestFixture::new();
    let container = fixture
        .context
        .container("alpine:3", &fixture.registry)
        .start()
        .unwrap();
    fixture.engine.on_exec(|_, _| ExecOutput::default());

    assert!(matches!(
        container.exec(["true"]),
        Err(DyError::ExitCodeUnavailable)
    ));
}

#[test]
#[should_panic(expected = "test skipped: Docker is unavailable for container test")]
fn test_unreachable_daemon_skips() {
    let fixture = TestFixture::new();
    fixture.engine.fail_next(Operation::Create, || {
        DyError::DockerError(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?"
                .to_string(),
        )
    });

    let _ = fixture
        .context
        .container("alpine:3", &fixture.registry)
        .start();
}

#[test]
fn test_exhausted_retries_report_full_chain() {
    let fixture = TestFixture::new();
    for _ in 0..6 {
        fixture
            .engine
            .fail_next(Operation::Create, || DyError::DockerError("i/o timeout".to_string()));
    }

    let err = fixture
        .context
        .container("alpine:3", &fixture.registry)
        .try_start()
        .unwrap_err();

    assert!(matches!(err, DyError::RetryExhausted { attempts: 6, .. }));
    let message = dockyard::availability::skip_message(&err);
    assert!(message.starts_with("Container startup issue: RetryExhausted"));
    assert!(message.contains("<- caused by DockerError: Docker error: i/o timeout"));
}

#[test]
fn test_skip_is_routed_through_harness() {
    struct RecordingHarness;

    impl Harness for RecordingHarness {
        fn register(&self, container: dockyard::StartedContainer) -> dockyard::StartedContainer {
            container
        }

        fn skip(&self, message: &str) -> ! {
            panic!("recorded skip: {}", message);
        }
    }

    let fixture = TestFixture::new();
    fixture.engine.fail_next(Operation::Create, || {
        DyError::DockerError("pull access denied for private/image".to_string())
    });

    let harness = RecordingHarness;
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = fixture.context.container("private/image", &harness).start();
    }));

    let payload = outcome.unwrap_err();
    let message = payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(message.starts_with("recorded skip: Container startup issue: DockerError"));
    assert_eq!(fixture.engine.calls(Operation::Create), 1);
}

#[test]
fn test_start_if_available_returns_none_without_daemon() {
    let fixture = TestFixture::new();
    fixture.engine.fail_next(Operation::Create, || {
        DyError::DockerError(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?"
                .to_string(),
        )
    });

    let started = fixture
        .context
        .container("alpine:3", &fixture.registry)
        .start_if_available()
        .unwrap();

    assert!(started.is_none());
    assert!(fixture.registry.is_empty());
}

#[test]
fn test_start_if_available_keeps_local_errors() {
    let fixture = TestFixture::new();
    fixture.engine.on_exec(|_, _| ExecOutput::default());

    let result = fixture
        .context
        .container("alpine:3", &fixture.registry)
        .healthcheck(["true"])
        .start_if_available();

    assert!(matches!(result, Err(DyError::ExitCodeUnavailable)));
    assert_eq!(fixture.engine.container_count(), 0);

    let container = fixture
        .context
        .container("alpine:3", &fixture.registry)
        .start_if_available()
        .unwrap();
    assert!(container.is_some());
}
