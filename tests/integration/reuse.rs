use crate::common::TestFixture;
use dockyard::docker::memory::Operation;
use dockyard::docker::MemoryEngine;
use dockyard::{ContainerEngine, DyError, StartOutcome};
use std::sync::Arc;

#[test]
fn test_reuse_returns_the_same_container() {
    let fixture = TestFixture::new();
    let start = || {
        fixture
            .context
            .container("redis:7-alpine", &fixture.registry)
            .reuse("shared-redis", false)
            .unwrap()
            .try_start()
            .unwrap()
    };

    let first = start();
    let second = start();

    assert_eq!(first.outcome, StartOutcome::Created);
    assert_eq!(second.outcome, StartOutcome::Reused);
    assert_eq!(first.container.id(), second.container.id());
    assert!(first.container.skip_auto_cleanup());
    assert!(second.container.skip_auto_cleanup());
    assert_eq!(fixture.engine.container_count(), 1);

    // Explicit stop still removes the shared container
    first.container.stop().unwrap();
    assert!(!fixture.engine.exists("shared-redis"));
}

#[test]
fn test_per_worker_names_are_isolated() {
    let engine = Arc::new(MemoryEngine::new());
    let alpha = TestFixture::sharing(engine.clone(), &[("TEST_WORKER", "alpha")]);
    let beta = TestFixture::sharing(engine.clone(), &[("TEST_WORKER", "beta")]);

    let from_alpha = alpha
        .context
        .container("postgres:16-alpine", &alpha.registry)
        .reuse("pg", true)
        .unwrap()
        .start()
        .unwrap();
    let from_beta = beta
        .context
        .container("postgres:16-alpine", &beta.registry)
        .reuse("pg", true)
        .unwrap()
        .start()
        .unwrap();

    assert_eq!(from_alpha.name(), "pg-worker-alpha");
    assert_eq!(from_beta.name(), "pg-worker-beta");
    assert_ne!(from_alpha.id(), from_beta.id());
    assert_eq!(engine.container_count(), 2);
}

#[test]
fn test_per_worker_without_token_uses_plain_name() {
    let fixture = TestFixture::new();
    let builder = fixture
        .context
        .container("postgres:16-alpine", &fixture.registry)
        .reuse("pg", true)
        .unwrap();

    assert_eq!(builder.configured_reuse_name().as_deref(), Some("pg"));
}

#[test]
fn test_stopped_reusable_container_is_restarted() {
    let fixture = TestFixture::new();
    let id = fixture.engine.seed("cache", false, &[]);

    let started = fixture
        .context
        .container("redis:7-alpine", &fixture.registry)
        .reuse("cache", false)
        .unwrap()
        .try_start()
        .unwrap();

    assert_eq!(started.outcome, StartOutcome::ReusedAfterConflict);
    assert_eq!(started.container.id(), id);
    assert!(fixture.engine.is_running(&id));
    assert_eq!(fixture.engine.container_count(), 1);
}

#[test]
fn test_losing_the_create_race_reuses_the_winner() {
    let fixture = TestFixture::new();
    // Another process creates the container between our lookup and our create
    fixture.engine.before_next(Operation::Create, |engine| {
        engine.seed("race", true, &[]);
        Ok(())
    });

    let started = fixture
        .context
        .container("redis:7-alpine", &fixture.registry)
        .reuse("race", false)
        .unwrap()
        .try_start()
        .unwrap();

    let winner = fixture.engine.inspect("race").unwrap().unwrap();
    assert_eq!(started.outcome, StartOutcome::ReusedAfterConflict);
    assert_eq!(started.container.id(), winner.id);
    assert_eq!(fixture.engine.container_count(), 1);
}

#[test]
fn test_vanished_competitor_is_recreated() {
    let fixture = TestFixture::new();
    fixture.engine.seed("flaky", false, &[]);

    // First lookup sees the stopped container, then it disappears for good
    fixture.engine.before_next(Operation::Inspect, |_| Ok(()));
    fixture.engine.before_next(Operation::Inspect, |engine| {
        engine.remove("flaky", true)?;
        Ok(())
    });

    let started = fixture
        .context
        .container("redis:7-alpine", &fixture.registry)
        .reuse("flaky", false)
        .unwrap()
        .try_start()
        .unwrap();

    assert_eq!(started.outcome, StartOutcome::CreatedAfterConflict);
    assert_eq!(started.container.name(), "flaky");
    assert_eq!(fixture.engine.calls(Operation::Create), 2);
    assert!(fixture.clock.slept() > std::time::Duration::ZERO);
}

#[test]
fn test_reused_containers_survive_registry_teardown() {
    let fixture = TestFixture::new();
    let container = fixture
        .context
        .container("redis:7-alpine", &fixture.registry)
        .reuse("long-lived", false)
        .unwrap()
        .start()
        .unwrap();

    assert!(!fixture.registry.tracks(&container));
    assert!(fixture.registry.is_empty());

    let TestFixture {
        engine, registry, ..
    } = fixture;
    drop(registry);
    assert!(engine.is_running(container.id()));
}

#[test]
fn test_exit_sweep_spares_reusable_containers() {
    let fixture = TestFixture::new();
    let reusable = fixture
        .context
        .container("redis:7-alpine", &fixture.registry)
        .reuse("kept", false)
        .unwrap()
        .start()
        .unwrap();
    fixture
        .context
        .container("alpine:3", &fixture.registry)
        .start()
        .unwrap();
    assert_eq!(fixture.engine.container_count(), 2);

    assert_eq!(fixture.context.shutdown_sweep().run(), 1);
    assert_eq!(fixture.engine.container_count(), 1);
    assert!(fixture.engine.exists(reusable.id()));
}

#[test]
fn test_reuse_twice_is_rejected() {
    let fixture = TestFixture::new();
    let result = fixture
        .context
        .container("redis:7-alpine", &fixture.registry)
        .reuse("a", false)
        .unwrap()
        .reuse("b", false);

    assert!(result.is_err());
}

#[test]
fn test_failed_recreate_after_conflict_skips() {
    let fixture = TestFixture::new();
    for _ in 0..2 {
        fixture.engine.fail_next(Operation::Create, || DyError::NameConflict {
            name: "contested".to_string(),
            message: "Conflict. The container name \"/contested\" is already in use".to_string(),
        });
    }

    let builder = fixture
        .context
        .container("redis:7-alpine", &fixture.registry)
        .reuse("contested", false)
        .unwrap();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = builder.start();
    }));

    let payload = outcome.unwrap_err();
    let message = payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(message.starts_with("test skipped: Container startup issue: NameConflict"));
    assert_eq!(fixture.engine.calls(Operation::Create), 2);
    assert_eq!(fixture.engine.container_count(), 0);
}
