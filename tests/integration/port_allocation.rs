use crate::common::TestFixture;
use dockyard::docker::memory::Operation;
use dockyard::ports::{
    AssignedPorts, ContainerPort, FixedPortSequence, PortAllocator, RandomUniquePortAllocator,
    WorkerPortSequence,
};
use dockyard::DyError;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[test]
fn test_random_ports_are_distinct_and_in_range() {
    let allocator = RandomUniquePortAllocator::with_registry(AssignedPorts::new());
    let mut seen = HashSet::new();

    for _ in 0..50 {
        let port = allocator
            .allocate_for_container_port(&ContainerPort::tcp(8080))
            .unwrap();
        assert!(port >= 10000);
        assert!(seen.insert(port), "port {} handed out twice", port);
    }
    assert_eq!(allocator.registry().len(), 50);
}

#[test]
fn test_concurrent_allocations_never_collide() {
    let allocator = Arc::new(RandomUniquePortAllocator::with_registry(AssignedPorts::new()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let allocator = allocator.clone();
            thread::spawn(move || {
                (0..10)
                    .map(|_| {
                        allocator
                            .allocate_for_container_port(&ContainerPort::udp(53))
                            .unwrap()
                    })
                    .collect::<Vec<u16>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for port in handle.join().unwrap() {
            assert!(all.insert(port), "port {} handed out twice", port);
        }
    }
    assert_eq!(all.len(), 80);
}

#[test]
fn test_fixed_sequence_cycles() {
    let sequence = FixedPortSequence::new(vec![15432, 15433]).unwrap();
    let port = ContainerPort::tcp(5432);

    let drawn: Vec<u16> = (0..4)
        .map(|_| sequence.allocate_for_container_port(&port).unwrap())
        .collect();
    assert_eq!(drawn, vec![15432, 15433, 15432, 15433]);

    assert!(matches!(
        FixedPortSequence::new(Vec::new()),
        Err(DyError::ConfigError(_))
    ));
}

#[test]
fn test_worker_ranges_do_not_overlap() {
    let first = WorkerPortSequence::for_worker(0).unwrap();
    let second = WorkerPortSequence::for_worker(1).unwrap();

    assert_eq!((first.base_port(), first.range_end()), (49152, 49251));
    assert_eq!((second.base_port(), second.range_end()), (49252, 49351));
    assert_eq!(second.next_port().unwrap(), 49252);
    assert_eq!(second.next_port().unwrap(), 49253);

    // The last worker whose range still fits below 65535
    assert!(WorkerPortSequence::for_worker(162).is_ok());
    assert!(WorkerPortSequence::for_worker(163).is_err());
}

#[test]
fn test_worker_range_exhaustion_is_fatal() {
    let fixture = TestFixture::new();
    let allocator = Arc::new(dockyard::ports::WorkerPortAllocator::new(
        WorkerPortSequence::for_worker(2).unwrap(),
    ));
    for _ in 0..100 {
        allocator
            .allocate_for_container_port(&ContainerPort::tcp(80))
            .unwrap();
    }

    let context = fixture.context.clone().with_allocator(allocator);
    let result = context.container("nginx:alpine", &fixture.registry).ports([80u16]);

    assert!(matches!(
        result,
        Err(DyError::WorkerRangeExhausted {
            used: 100,
            start: 49352,
            end: 49451
        })
    ));
}

#[test]
fn test_mapped_port_waits_for_publication() {
    let fixture = TestFixture::new();
    let container = fixture
        .context
        .container("nginx:alpine", &fixture.registry)
        .ports([80u16])
        .unwrap()
        .start()
        .unwrap();
    let expected = container.lookup_mapped_port(&ContainerPort::tcp(80)).unwrap();

    let name = container.name().to_string();
    for _ in 0..2 {
        let name = name.clone();
        fixture
            .engine
            .fail_next(Operation::Inspect, move || DyError::PortsNotPublished(name));
    }

    let before = fixture.engine.calls(Operation::Inspect);
    assert_eq!(container.mapped_port(80u16).unwrap(), expected);
    assert_eq!(fixture.engine.calls(Operation::Inspect) - before, 3);
}

#[test]
fn test_unexposed_port_fails_without_retry() {
    let fixture = TestFixture::new();
    let container = fixture
        .context
        .container("nginx:alpine", &fixture.registry)
        .ports([80u16])
        .unwrap()
        .start()
        .unwrap();

    let before = fixture.engine.calls(Operation::Inspect);
    assert!(matches!(
        container.mapped_port("443/tcp"),
        Err(DyError::PortNotExposed { .. })
    ));
    assert_eq!(fixture.engine.calls(Operation::Inspect) - before, 1);
}

#[test]
fn test_each_container_gets_its_own_host_ports() {
    let fixture = TestFixture::new();
    let mut seen = HashSet::new();

    for _ in 0..3 {
        let container = fixture
            .context
            .container("postgres:16-alpine", &fixture.registry)
            .ports(["5432", "9187"])
            .unwrap()
            .start()
            .unwrap();
        assert!(seen.insert(container.mapped_port("5432").unwrap()));
        assert!(seen.insert(container.mapped_port("9187").unwrap()));
    }
}
