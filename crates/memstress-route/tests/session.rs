//! # Integration tests: RoutingSession ↔ kernel through the wire format
//!
//! The "kernel" is [`FakeKernel`], which decodes each request off the wire
//! and keeps its own host route table.

use std::net::Ipv4Addr;

use memstress_route::test_util::FakeKernel;
use memstress_route::wire::Operation;
use memstress_route::{parse_ipv4, parse_ipv6, Address, Role, RouteError, RoutingSession};

fn open(kernel: &FakeKernel) -> RoutingSession<FakeKernel> {
    RoutingSession::with_transport(kernel.clone(), 0).expect("session opens")
}

#[test]
fn add_then_delete_host_route() {
    let kernel = FakeKernel::strict();
    let mut session = open(&kernel);
    let dest = parse_ipv4("10.0.0.5").unwrap();
    let gateway = parse_ipv4("1.0.0.1").unwrap();

    session.add(&dest, &gateway).unwrap();
    assert_eq!(session.last_error(), None);
    assert_eq!(kernel.state().routes.get(&dest), Some(&Some(gateway.clone())));

    session.delete(&dest).unwrap();
    assert_eq!(session.last_error(), None);
    assert!(kernel.state().routes.is_empty());
}

#[test]
fn change_then_lookup_reports_new_gateway() {
    let kernel = FakeKernel::strict();
    let mut session = open(&kernel);
    let dest = parse_ipv4("10.0.1.2").unwrap();

    session.add(&dest, &parse_ipv4("1.0.0.1").unwrap()).unwrap();
    session.change(&dest, &parse_ipv4("1.0.0.2").unwrap()).unwrap();

    let reply = session.get(&dest).unwrap();
    assert_eq!(reply.address(Role::Dst), Some(&dest));
    assert_eq!(
        reply.address(Role::Gateway),
        Some(&Address::V4(Ipv4Addr::new(1, 0, 0, 2)))
    );
    assert_eq!(kernel.state().count(Operation::Change), 1);
}

#[test]
fn duplicate_add_fails_with_eexist() {
    let kernel = FakeKernel::strict();
    let mut session = open(&kernel);
    let dest = parse_ipv4("10.0.0.5").unwrap();
    let gateway = parse_ipv4("1.0.0.1").unwrap();

    session.add(&dest, &gateway).unwrap();
    let err = session.add(&dest, &gateway).unwrap_err();

    assert!(matches!(err, RouteError::Transport { op: Operation::Add, .. }));
    assert_eq!(session.last_error(), Some(libc::EEXIST));
}

#[test]
fn delete_of_missing_route_fails_with_esrch() {
    let kernel = FakeKernel::strict();
    let mut session = open(&kernel);

    session.delete(&parse_ipv4("10.0.0.9").unwrap()).unwrap_err();
    assert_eq!(session.last_error(), Some(libc::ESRCH));
}

#[test]
fn ipv6_host_route() {
    let kernel = FakeKernel::strict();
    let mut session = open(&kernel);
    let dest = parse_ipv6("2001:db8::5").unwrap();
    let gateway = parse_ipv6("fe80::1").unwrap();

    session.add(&dest, &gateway).unwrap();
    let reply = session.get(&dest).unwrap();
    assert_eq!(reply.address(Role::Gateway), Some(&gateway));
    session.delete(&dest).unwrap();
    assert!(kernel.state().routes.is_empty());
}

#[test]
fn session_binds_requested_fib() {
    let kernel = FakeKernel::new();
    let mut session = RoutingSession::with_transport(kernel.clone(), 2).unwrap();
    assert_eq!(kernel.state().fib, 2);

    session.set_fib(5).unwrap();
    assert_eq!(kernel.state().fib, 5);
    assert_eq!(session.fib(), 5);
}
