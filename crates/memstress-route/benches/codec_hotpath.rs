use std::net::Ipv4Addr;

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use memstress_route::test_util::FakeKernel;
use memstress_route::wire::{RouteFlags, RouteMetrics, RoutingMessage};
use memstress_route::{Address, AddressSlotTable, Operation, Role, RoutingSession};

fn host_route() -> AddressSlotTable {
    let mut slots = AddressSlotTable::new();
    slots.set(Role::Dst, Address::V4(Ipv4Addr::new(10, 0, 0, 5)));
    slots.set(Role::Gateway, Address::V4(Ipv4Addr::new(1, 0, 0, 1)));
    slots
}

/// Benchmark request encoding and reply decoding.
fn bench_codec(c: &mut Criterion) {
    let msg = RoutingMessage::request(
        Operation::Add,
        RouteFlags::HOST_VIA_GATEWAY,
        1,
        host_route(),
        RouteMetrics::default(),
        0,
    );
    let mut encoded = BytesMut::new();
    msg.encode(&mut encoded);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encode_host_route", |b| {
        let mut buf = BytesMut::with_capacity(512);
        b.iter(|| {
            buf.clear();
            black_box(&msg).encode(&mut buf);
        });
    });

    group.bench_function("decode_host_route", |b| {
        b.iter(|| RoutingMessage::decode(black_box(&encoded)).unwrap());
    });

    group.finish();
}

/// Benchmark a full add/delete cycle against the in-memory kernel.
fn bench_session(c: &mut Criterion) {
    let mut session = RoutingSession::with_transport(FakeKernel::new(), 0).unwrap();
    let dest = Address::V4(Ipv4Addr::new(10, 0, 0, 5));
    let gateway = Address::V4(Ipv4Addr::new(1, 0, 0, 1));

    let mut group = c.benchmark_group("session");
    group.throughput(Throughput::Elements(2));
    group.bench_function("add_delete", |b| {
        b.iter(|| {
            session.add(black_box(&dest), &gateway).unwrap();
            session.delete(black_box(&dest)).unwrap();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_codec, bench_session);
criterion_main!(benches);
