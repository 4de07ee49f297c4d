//! Constant, flag and address translation on the fast path.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use netwrap_core::sockaddr::SockAddr;
use netwrap_core::socket::{AF_INET6, MSG_DONTWAIT, MSG_NOSIGNAL, MSG_PEEK, SOCK_NONBLOCK, SOCK_STREAM};
use netwrap_core::translate;

fn v6_bytes() -> [u8; 28] {
    let sa = SockAddr::V6 {
        port: 8443,
        flowinfo: 0,
        addr: std::net::Ipv6Addr::LOCALHOST.octets(),
        scope_id: 0,
    };
    let mut raw = [0u8; 28];
    sa.encode_host(&mut raw);
    raw
}

fn bench_constants(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate");
    group.bench_function("socket_request", |b| {
        b.iter(|| {
            black_box(translate::socket_request(
                black_box(AF_INET6),
                black_box(SOCK_STREAM | SOCK_NONBLOCK),
                0,
            ))
        });
    });
    group.bench_function("msg_flags", |b| {
        b.iter(|| black_box(translate::msg_flags(black_box(MSG_PEEK | MSG_DONTWAIT | MSG_NOSIGNAL))));
    });
    group.bench_function("sockopt", |b| {
        b.iter(|| black_box(translate::sockopt(black_box(1), black_box(2))));
    });
    group.finish();
}

fn bench_sockaddr(c: &mut Criterion) {
    let raw = v6_bytes();
    let decoded = SockAddr::decode_host(&raw).unwrap();
    let mut group = c.benchmark_group("sockaddr");
    group.bench_function("decode_v6", |b| {
        b.iter(|| black_box(SockAddr::decode_host(black_box(&raw))));
    });
    group.bench_function("encode_v6_truncated", |b| {
        let mut out = [0u8; 16];
        b.iter(|| black_box(decoded.encode_host(black_box(&mut out))));
    });
    group.finish();
}

criterion_group!(benches, bench_constants, bench_sockaddr);
criterion_main!(benches);
