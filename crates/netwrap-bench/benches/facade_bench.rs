//! Per-call cost of the routing facade: a fast-path round trip over the
//! loopback stack against a kernel pipe round trip.

use std::ffi::c_int;
use std::ptr;

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use netwrap_abi::{DirectLibc, Netwrap};
use netwrap_core::loopback::LoopbackStack;
use netwrap_runtime::{ProcessState, ShimCounters};

const OFFSET: u32 = 512;
const MSG: &[u8] = &[0x5A; 64];

fn connected(nw: &Netwrap<'_, DirectLibc>) -> (c_int, c_int) {
    let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = 9999u16.to_be();
    sa.sin_addr.s_addr = u32::from_ne_bytes([127, 0, 0, 1]);
    let addr = ptr::from_ref(&sa).cast();
    let len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
    unsafe {
        let l = nw.socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        assert_eq!(nw.bind(l, addr, len), 0);
        assert_eq!(nw.listen(l, 1), 0);
        let c = nw.socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        assert_eq!(nw.connect(c, addr, len), 0);
        (c, nw.accept(l, ptr::null_mut(), ptr::null_mut()))
    }
}

fn round_trip(nw: &Netwrap<'_, DirectLibc>, tx: c_int, rx: c_int, buf: &mut [u8]) {
    unsafe {
        let sent = nw.write(tx, MSG.as_ptr().cast(), MSG.len());
        let got = nw.read(rx, buf.as_mut_ptr().cast(), buf.len());
        black_box((sent, got));
    }
}

fn bench_round_trip(c: &mut Criterion) {
    let stack = LoopbackStack::new(OFFSET);
    let state = ProcessState::new();
    state.initialize(|| Ok(Some(OFFSET))).unwrap();
    let counters = ShimCounters::new();
    let nw = Netwrap::new(&DirectLibc, &state)
        .with_stack(&stack)
        .with_counters(&counters);
    let mut buf = [0u8; 64];

    let mut group = c.benchmark_group("round_trip_64B");
    group.throughput(Throughput::Bytes(MSG.len() as u64));

    let (tx, rx) = connected(&nw);
    group.bench_function("fast_path", |b| b.iter(|| round_trip(&nw, tx, rx, &mut buf)));

    let mut fds = [0 as c_int; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    group.bench_function("kernel_pipe", |b| {
        b.iter(|| round_trip(&nw, fds[1], fds[0], &mut buf));
    });
    group.finish();

    unsafe {
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
