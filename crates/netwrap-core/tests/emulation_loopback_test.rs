//! Emulated writev/sendfile and the two-source wait driven through the
//! loopback stack.

#![cfg(feature = "loopback")]

use std::sync::Arc;
use std::time::{Duration, Instant};

use netwrap_core::emulate::{self, SourceFile};
use netwrap_core::fd::FdBitmap;
use netwrap_core::loopback::{LoopbackStack, Op};
use netwrap_core::ofp::{OFP_AF_INET, OFP_ECONNRESET, OFP_SOCK_STREAM};
use netwrap_core::sockaddr::SockAddr;
use netwrap_core::{FastPathFd, FastPathStack, NetError, errno};

const SLICE: Duration = Duration::from_millis(1);

fn connected(stack: &LoopbackStack, port: u16) -> (FastPathFd, FastPathFd) {
    let addr = SockAddr::V4 {
        port,
        addr: [127, 0, 0, 1],
    };
    let l = stack.socket(OFP_AF_INET, OFP_SOCK_STREAM, 0).unwrap();
    stack.bind(l, &addr).unwrap();
    stack.listen(l, 4).unwrap();
    let c = stack.socket(OFP_AF_INET, OFP_SOCK_STREAM, 0).unwrap();
    stack.connect(c, &addr).unwrap();
    let (s, _) = stack.accept(l).unwrap();
    (c, s)
}

fn drain(stack: &LoopbackStack, fd: FastPathFd) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    while let Ok(n) = stack.recv(fd, &mut buf, 0) {
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

struct Cursor {
    data: Vec<u8>,
    pos: i64,
}

impl SourceFile for Cursor {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, i32> {
        let start = usize::try_from(self.pos).map_err(|_| errno::EINVAL)?;
        let n = buf.len().min(self.data.len().saturating_sub(start));
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as i64;
        Ok(n)
    }
    fn position(&mut self) -> Result<i64, i32> {
        Ok(self.pos)
    }
    fn seek(&mut self, pos: i64) -> Result<(), i32> {
        if pos < 0 {
            return Err(errno::EINVAL);
        }
        self.pos = pos;
        Ok(())
    }
}

#[test]
fn writev_crosses_a_full_receive_buffer() {
    let stack = Arc::new(LoopbackStack::new(1000).with_rx_capacity(8));
    let (c, s) = connected(&stack, 5000);

    let reader = Arc::clone(&stack);
    let consumer = std::thread::spawn(move || {
        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while got.len() < 30 && Instant::now() < deadline {
            got.extend(drain(&reader, s));
            std::thread::sleep(Duration::from_millis(1));
        }
        got
    });

    let a = [b'a'; 10];
    let b = [b'b'; 20];
    let t = emulate::writev(stack.as_ref(), c, &[&a, &b], SLICE).unwrap();
    assert_eq!(t.bytes, 30);
    assert!(t.retries > 0);

    let got = consumer.join().unwrap();
    assert_eq!(&got[..10], &a);
    assert_eq!(&got[10..], &b);
}

#[test]
fn writev_failure_in_second_fragment_keeps_first_on_the_wire() {
    let stack = LoopbackStack::new(1000);
    let (c, s) = connected(&stack, 5001);
    stack.fail_nth(Op::Send, 2, OFP_ECONNRESET);

    let err = emulate::writev(&stack, c, &[b"first", b"second"], SLICE).unwrap_err();
    assert_eq!(err.host_errno(), errno::ECONNRESET);
    assert_eq!(drain(&stack, s), b"first");
}

#[test]
fn sendfile_copies_a_window_and_leaves_the_cursor() {
    let stack = LoopbackStack::new(1000);
    let (c, s) = connected(&stack, 5002);
    let mut file = Cursor {
        data: (0..=255u8).cycle().take(5000).collect(),
        pos: 123,
    };
    let mut offset = 1000i64;
    let t = emulate::sendfile(&stack, c, &mut file, Some(&mut offset), 2500, 512, SLICE).unwrap();
    assert_eq!(t.bytes, 2500);
    assert_eq!(offset, 3500);
    assert_eq!(file.pos, 123);
    assert_eq!(drain(&stack, s), &file.data[1000..3500]);
}

#[test]
fn sendfile_reports_a_bad_source_offset() {
    let stack = LoopbackStack::new(1000);
    let (c, _) = connected(&stack, 5003);
    let mut file = Cursor {
        data: vec![0; 16],
        pos: 0,
    };
    let mut offset = -4i64;
    let err = emulate::sendfile(&stack, c, &mut file, Some(&mut offset), 8, 512, SLICE)
        .unwrap_err();
    assert_eq!(err, NetError::Host(errno::EINVAL));
    assert_eq!(stack.calls(Op::Send), 0);
}

#[test]
fn two_source_wait_sees_late_fast_path_readiness() {
    let stack = Arc::new(LoopbackStack::new(1000));
    let (c, s) = connected(&stack, 5004);

    let writer = Arc::clone(&stack);
    let sender = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        writer.send(c, b"late", 0).unwrap();
    });

    let mut fast = || -> Result<usize, NetError> {
        let mut read: FdBitmap = [s.raw()].into_iter().collect();
        let mut write = FdBitmap::new();
        Ok(stack.select(s.raw() + 1, &mut read, &mut write, Duration::ZERO)?)
    };
    let start = Instant::now();
    let out = emulate::wait_two_sources(
        &mut fast,
        None,
        Some(Duration::from_secs(1)),
        Duration::from_millis(1),
    )
    .unwrap();
    let elapsed = start.elapsed();
    sender.join().unwrap();

    assert_eq!(out.fast_ready, 1);
    assert!(elapsed >= Duration::from_millis(150), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "{elapsed:?}");
    let left = out.remaining.unwrap();
    assert!(left > Duration::from_millis(200) && left < Duration::from_millis(850));
}
