//! Emulation of calls the fast-path API has no native primitive for.
//!
//! - [`writev`]: gather-write as a sequence of sends.
//! - [`sendfile`]: file-to-socket copy through a bounce buffer.
//! - [`wait_two_sources`]: one timeout budget shared between the fast-path
//!   readiness poll and the kernel's.
//!
//! Would-block results are retried after [`FastPathStack::wait_writable`];
//! any other failure aborts the whole call, and so does a send that accepts
//! zero bytes of a non-empty remainder (reported as `EIO`). Bytes already
//! handed to the stack are not reported on failure.

use std::time::{Duration, Instant};

use crate::errno;
use crate::error::NetError;
use crate::fd::FastPathFd;
use crate::stack::FastPathStack;

/// Outcome of a successful emulated transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transfer {
    pub bytes: usize,
    /// Number of would-block waits taken along the way.
    pub retries: u64,
}

/// Push all of `buf` through `send`, waiting out would-block results.
fn send_fully(
    stack: &dyn FastPathStack,
    fd: FastPathFd,
    buf: &[u8],
    slice: Duration,
) -> Result<Transfer, NetError> {
    let mut sent = 0usize;
    let mut retries = 0u64;
    while sent < buf.len() {
        match stack.send(fd, &buf[sent..], 0) {
            Ok(0) => return Err(NetError::Host(errno::EIO)),
            Ok(n) => sent += n,
            Err(e) if e.is_would_block() => {
                retries += 1;
                stack.wait_writable(fd, slice);
            }
            Err(e) => return Err(NetError::FastPath(e)),
        }
    }
    Ok(Transfer {
        bytes: sent,
        retries,
    })
}

/// Send every fragment in order. Returns the total byte count.
pub fn writev(
    stack: &dyn FastPathStack,
    fd: FastPathFd,
    fragments: &[&[u8]],
    slice: Duration,
) -> Result<Transfer, NetError> {
    let mut total = Transfer::default();
    for fragment in fragments {
        let t = send_fully(stack, fd, fragment, slice)?;
        total.bytes += t.bytes;
        total.retries += t.retries;
    }
    Ok(total)
}

/// Host-side file feeding [`sendfile`].
pub trait SourceFile {
    /// Read at the current position. `Ok(0)` is end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, i32>;
    fn position(&mut self) -> Result<i64, i32>;
    fn seek(&mut self, pos: i64) -> Result<(), i32>;
}

/// Copy up to `count` bytes from `source` to the fast-path socket `fd`.
///
/// With `offset`, reading starts at `*offset`, `*offset` is advanced past the
/// copied bytes and the source position is left where it was. Without it,
/// reading starts at and advances the source position.
pub fn sendfile(
    stack: &dyn FastPathStack,
    fd: FastPathFd,
    source: &mut dyn SourceFile,
    mut offset: Option<&mut i64>,
    count: usize,
    chunk: usize,
    slice: Duration,
) -> Result<Transfer, NetError> {
    let saved = match offset.as_deref() {
        Some(&start) => {
            let pos = source.position().map_err(NetError::Host)?;
            source.seek(start).map_err(NetError::Host)?;
            Some(pos)
        }
        None => None,
    };

    let result = pump(stack, fd, source, count, chunk.max(1), slice);

    if let Some(saved) = saved {
        let end = source.position();
        let restored = source.seek(saved);
        let transfer = result?;
        if let Some(off) = offset.as_deref_mut() {
            *off = end.map_err(NetError::Host)?;
        }
        restored.map_err(NetError::Host)?;
        return Ok(transfer);
    }
    result
}

fn pump(
    stack: &dyn FastPathStack,
    fd: FastPathFd,
    source: &mut dyn SourceFile,
    count: usize,
    chunk: usize,
    slice: Duration,
) -> Result<Transfer, NetError> {
    let mut buf = vec![0u8; chunk.min(count.max(1))];
    let mut total = Transfer::default();
    while total.bytes < count {
        let want = buf.len().min(count - total.bytes);
        let n = source.read(&mut buf[..want]).map_err(NetError::Host)?;
        if n == 0 {
            break;
        }
        let t = send_fully(stack, fd, &buf[..n], slice)?;
        total.bytes += t.bytes;
        total.retries += t.retries;
    }
    Ok(total)
}

/// Result of [`wait_two_sources`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    pub fast_ready: usize,
    pub kernel_ready: usize,
    /// Unspent budget; `None` for an unbounded wait.
    pub remaining: Option<Duration>,
    pub rounds: u32,
}

/// Wait for readiness on the fast path, the kernel, or both, under a single
/// `timeout` (`None` waits forever).
///
/// Each round polls `fast` without blocking, then lets `kernel` block for at
/// most one `slice` of the remaining budget (or for zero when the fast path
/// already reported). Without a kernel source the round sleeps instead. A
/// zero timeout performs exactly one round.
pub fn wait_two_sources(
    fast: &mut dyn FnMut() -> Result<usize, NetError>,
    mut kernel: Option<&mut dyn FnMut(Duration) -> Result<usize, NetError>>,
    timeout: Option<Duration>,
    slice: Duration,
) -> Result<WaitOutcome, NetError> {
    let start = Instant::now();
    let remaining = || timeout.map(|t| t.saturating_sub(start.elapsed()));
    let mut rounds = 0u32;
    loop {
        rounds = rounds.saturating_add(1);
        let fast_ready = fast()?;
        let pause = if fast_ready > 0 {
            Duration::ZERO
        } else {
            remaining().map_or(slice, |r| r.min(slice))
        };
        let kernel_ready = match kernel.as_deref_mut() {
            Some(k) => k(pause)?,
            None => {
                if !pause.is_zero() {
                    std::thread::sleep(pause);
                }
                0
            }
        };
        let left = remaining();
        if fast_ready > 0 || kernel_ready > 0 || left == Some(Duration::ZERO) {
            return Ok(WaitOutcome {
                fast_ready,
                kernel_ready,
                remaining: left,
                rounds,
            });
        }
    }
}
