//! The fast-path stack seam.
//!
//! [`FastPathStack`] is the typed face of the accelerated userspace stack.
//! Arguments arrive already translated into fast-path constants; errors come
//! back in fast-path errno numbering ([`crate::errno::FpErrno`]) and are
//! translated by the caller. The production implementation binds the
//! OpenFastPath C API at runtime (see `netwrap-abi`); tests install in-memory
//! doubles.

use std::time::Duration;

use crate::error::FpResult;
use crate::fd::{FastPathFd, FdBitmap};
use crate::sockaddr::SockAddr;

/// Parameters reported by the stack once it is attached to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackParams {
    /// Smallest descriptor number reserved for fast-path sockets.
    pub descriptor_offset: u32,
}

/// Event record exchanged with the fast-path epoll API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FpEpollEvent {
    pub events: u32,
    pub data: u64,
}

/// A fast-path network stack.
///
/// Methods mirror the socket API one to one. Implementations must be callable
/// from any thread.
pub trait FastPathStack: Send + Sync {
    /// Attachment parameters, or `None` while the stack is not configured.
    fn params(&self) -> Option<StackParams>;

    fn socket(&self, domain: i32, sock_type: i32, protocol: i32) -> FpResult<FastPathFd>;
    fn bind(&self, fd: FastPathFd, addr: &SockAddr) -> FpResult<()>;
    fn connect(&self, fd: FastPathFd, addr: &SockAddr) -> FpResult<()>;
    fn listen(&self, fd: FastPathFd, backlog: i32) -> FpResult<()>;
    /// Accept a connection, returning the new descriptor and peer address.
    fn accept(&self, fd: FastPathFd) -> FpResult<(FastPathFd, Option<SockAddr>)>;
    fn shutdown(&self, fd: FastPathFd, how: i32) -> FpResult<()>;
    fn close(&self, fd: FastPathFd) -> FpResult<()>;

    fn recv(&self, fd: FastPathFd, buf: &mut [u8], flags: i32) -> FpResult<usize>;
    fn send(&self, fd: FastPathFd, buf: &[u8], flags: i32) -> FpResult<usize>;

    fn setsockopt(&self, fd: FastPathFd, level: i32, name: i32, value: &[u8]) -> FpResult<()>;
    /// Read an option into `value`, returning the number of bytes written.
    fn getsockopt(&self, fd: FastPathFd, level: i32, name: i32, value: &mut [u8])
    -> FpResult<usize>;
    /// Issue a fast-path ioctl request whose argument is a single `int`.
    fn ioctl(&self, fd: FastPathFd, request: u64, arg: &mut i32) -> FpResult<()>;

    /// Readiness check over fast-path descriptors. On return the sets hold
    /// only ready members.
    fn select(
        &self,
        nfds: i32,
        read: &mut FdBitmap,
        write: &mut FdBitmap,
        timeout: Duration,
    ) -> FpResult<usize>;

    fn epoll_create(&self, size: i32) -> FpResult<FastPathFd>;
    fn epoll_ctl(
        &self,
        epfd: FastPathFd,
        op: i32,
        fd: i32,
        event: Option<&FpEpollEvent>,
    ) -> FpResult<()>;
    fn epoll_wait(
        &self,
        epfd: FastPathFd,
        events: &mut [FpEpollEvent],
        timeout_ms: i32,
    ) -> FpResult<usize>;

    /// Wait up to `slice` for `fd` to accept more data after a would-block.
    ///
    /// The default sleeps for the slice. Stacks with a usable readiness
    /// primitive should block on it instead.
    fn wait_writable(&self, fd: FastPathFd, slice: Duration) {
        let _ = fd;
        std::thread::sleep(slice);
    }
}
