//! The host side of every interposed call.
//!
//! [`Kernel`] is what a descriptor below the fast-path offset (or any
//! descriptor before bootstrap) is handed to. Two implementations exist:
//!
//! - [`NextLibc`]: the original libc definitions found via `RTLD_NEXT`. This
//!   is what the exported symbols use.
//! - [`DirectLibc`]: raw `syscall(2)` invocations. They never re-enter the
//!   exported symbols, which makes them usable from in-process tests where
//!   the shim's own definitions are linked in.

use std::ffi::{c_int, c_long, c_ulong, c_void};
use std::ptr;

use libc::{epoll_event, fd_set, iovec, off64_t, size_t, sockaddr, socklen_t, ssize_t, timeval};
use netwrap_core::errno;
use netwrap_runtime::config::LogLevel;
use netwrap_runtime::trace::{self, TraceEvent};
use netwrap_runtime::{ShimEvent, global_counters};

use crate::resolver::{self, ResolveError, Symbol};
use crate::util::{self, duration_to_timeval, timeval_to_duration};

/// Host implementation of the intercepted calls.
///
/// Every method follows the C contract of the call it is named after:
/// `-1` (or a negative offset) with `errno` set on failure.
///
/// # Safety
///
/// Pointer arguments must satisfy the same requirements as for the libc call.
#[allow(clippy::missing_safety_doc)]
pub trait Kernel: Send + Sync {
    unsafe fn socket(&self, domain: c_int, sock_type: c_int, protocol: c_int) -> c_int;
    unsafe fn bind(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int;
    unsafe fn connect(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int;
    unsafe fn listen(&self, fd: c_int, backlog: c_int) -> c_int;
    unsafe fn accept(&self, fd: c_int, addr: *mut sockaddr, len: *mut socklen_t) -> c_int;
    unsafe fn accept4(
        &self,
        fd: c_int,
        addr: *mut sockaddr,
        len: *mut socklen_t,
        flags: c_int,
    ) -> c_int;
    unsafe fn shutdown(&self, fd: c_int, how: c_int) -> c_int;
    unsafe fn close(&self, fd: c_int) -> c_int;

    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t;
    unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> ssize_t;
    unsafe fn recv(&self, fd: c_int, buf: *mut c_void, len: size_t, flags: c_int) -> ssize_t;
    unsafe fn send(&self, fd: c_int, buf: *const c_void, len: size_t, flags: c_int) -> ssize_t;
    unsafe fn writev(&self, fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t;
    unsafe fn sendfile64(
        &self,
        out_fd: c_int,
        in_fd: c_int,
        offset: *mut off64_t,
        count: size_t,
    ) -> ssize_t;
    unsafe fn lseek64(&self, fd: c_int, offset: off64_t, whence: c_int) -> off64_t;

    unsafe fn setsockopt(
        &self,
        fd: c_int,
        level: c_int,
        name: c_int,
        value: *const c_void,
        len: socklen_t,
    ) -> c_int;
    unsafe fn getsockopt(
        &self,
        fd: c_int,
        level: c_int,
        name: c_int,
        value: *mut c_void,
        len: *mut socklen_t,
    ) -> c_int;
    unsafe fn ioctl(&self, fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int;

    unsafe fn select(
        &self,
        nfds: c_int,
        read: *mut fd_set,
        write: *mut fd_set,
        except: *mut fd_set,
        timeout: *mut timeval,
    ) -> c_int;
    unsafe fn epoll_create(&self, size: c_int) -> c_int;
    unsafe fn epoll_ctl(&self, epfd: c_int, op: c_int, fd: c_int, event: *mut epoll_event)
    -> c_int;
    unsafe fn epoll_wait(
        &self,
        epfd: c_int,
        events: *mut epoll_event,
        maxevents: c_int,
        timeout: c_int,
    ) -> c_int;
}

// ---------------------------------------------------------------------------
// NextLibc
// ---------------------------------------------------------------------------

type SocketFn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;
type AddrInFn = unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int;
type AddrOutFn = unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int;
type Accept4Fn = unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t, c_int) -> c_int;
type IntIntFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
type IntFn = unsafe extern "C" fn(c_int) -> c_int;
type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
type WriteFn = unsafe extern "C" fn(c_int, *const c_void, size_t) -> ssize_t;
type RecvFn = unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t;
type SendFn = unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t;
type WritevFn = unsafe extern "C" fn(c_int, *const iovec, c_int) -> ssize_t;
type SendfileFn = unsafe extern "C" fn(c_int, c_int, *mut off64_t, size_t) -> ssize_t;
type LseekFn = unsafe extern "C" fn(c_int, off64_t, c_int) -> off64_t;
type SetsockoptFn = unsafe extern "C" fn(c_int, c_int, c_int, *const c_void, socklen_t) -> c_int;
type GetsockoptFn = unsafe extern "C" fn(c_int, c_int, c_int, *mut c_void, *mut socklen_t) -> c_int;
type IoctlFn = unsafe extern "C" fn(c_int, c_ulong, ...) -> c_int;
type SelectFn =
    unsafe extern "C" fn(c_int, *mut fd_set, *mut fd_set, *mut fd_set, *mut timeval) -> c_int;
type EpollCtlFn = unsafe extern "C" fn(c_int, c_int, c_int, *mut epoll_event) -> c_int;
type EpollWaitFn = unsafe extern "C" fn(c_int, *mut epoll_event, c_int, c_int) -> c_int;

/// Original libc definitions, resolved lazily through [`resolver`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NextLibc;

/// Shared `NextLibc` instance for the exported symbols.
pub static NEXT_LIBC: NextLibc = NextLibc;

#[cold]
fn report_missing(err: &ResolveError) {
    global_counters().record(ShimEvent::ResolverFailure);
    trace::emit(&TraceEvent::new(LogLevel::Error, "resolver_failure").detail(err.to_string()));
    util::set_abi_errno(errno::EACCES);
}

/// Resolve `$sym`, reinterpret it as `$ty` and run `$call` with it bound to
/// `$f`; on failure report and evaluate to `$fail`.
macro_rules! next {
    ($sym:expr, $ty:ty, $fail:expr, |$f:ident| $call:expr) => {
        match resolver::resolve($sym) {
            Ok(p) => {
                // SAFETY: `p` is the libc definition of `$sym`, whose C
                // signature is `$ty`.
                let $f = unsafe { std::mem::transmute::<*mut c_void, $ty>(p.as_ptr()) };
                unsafe { $call }
            }
            Err(e) => {
                report_missing(&e);
                $fail
            }
        }
    };
}

impl Kernel for NextLibc {
    unsafe fn socket(&self, domain: c_int, sock_type: c_int, protocol: c_int) -> c_int {
        next!(Symbol::Socket, SocketFn, -1, |f| f(domain, sock_type, protocol))
    }

    unsafe fn bind(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
        next!(Symbol::Bind, AddrInFn, -1, |f| f(fd, addr, len))
    }

    unsafe fn connect(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
        next!(Symbol::Connect, AddrInFn, -1, |f| f(fd, addr, len))
    }

    unsafe fn listen(&self, fd: c_int, backlog: c_int) -> c_int {
        next!(Symbol::Listen, IntIntFn, -1, |f| f(fd, backlog))
    }

    unsafe fn accept(&self, fd: c_int, addr: *mut sockaddr, len: *mut socklen_t) -> c_int {
        next!(Symbol::Accept, AddrOutFn, -1, |f| f(fd, addr, len))
    }

    unsafe fn accept4(
        &self,
        fd: c_int,
        addr: *mut sockaddr,
        len: *mut socklen_t,
        flags: c_int,
    ) -> c_int {
        next!(Symbol::Accept4, Accept4Fn, -1, |f| f(fd, addr, len, flags))
    }

    unsafe fn shutdown(&self, fd: c_int, how: c_int) -> c_int {
        next!(Symbol::Shutdown, IntIntFn, -1, |f| f(fd, how))
    }

    unsafe fn close(&self, fd: c_int) -> c_int {
        next!(Symbol::Close, IntFn, -1, |f| f(fd))
    }

    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        next!(Symbol::Read, ReadFn, -1, |f| f(fd, buf, count))
    }

    unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
        next!(Symbol::Write, WriteFn, -1, |f| f(fd, buf, count))
    }

    unsafe fn recv(&self, fd: c_int, buf: *mut c_void, len: size_t, flags: c_int) -> ssize_t {
        next!(Symbol::Recv, RecvFn, -1, |f| f(fd, buf, len, flags))
    }

    unsafe fn send(&self, fd: c_int, buf: *const c_void, len: size_t, flags: c_int) -> ssize_t {
        next!(Symbol::Send, SendFn, -1, |f| f(fd, buf, len, flags))
    }

    unsafe fn writev(&self, fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t {
        next!(Symbol::Writev, WritevFn, -1, |f| f(fd, iov, iovcnt))
    }

    unsafe fn sendfile64(
        &self,
        out_fd: c_int,
        in_fd: c_int,
        offset: *mut off64_t,
        count: size_t,
    ) -> ssize_t {
        next!(Symbol::Sendfile64, SendfileFn, -1, |f| f(
            out_fd, in_fd, offset, count
        ))
    }

    unsafe fn lseek64(&self, fd: c_int, offset: off64_t, whence: c_int) -> off64_t {
        next!(Symbol::Lseek64, LseekFn, -1, |f| f(fd, offset, whence))
    }

    unsafe fn setsockopt(
        &self,
        fd: c_int,
        level: c_int,
        name: c_int,
        value: *const c_void,
        len: socklen_t,
    ) -> c_int {
        next!(Symbol::Setsockopt, SetsockoptFn, -1, |f| f(
            fd, level, name, value, len
        ))
    }

    unsafe fn getsockopt(
        &self,
        fd: c_int,
        level: c_int,
        name: c_int,
        value: *mut c_void,
        len: *mut socklen_t,
    ) -> c_int {
        next!(Symbol::Getsockopt, GetsockoptFn, -1, |f| f(
            fd, level, name, value, len
        ))
    }

    unsafe fn ioctl(&self, fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int {
        next!(Symbol::Ioctl, IoctlFn, -1, |f| f(fd, request, arg))
    }

    unsafe fn select(
        &self,
        nfds: c_int,
        read: *mut fd_set,
        write: *mut fd_set,
        except: *mut fd_set,
        timeout: *mut timeval,
    ) -> c_int {
        next!(Symbol::Select, SelectFn, -1, |f| f(
            nfds, read, write, except, timeout
        ))
    }

    unsafe fn epoll_create(&self, size: c_int) -> c_int {
        next!(Symbol::EpollCreate, IntFn, -1, |f| f(size))
    }

    unsafe fn epoll_ctl(
        &self,
        epfd: c_int,
        op: c_int,
        fd: c_int,
        event: *mut epoll_event,
    ) -> c_int {
        next!(Symbol::EpollCtl, EpollCtlFn, -1, |f| f(epfd, op, fd, event))
    }

    unsafe fn epoll_wait(
        &self,
        epfd: c_int,
        events: *mut epoll_event,
        maxevents: c_int,
        timeout: c_int,
    ) -> c_int {
        next!(Symbol::EpollWait, EpollWaitFn, -1, |f| f(
            epfd, events, maxevents, timeout
        ))
    }
}

// ---------------------------------------------------------------------------
// DirectLibc
// ---------------------------------------------------------------------------

/// Direct system calls. libc's `syscall` wrapper already stores `errno`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLibc;

#[inline]
fn ret_int(ret: c_long) -> c_int {
    ret as c_int
}

#[inline]
fn ret_size(ret: c_long) -> ssize_t {
    ret as ssize_t
}

impl Kernel for DirectLibc {
    unsafe fn socket(&self, domain: c_int, sock_type: c_int, protocol: c_int) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_socket, domain, sock_type, protocol) })
    }

    unsafe fn bind(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_bind, fd, addr, len) })
    }

    unsafe fn connect(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_connect, fd, addr, len) })
    }

    unsafe fn listen(&self, fd: c_int, backlog: c_int) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_listen, fd, backlog) })
    }

    unsafe fn accept(&self, fd: c_int, addr: *mut sockaddr, len: *mut socklen_t) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_accept4, fd, addr, len, 0) })
    }

    unsafe fn accept4(
        &self,
        fd: c_int,
        addr: *mut sockaddr,
        len: *mut socklen_t,
        flags: c_int,
    ) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_accept4, fd, addr, len, flags) })
    }

    unsafe fn shutdown(&self, fd: c_int, how: c_int) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_shutdown, fd, how) })
    }

    unsafe fn close(&self, fd: c_int) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_close, fd) })
    }

    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        ret_size(unsafe { libc::syscall(libc::SYS_read, fd, buf, count) })
    }

    unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
        ret_size(unsafe { libc::syscall(libc::SYS_write, fd, buf, count) })
    }

    unsafe fn recv(&self, fd: c_int, buf: *mut c_void, len: size_t, flags: c_int) -> ssize_t {
        let null_addr: *mut sockaddr = ptr::null_mut();
        let null_len: *mut socklen_t = ptr::null_mut();
        ret_size(unsafe {
            libc::syscall(libc::SYS_recvfrom, fd, buf, len, flags, null_addr, null_len)
        })
    }

    unsafe fn send(&self, fd: c_int, buf: *const c_void, len: size_t, flags: c_int) -> ssize_t {
        let null_addr: *const sockaddr = ptr::null();
        ret_size(unsafe {
            libc::syscall(libc::SYS_sendto, fd, buf, len, flags, null_addr, 0 as socklen_t)
        })
    }

    unsafe fn writev(&self, fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t {
        ret_size(unsafe { libc::syscall(libc::SYS_writev, fd, iov, iovcnt) })
    }

    unsafe fn sendfile64(
        &self,
        out_fd: c_int,
        in_fd: c_int,
        offset: *mut off64_t,
        count: size_t,
    ) -> ssize_t {
        ret_size(unsafe { libc::syscall(libc::SYS_sendfile, out_fd, in_fd, offset, count) })
    }

    unsafe fn lseek64(&self, fd: c_int, offset: off64_t, whence: c_int) -> off64_t {
        unsafe { libc::syscall(libc::SYS_lseek, fd, offset, whence) }
    }

    unsafe fn setsockopt(
        &self,
        fd: c_int,
        level: c_int,
        name: c_int,
        value: *const c_void,
        len: socklen_t,
    ) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_setsockopt, fd, level, name, value, len) })
    }

    unsafe fn getsockopt(
        &self,
        fd: c_int,
        level: c_int,
        name: c_int,
        value: *mut c_void,
        len: *mut socklen_t,
    ) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_getsockopt, fd, level, name, value, len) })
    }

    unsafe fn ioctl(&self, fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_ioctl, fd, request, arg) })
    }

    unsafe fn select(
        &self,
        nfds: c_int,
        read: *mut fd_set,
        write: *mut fd_set,
        except: *mut fd_set,
        timeout: *mut timeval,
    ) -> c_int {
        // pselect6 takes a timespec and, unlike the libc wrapper, reports the
        // unspent time back through it.
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let ts_ptr: *mut libc::timespec = if timeout.is_null() {
            ptr::null_mut()
        } else {
            let Some(d) = timeval_to_duration(unsafe { &*timeout }) else {
                return util::fail_int(errno::EINVAL);
            };
            ts.tv_sec = libc::time_t::try_from(d.as_secs()).unwrap_or(libc::time_t::MAX);
            ts.tv_nsec = libc::c_long::from(d.subsec_nanos() as i32);
            &raw mut ts
        };
        let no_mask: *const c_void = ptr::null();
        let rc = ret_int(unsafe {
            libc::syscall(libc::SYS_pselect6, nfds, read, write, except, ts_ptr, no_mask)
        });
        if !timeout.is_null() && rc >= 0 {
            let left = std::time::Duration::new(
                u64::try_from(ts.tv_sec).unwrap_or(0),
                u32::try_from(ts.tv_nsec).unwrap_or(0),
            );
            unsafe { *timeout = duration_to_timeval(left) };
        }
        rc
    }

    unsafe fn epoll_create(&self, size: c_int) -> c_int {
        if size <= 0 {
            return util::fail_int(errno::EINVAL);
        }
        ret_int(unsafe { libc::syscall(libc::SYS_epoll_create1, 0) })
    }

    unsafe fn epoll_ctl(
        &self,
        epfd: c_int,
        op: c_int,
        fd: c_int,
        event: *mut epoll_event,
    ) -> c_int {
        ret_int(unsafe { libc::syscall(libc::SYS_epoll_ctl, epfd, op, fd, event) })
    }

    unsafe fn epoll_wait(
        &self,
        epfd: c_int,
        events: *mut epoll_event,
        maxevents: c_int,
        timeout: c_int,
    ) -> c_int {
        let no_mask: *const c_void = ptr::null();
        let sigset_size: size_t = 8;
        ret_int(unsafe {
            libc::syscall(
                libc::SYS_epoll_pwait,
                epfd,
                events,
                maxevents,
                timeout,
                no_mask,
                sigset_size,
            )
        })
    }
}
