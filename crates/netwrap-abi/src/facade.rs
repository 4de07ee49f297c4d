//! The routing facade behind every interposed call.
//!
//! [`Netwrap`] binds a [`Kernel`] (where non-fast-path descriptors go), the
//! process readiness state, an optional [`FastPathStack`], the event counters
//! and a configuration snapshot. Each method classifies its descriptor
//! argument and either serves the call through the stack, translating
//! constants, addresses and errno on the way, or forwards it to the kernel
//! untouched.
//!
//! The exported C symbols use one process-wide instance (see
//! [`crate::runtime::process`]). Applications and tests may build their own
//! instance instead of relying on interposition.
//!
//! All methods keep the C contract: `-1` with `errno` set on failure.

use std::ffi::{c_int, c_ulong, c_void};
use std::ptr;
use std::time::Duration;

use libc::{epoll_event, fd_set, iovec, off64_t, size_t, sockaddr, socklen_t, ssize_t, timeval};
use netwrap_core::emulate::{self, SourceFile};
use netwrap_core::errno::{self, FpErrno};
use netwrap_core::fd::{Descriptor, FastPathFd, FdBitmap, Partition};
use netwrap_core::ofp::{OFP_SO_ERROR, OFP_SOL_SOCKET};
use netwrap_core::sockaddr::SockAddr;
use netwrap_core::socket::{FD_SETSIZE, IOV_MAX, SOCK_NONBLOCK, SOCK_TYPE_FLAG_MASK, SOCKADDR_IN6_LEN};
use netwrap_core::stack::{FastPathStack, FpEpollEvent};
use netwrap_core::translate::{self, IoctlRequest};
use netwrap_core::{FpResult, NetError};
use netwrap_runtime::config::{Config, LogLevel};
use netwrap_runtime::trace::{self, TraceEvent};
use netwrap_runtime::{ProcessState, ShimCounters, ShimEvent, global_counters};

use crate::kernel::Kernel;
use crate::util::{
    self, duration_to_timeval, fail_int, fail_size, last_host_errno, timeval_to_duration,
};

/// Largest event buffer handed to the stack by one `epoll_wait`.
const MAX_EPOLL_BATCH: usize = 4096;

/// Descriptor-routing socket API.
pub struct Netwrap<'a, K: Kernel> {
    kernel: &'a K,
    state: &'a ProcessState,
    stack: Option<&'a dyn FastPathStack>,
    counters: &'a ShimCounters,
    config: Config,
}

impl<'a, K: Kernel> Netwrap<'a, K> {
    /// A facade with no fast-path stack: every call goes to `kernel`.
    #[must_use]
    pub fn new(kernel: &'a K, state: &'a ProcessState) -> Self {
        Self {
            kernel,
            state,
            stack: None,
            counters: global_counters(),
            config: Config::default(),
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: &'a dyn FastPathStack) -> Self {
        self.stack = Some(stack);
        self
    }

    #[must_use]
    pub fn with_counters(mut self, counters: &'a ShimCounters) -> Self {
        self.counters = counters;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Routing helpers
    // -----------------------------------------------------------------------

    /// Stack and partition, when the process is ready and a stack is bound.
    fn ready_stack(&self) -> Option<(&'a dyn FastPathStack, Partition)> {
        Some((self.stack?, self.state.partition()?))
    }

    /// The stack and handle for `fd`, or `None` if it belongs to the kernel.
    fn route(&self, fd: c_int) -> Option<(&'a dyn FastPathStack, FastPathFd)> {
        let (stack, partition) = self.ready_stack()?;
        match partition.classify(fd) {
            Descriptor::FastPath(ffd) => Some((stack, ffd)),
            Descriptor::Kernel(_) => None,
        }
    }

    fn fast(&self) {
        self.counters.record(ShimEvent::FastPath);
    }

    fn pass(&self) {
        self.counters.record(ShimEvent::Passthrough);
    }

    fn trace(
        &self,
        level: LogLevel,
        event: &'static str,
        build: impl FnOnce(TraceEvent<'static>) -> TraceEvent<'static>,
    ) {
        if trace::passes(level, self.config.log_level) {
            trace::emit_with(self.config.log_level, &build(TraceEvent::new(level, event)));
        }
    }

    /// Host errno for a stack failure, traced unless it is a would-block.
    fn fp_errno(&self, call: &'static str, fd: c_int, e: FpErrno) -> c_int {
        let host = e.to_host();
        if !e.is_would_block() {
            self.trace(LogLevel::Debug, "fast_path_error", |ev| {
                ev.call(call).fd(fd).errno(host)
            });
        }
        host
    }

    fn net_errno(&self, call: &'static str, fd: c_int, e: NetError) -> c_int {
        match e {
            NetError::FastPath(fp) => self.fp_errno(call, fd, fp),
            NetError::Host(host) => {
                self.trace(LogLevel::Debug, "host_error", |ev| ev.call(call).fd(fd).errno(host));
                host
            }
        }
    }

    fn reject(&self, call: &'static str, fd: c_int, errno: c_int) -> c_int {
        self.counters.record(ShimEvent::TranslationReject);
        self.trace(LogLevel::Debug, "translation_reject", |ev| {
            ev.call(call).fd(fd).errno(errno)
        });
        errno
    }

    #[cold]
    fn collision(&self, call: &'static str, fd: c_int) -> c_int {
        self.counters.record(ShimEvent::DescriptorCollision);
        let offset = self.state.offset();
        self.trace(LogLevel::Warn, "descriptor_collision", |ev| {
            ev.call(call)
                .fd(fd)
                .errno(errno::EMFILE)
                .detail(format!("offset={offset}"))
        });
        fail_int(errno::EMFILE)
    }

    /// Vet a descriptor the kernel just issued against the fast-path range.
    fn admit_kernel(&self, call: &'static str, fd: c_int) -> c_int {
        if fd >= 0 && self.state.partition().is_some_and(|p| !p.admits_kernel(fd)) {
            // SAFETY: closing a descriptor this call just created.
            unsafe { self.kernel.close(fd) };
            return self.collision(call, fd);
        }
        fd
    }

    /// Vet a descriptor the stack just issued; closes it on collision.
    fn admit_fast(&self, call: &'static str, stack: &dyn FastPathStack, fd: FastPathFd) -> c_int {
        if self.state.partition().is_some_and(|p| !p.admits_fast(fd)) {
            let _ = stack.close(fd);
            return self.collision(call, fd.raw());
        }
        fd.raw()
    }

    fn set_nonblocking(stack: &dyn FastPathStack, fd: FastPathFd) -> FpResult<()> {
        let mut on = 1;
        stack.ioctl(fd, IoctlRequest::NonBlocking.to_ofp(), &mut on)
    }

    // -----------------------------------------------------------------------
    // Socket lifecycle
    // -----------------------------------------------------------------------

    /// # Safety
    ///
    /// None beyond the C contract; no pointers are involved.
    pub unsafe fn socket(&self, domain: c_int, sock_type: c_int, protocol: c_int) -> c_int {
        let request = translate::socket_request(domain, sock_type, protocol);
        if let (Some((stack, _)), Some(req)) = (self.ready_stack(), request) {
            self.fast();
            let fd = match stack.socket(req.domain, req.sock_type, req.protocol) {
                Ok(fd) => fd,
                Err(e) => return fail_int(self.fp_errno("socket", -1, e)),
            };
            let raw = self.admit_fast("socket", stack, fd);
            if raw < 0 {
                return raw;
            }
            if req.nonblocking {
                if let Err(e) = Self::set_nonblocking(stack, fd) {
                    let _ = stack.close(fd);
                    return fail_int(self.fp_errno("socket", raw, e));
                }
            }
            return raw;
        }
        self.pass();
        let fd = unsafe { self.kernel.socket(domain, sock_type, protocol) };
        self.admit_kernel("socket", fd)
    }

    unsafe fn decode_addr(addr: *const sockaddr, len: socklen_t) -> Result<SockAddr, c_int> {
        if addr.is_null() {
            return Err(errno::EFAULT);
        }
        // One byte past the largest structure is enough to reject oversize.
        let n = (len as usize).min(SOCKADDR_IN6_LEN + 1);
        let raw = unsafe { util::bytes(addr.cast(), n) }?;
        SockAddr::decode_host(raw)
    }

    /// # Safety
    ///
    /// `addr` must be null or readable for `len` bytes.
    pub unsafe fn bind(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.bind(fd, addr, len) };
        };
        self.fast();
        let sa = match unsafe { Self::decode_addr(addr, len) } {
            Ok(sa) => sa,
            Err(e) => return fail_int(e),
        };
        match stack.bind(ffd, &sa) {
            Ok(()) => 0,
            Err(e) => fail_int(self.fp_errno("bind", fd, e)),
        }
    }

    /// # Safety
    ///
    /// `addr` must be null or readable for `len` bytes.
    pub unsafe fn connect(&self, fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.connect(fd, addr, len) };
        };
        self.fast();
        let sa = match unsafe { Self::decode_addr(addr, len) } {
            Ok(sa) => sa,
            Err(e) => return fail_int(e),
        };
        match stack.connect(ffd, &sa) {
            Ok(()) => 0,
            Err(e) => fail_int(self.fp_errno("connect", fd, e)),
        }
    }

    /// # Safety
    ///
    /// None beyond the C contract.
    pub unsafe fn listen(&self, fd: c_int, backlog: c_int) -> c_int {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.listen(fd, backlog) };
        };
        self.fast();
        match stack.listen(ffd, backlog) {
            Ok(()) => 0,
            Err(e) => fail_int(self.fp_errno("listen", fd, e)),
        }
    }

    /// # Safety
    ///
    /// `addr`/`len` as for `accept(2)`.
    pub unsafe fn accept(&self, fd: c_int, addr: *mut sockaddr, len: *mut socklen_t) -> c_int {
        unsafe { self.accept_with("accept", fd, addr, len, None) }
    }

    /// # Safety
    ///
    /// `addr`/`len` as for `accept4(2)`.
    pub unsafe fn accept4(
        &self,
        fd: c_int,
        addr: *mut sockaddr,
        len: *mut socklen_t,
        flags: c_int,
    ) -> c_int {
        unsafe { self.accept_with("accept4", fd, addr, len, Some(flags)) }
    }

    unsafe fn accept_with(
        &self,
        call: &'static str,
        fd: c_int,
        addr: *mut sockaddr,
        len: *mut socklen_t,
        flags: Option<c_int>,
    ) -> c_int {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            let rc = match flags {
                None => unsafe { self.kernel.accept(fd, addr, len) },
                Some(flags) => unsafe { self.kernel.accept4(fd, addr, len, flags) },
            };
            return self.admit_kernel(call, rc);
        };
        self.fast();
        let flags = flags.unwrap_or(0);
        if flags & !SOCK_TYPE_FLAG_MASK != 0 {
            return fail_int(errno::EINVAL);
        }
        if !addr.is_null() && len.is_null() {
            return fail_int(errno::EFAULT);
        }
        let (child, peer) = match stack.accept(ffd) {
            Ok(accepted) => accepted,
            Err(e) => return fail_int(self.fp_errno(call, fd, e)),
        };
        let raw = self.admit_fast(call, stack, child);
        if raw < 0 {
            return raw;
        }
        if flags & SOCK_NONBLOCK != 0 {
            if let Err(e) = Self::set_nonblocking(stack, child) {
                let _ = stack.close(child);
                return fail_int(self.fp_errno(call, raw, e));
            }
        }
        if !addr.is_null() {
            unsafe { write_peer(peer, addr, len) };
        }
        raw
    }

    /// # Safety
    ///
    /// None beyond the C contract.
    pub unsafe fn shutdown(&self, fd: c_int, how: c_int) -> c_int {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.shutdown(fd, how) };
        };
        self.fast();
        let how = match translate::shutdown_how(how) {
            Ok(how) => how,
            Err(u) => return fail_int(self.reject("shutdown", fd, u.errno)),
        };
        match stack.shutdown(ffd, how) {
            Ok(()) => 0,
            Err(e) => fail_int(self.fp_errno("shutdown", fd, e)),
        }
    }

    /// # Safety
    ///
    /// None beyond the C contract.
    pub unsafe fn close(&self, fd: c_int) -> c_int {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.close(fd) };
        };
        self.fast();
        match stack.close(ffd) {
            Ok(()) => 0,
            Err(e) => fail_int(self.fp_errno("close", fd, e)),
        }
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// # Safety
    ///
    /// `buf` must be writable for `count` bytes.
    pub unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.read(fd, buf, count) };
        };
        self.fast();
        unsafe { self.fast_recv("read", stack, ffd, buf, count, 0) }
    }

    /// # Safety
    ///
    /// `buf` must be readable for `count` bytes.
    pub unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.write(fd, buf, count) };
        };
        self.fast();
        unsafe { self.fast_send("write", stack, ffd, buf, count, 0) }
    }

    /// # Safety
    ///
    /// `buf` must be writable for `len` bytes.
    pub unsafe fn recv(&self, fd: c_int, buf: *mut c_void, len: size_t, flags: c_int) -> ssize_t {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.recv(fd, buf, len, flags) };
        };
        self.fast();
        let flags = translate::msg_flags(flags);
        unsafe { self.fast_recv("recv", stack, ffd, buf, len, flags) }
    }

    /// # Safety
    ///
    /// `buf` must be readable for `len` bytes.
    pub unsafe fn send(&self, fd: c_int, buf: *const c_void, len: size_t, flags: c_int) -> ssize_t {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.send(fd, buf, len, flags) };
        };
        self.fast();
        let flags = translate::msg_flags(flags);
        unsafe { self.fast_send("send", stack, ffd, buf, len, flags) }
    }

    unsafe fn fast_recv(
        &self,
        call: &'static str,
        stack: &dyn FastPathStack,
        fd: FastPathFd,
        buf: *mut c_void,
        len: size_t,
        flags: c_int,
    ) -> ssize_t {
        let buf = match unsafe { util::bytes_mut(buf, len) } {
            Ok(buf) => buf,
            Err(e) => return fail_size(e),
        };
        match stack.recv(fd, buf, flags) {
            Ok(n) => n as ssize_t,
            Err(e) => fail_size(self.fp_errno(call, fd.raw(), e)),
        }
    }

    unsafe fn fast_send(
        &self,
        call: &'static str,
        stack: &dyn FastPathStack,
        fd: FastPathFd,
        buf: *const c_void,
        len: size_t,
        flags: c_int,
    ) -> ssize_t {
        let buf = match unsafe { util::bytes(buf, len) } {
            Ok(buf) => buf,
            Err(e) => return fail_size(e),
        };
        match stack.send(fd, buf, flags) {
            Ok(n) => n as ssize_t,
            Err(e) => fail_size(self.fp_errno(call, fd.raw(), e)),
        }
    }

    /// Gather-write, emulated on fast-path descriptors.
    ///
    /// # Safety
    ///
    /// `iov` must hold `iovcnt` valid `iovec` records.
    pub unsafe fn writev(&self, fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.writev(fd, iov, iovcnt) };
        };
        self.fast();
        if !(0..=IOV_MAX).contains(&iovcnt) {
            return fail_size(errno::EINVAL);
        }
        if iovcnt > 0 && iov.is_null() {
            return fail_size(errno::EFAULT);
        }
        let records: &[iovec] = if iovcnt == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(iov, iovcnt as usize) }
        };
        let mut fragments = Vec::with_capacity(records.len());
        for v in records {
            match unsafe { util::bytes(v.iov_base.cast_const(), v.iov_len) } {
                Ok(b) => fragments.push(b),
                Err(e) => return fail_size(e),
            }
        }
        match emulate::writev(stack, ffd, &fragments, self.config.retry_interval) {
            Ok(t) => {
                self.counters.record(ShimEvent::WouldBlockRetries(t.retries));
                t.bytes as ssize_t
            }
            Err(e) => fail_size(self.net_errno("writev", fd, e)),
        }
    }

    /// File-to-socket copy, emulated when `out_fd` is a fast-path socket.
    ///
    /// # Safety
    ///
    /// `offset` must be null or point at a valid `off64_t`.
    pub unsafe fn sendfile64(
        &self,
        out_fd: c_int,
        in_fd: c_int,
        offset: *mut off64_t,
        count: size_t,
    ) -> ssize_t {
        let Some((stack, ffd)) = self.route(out_fd) else {
            self.pass();
            return unsafe { self.kernel.sendfile64(out_fd, in_fd, offset, count) };
        };
        self.fast();
        let mut source = KernelSource {
            kernel: self.kernel,
            fd: in_fd,
        };
        let offset = if offset.is_null() {
            None
        } else {
            Some(unsafe { &mut *offset })
        };
        match emulate::sendfile(
            stack,
            ffd,
            &mut source,
            offset,
            count,
            self.config.sendfile_chunk,
            self.config.retry_interval,
        ) {
            Ok(t) => {
                self.counters.record(ShimEvent::WouldBlockRetries(t.retries));
                t.bytes as ssize_t
            }
            Err(e) => fail_size(self.net_errno("sendfile64", out_fd, e)),
        }
    }

    // -----------------------------------------------------------------------
    // Options and control
    // -----------------------------------------------------------------------

    /// # Safety
    ///
    /// `value` must be null or readable for `len` bytes.
    pub unsafe fn setsockopt(
        &self,
        fd: c_int,
        level: c_int,
        name: c_int,
        value: *const c_void,
        len: socklen_t,
    ) -> c_int {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.setsockopt(fd, level, name, value, len) };
        };
        self.fast();
        let (level, name) = match translate::sockopt(level, name) {
            Ok(pair) => pair,
            Err(u) => return fail_int(self.reject("setsockopt", fd, u.errno)),
        };
        let value = match unsafe { util::bytes(value, len as usize) } {
            Ok(v) => v,
            Err(e) => return fail_int(e),
        };
        match stack.setsockopt(ffd, level, name, value) {
            Ok(()) => 0,
            Err(e) => fail_int(self.fp_errno("setsockopt", fd, e)),
        }
    }

    /// # Safety
    ///
    /// `len` must be null or valid; `value` writable for `*len` bytes.
    pub unsafe fn getsockopt(
        &self,
        fd: c_int,
        level: c_int,
        name: c_int,
        value: *mut c_void,
        len: *mut socklen_t,
    ) -> c_int {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.getsockopt(fd, level, name, value, len) };
        };
        self.fast();
        let (level, name) = match translate::sockopt(level, name) {
            Ok(pair) => pair,
            Err(u) => return fail_int(self.reject("getsockopt", fd, u.errno)),
        };
        if len.is_null() {
            return fail_int(errno::EFAULT);
        }
        let cap = unsafe { *len } as usize;
        let value = match unsafe { util::bytes_mut(value, cap) } {
            Ok(v) => v,
            Err(e) => return fail_int(e),
        };
        match stack.getsockopt(ffd, level, name, value) {
            Ok(n) => {
                // A pending socket error is a fast-path errno like any other.
                if (level, name) == (OFP_SOL_SOCKET, OFP_SO_ERROR) && n == 4 {
                    if let Ok(raw) = <[u8; 4]>::try_from(&value[..4]) {
                        let host = FpErrno(i32::from_ne_bytes(raw)).to_host();
                        value[..4].copy_from_slice(&host.to_ne_bytes());
                    }
                }
                unsafe { *len = n as socklen_t };
                0
            }
            Err(e) => fail_int(self.fp_errno("getsockopt", fd, e)),
        }
    }

    /// `ioctl` with its single trailing argument.
    ///
    /// # Safety
    ///
    /// `arg` must be valid for `request`.
    pub unsafe fn ioctl(&self, fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int {
        let Some((stack, ffd)) = self.route(fd) else {
            self.pass();
            return unsafe { self.kernel.ioctl(fd, request, arg) };
        };
        self.fast();
        let request = match IoctlRequest::from_host(u64::from(request)) {
            Ok(r) => r,
            Err(u) => return fail_int(self.reject("ioctl", fd, u.errno)),
        };
        if arg.is_null() {
            return fail_int(errno::EFAULT);
        }
        let slot = arg.cast::<c_int>();
        let mut value = unsafe { slot.read_unaligned() };
        match stack.ioctl(ffd, request.to_ofp(), &mut value) {
            Ok(()) => {
                unsafe { slot.write_unaligned(value) };
                0
            }
            Err(e) => fail_int(self.fp_errno("ioctl", fd, e)),
        }
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    /// `select` over both descriptor spaces under one timeout.
    ///
    /// Exceptional conditions are only reported for kernel descriptors.
    ///
    /// # Safety
    ///
    /// Each set pointer must be null or point at a valid `fd_set`; `timeout`
    /// must be null or valid.
    pub unsafe fn select(
        &self,
        nfds: c_int,
        readfds: *mut fd_set,
        writefds: *mut fd_set,
        exceptfds: *mut fd_set,
        timeout: *mut timeval,
    ) -> c_int {
        let Some((stack, partition)) = self.ready_stack() else {
            self.pass();
            return unsafe { self.kernel.select(nfds, readfds, writefds, exceptfds, timeout) };
        };
        let limit = nfds.clamp(0, FD_SETSIZE);
        let [(kr, fr), (kw, fw), (ke, fe)] =
            [readfds, writefds, exceptfds].map(|p| unsafe { load_fd_set(p, limit) }.split(partition));
        if fr.is_empty() && fw.is_empty() && fe.is_empty() {
            self.pass();
            return unsafe { self.kernel.select(nfds, readfds, writefds, exceptfds, timeout) };
        }
        self.fast();
        let budget = if timeout.is_null() {
            None
        } else {
            match timeval_to_duration(unsafe { &*timeout }) {
                Some(d) => Some(d),
                None => return fail_int(errno::EINVAL),
            }
        };

        let mut fast_ready = (FdBitmap::new(), FdBitmap::new());
        let mut kernel_ready = [FdBitmap::new(), FdBitmap::new(), FdBitmap::new()];
        let kernel_nfds = kr.nfds().max(kw.nfds()).max(ke.nfds());
        let outcome = {
            let fast_nfds = fr.nfds().max(fw.nfds());
            let mut poll_fast = || -> Result<usize, NetError> {
                if fast_nfds == 0 {
                    return Ok(0);
                }
                let (mut r, mut w) = (fr.clone(), fw.clone());
                let n = stack.select(fast_nfds, &mut r, &mut w, Duration::ZERO)?;
                fast_ready = (r, w);
                Ok(n)
            };
            let mut wait_kernel = |pause: Duration| -> Result<usize, NetError> {
                let mut sets = [&kr, &kw, &ke].map(to_fd_set);
                let [r, w, e] = &mut sets;
                let mut tv = duration_to_timeval(pause);
                let rc = unsafe { self.kernel.select(kernel_nfds, r, w, e, &mut tv) };
                if rc < 0 {
                    return Err(NetError::Host(last_host_errno(errno::EINVAL)));
                }
                kernel_ready = sets.each_ref().map(|s| from_fd_set(s, kernel_nfds));
                Ok(rc as usize)
            };
            let kernel: Option<&mut dyn FnMut(Duration) -> Result<usize, NetError>> =
                if kernel_nfds > 0 {
                    Some(&mut wait_kernel)
                } else {
                    None
                };
            emulate::wait_two_sources(&mut poll_fast, kernel, budget, self.config.poll_interval)
        };
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => return fail_int(self.net_errno("select", -1, e)),
        };

        let [kr_ready, kw_ready, ke_ready] = kernel_ready;
        let (fr_ready, fw_ready) = fast_ready;
        let read = kr_ready.union(&fr_ready);
        let write = kw_ready.union(&fw_ready);
        unsafe {
            store_fd_set(readfds, &read);
            store_fd_set(writefds, &write);
            store_fd_set(exceptfds, &ke_ready);
        }
        if !timeout.is_null() {
            let left = outcome.remaining.unwrap_or_default();
            unsafe { *timeout = duration_to_timeval(left) };
        }
        (read.len() + write.len() + ke_ready.len()) as c_int
    }

    /// # Safety
    ///
    /// None beyond the C contract.
    pub unsafe fn epoll_create(&self, size: c_int) -> c_int {
        if let Some((stack, _)) = self.ready_stack() {
            self.fast();
            return match stack.epoll_create(size) {
                Ok(fd) => self.admit_fast("epoll_create", stack, fd),
                Err(e) => fail_int(self.fp_errno("epoll_create", -1, e)),
            };
        }
        self.pass();
        let fd = unsafe { self.kernel.epoll_create(size) };
        self.admit_kernel("epoll_create", fd)
    }

    /// # Safety
    ///
    /// `event` must be null or point at a valid `epoll_event`.
    pub unsafe fn epoll_ctl(
        &self,
        epfd: c_int,
        op: c_int,
        fd: c_int,
        event: *mut epoll_event,
    ) -> c_int {
        let Some((stack, ep)) = self.route(epfd) else {
            self.pass();
            return unsafe { self.kernel.epoll_ctl(epfd, op, fd, event) };
        };
        self.fast();
        let ev = if event.is_null() {
            None
        } else {
            let raw = unsafe { ptr::read_unaligned(event) };
            Some(FpEpollEvent {
                events: raw.events,
                data: raw.u64,
            })
        };
        match stack.epoll_ctl(ep, op, fd, ev.as_ref()) {
            Ok(()) => 0,
            Err(e) => fail_int(self.fp_errno("epoll_ctl", epfd, e)),
        }
    }

    /// # Safety
    ///
    /// `events` must be writable for `maxevents` records.
    pub unsafe fn epoll_wait(
        &self,
        epfd: c_int,
        events: *mut epoll_event,
        maxevents: c_int,
        timeout: c_int,
    ) -> c_int {
        let Some((stack, ep)) = self.route(epfd) else {
            self.pass();
            return unsafe { self.kernel.epoll_wait(epfd, events, maxevents, timeout) };
        };
        self.fast();
        if maxevents <= 0 {
            return fail_int(errno::EINVAL);
        }
        if events.is_null() {
            return fail_int(errno::EFAULT);
        }
        let mut batch = vec![FpEpollEvent::default(); (maxevents as usize).min(MAX_EPOLL_BATCH)];
        let n = match stack.epoll_wait(ep, &mut batch, timeout) {
            Ok(n) => n.min(batch.len()),
            Err(e) => return fail_int(self.fp_errno("epoll_wait", epfd, e)),
        };
        for (i, ev) in batch[..n].iter().enumerate() {
            let out = epoll_event {
                events: ev.events,
                u64: ev.data,
            };
            unsafe { ptr::write_unaligned(events.add(i), out) };
        }
        n as c_int
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Copy `peer` into the caller's address buffer, truncating to `*len`, and
/// report the full structure size through `*len`.
unsafe fn write_peer(peer: Option<SockAddr>, addr: *mut sockaddr, len: *mut socklen_t) {
    let cap = unsafe { *len } as usize;
    let full = match peer {
        Some(sa) => {
            let mut tmp = [0u8; SOCKADDR_IN6_LEN];
            let full = sa.encode_host(&mut tmp);
            let n = cap.min(full);
            unsafe { ptr::copy_nonoverlapping(tmp.as_ptr(), addr.cast::<u8>(), n) };
            full
        }
        None => 0,
    };
    unsafe { *len = full as socklen_t };
}

/// Members of `set` below `limit`; a null set is empty.
unsafe fn load_fd_set(set: *const fd_set, limit: c_int) -> FdBitmap {
    if set.is_null() {
        return FdBitmap::new();
    }
    (0..limit)
        .filter(|&fd| unsafe { libc::FD_ISSET(fd, set) })
        .collect()
}

/// Overwrite `set` with the members of `bits`; a null set is skipped.
unsafe fn store_fd_set(set: *mut fd_set, bits: &FdBitmap) {
    if set.is_null() {
        return;
    }
    unsafe { libc::FD_ZERO(set) };
    for fd in bits.iter().filter(|&fd| fd < FD_SETSIZE) {
        unsafe { libc::FD_SET(fd, set) };
    }
}

fn to_fd_set(bits: &FdBitmap) -> fd_set {
    // SAFETY: fd_set is plain bits; all-zero is the empty set.
    let mut set: fd_set = unsafe { std::mem::zeroed() };
    unsafe { store_fd_set(&mut set, bits) };
    set
}

fn from_fd_set(set: &fd_set, limit: c_int) -> FdBitmap {
    unsafe { load_fd_set(set, limit) }
}

/// Reads from a host descriptor through the kernel, for `sendfile64`.
struct KernelSource<'k, K: Kernel> {
    kernel: &'k K,
    fd: c_int,
}

impl<K: Kernel> SourceFile for KernelSource<'_, K> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, i32> {
        loop {
            // SAFETY: `buf` is writable for its length.
            let rc = unsafe { self.kernel.read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
            if let Ok(n) = usize::try_from(rc) {
                return Ok(n);
            }
            let e = last_host_errno(errno::EINVAL);
            if e != errno::EINTR {
                return Err(e);
            }
        }
    }

    fn position(&mut self) -> Result<i64, i32> {
        // SAFETY: no pointers involved.
        let pos = unsafe { self.kernel.lseek64(self.fd, 0, libc::SEEK_CUR) };
        if pos < 0 {
            Err(last_host_errno(errno::EINVAL))
        } else {
            Ok(pos)
        }
    }

    fn seek(&mut self, pos: i64) -> Result<(), i32> {
        // SAFETY: no pointers involved.
        let rc = unsafe { self.kernel.lseek64(self.fd, pos, libc::SEEK_SET) };
        if rc < 0 {
            Err(last_host_errno(errno::EINVAL))
        } else {
            Ok(())
        }
    }
}
