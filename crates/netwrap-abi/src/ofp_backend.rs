//! [`FastPathStack`] over the OpenFastPath C API.
//!
//! The `ofp_*` functions are looked up in the process image with
//! `dlsym(RTLD_DEFAULT, ..)` when bootstrap runs, so the shim links and loads
//! without the stack present and simply stays not-ready.

use std::ffi::{CStr, c_int, c_long, c_void};
use std::time::Duration;

use libc::{size_t, ssize_t};
use netwrap_core::errno::FpErrno;
use netwrap_core::error::FpResult;
use netwrap_core::fd::{FastPathFd, FdBitmap};
use netwrap_core::ofp::{OFP_EINVAL, OFP_FD_SETSIZE};
use netwrap_core::sockaddr::SockAddr;
use netwrap_core::socket::SOCKADDR_IN6_LEN;
use netwrap_core::stack::{FastPathStack, FpEpollEvent, StackParams};
use netwrap_core::translate;

/// `ofp_socklen_t`.
type OfpSocklen = u32;

// ---------------------------------------------------------------------------
// C layouts
// ---------------------------------------------------------------------------

/// Room for either BSD sockaddr layout. Both share the Linux layout apart
/// from the leading `len`/`family` bytes.
#[repr(C, align(8))]
struct OfpAddrBuf([u8; 128]);

impl OfpAddrBuf {
    const fn zeroed() -> Self {
        Self([0; 128])
    }

    fn encode(addr: &SockAddr) -> (Self, OfpSocklen) {
        let mut buf = Self::zeroed();
        let len = addr.encode_host(&mut buf.0[..SOCKADDR_IN6_LEN]);
        let family = translate::domain(addr.host_family()).unwrap_or_default();
        buf.0[0] = len as u8;
        buf.0[1] = family as u8;
        (buf, len as OfpSocklen)
    }

    fn decode(&self, len: OfpSocklen) -> Option<SockAddr> {
        let host_family = translate::domain_to_host(i32::from(self.0[1]))?;
        let len = (len as usize).min(self.0.len());
        let mut host = self.0;
        host[..2].copy_from_slice(&(host_family as u16).to_ne_bytes());
        SockAddr::decode_host(&host[..len]).ok()
    }
}

#[repr(C)]
struct OfpFdSet {
    bits: [u8; OFP_FD_SETSIZE / 8],
}

impl OfpFdSet {
    /// Pack `set`, indexing bits by `fd - offset`.
    fn pack(set: &FdBitmap, offset: i32) -> FpResult<Self> {
        let mut out = Self {
            bits: [0; OFP_FD_SETSIZE / 8],
        };
        for fd in set.iter() {
            let idx = usize::try_from(fd - offset)
                .ok()
                .filter(|&i| i < OFP_FD_SETSIZE)
                .ok_or(FpErrno(OFP_EINVAL))?;
            out.bits[idx / 8] |= 1 << (idx % 8);
        }
        Ok(out)
    }

    fn unpack(&self, offset: i32) -> FdBitmap {
        (0..OFP_FD_SETSIZE)
            .filter(|&i| self.bits[i / 8] & (1 << (i % 8)) != 0)
            .map(|i| i as i32 + offset)
            .collect()
    }
}

#[repr(C)]
struct OfpTimeval {
    tv_sec: c_long,
    tv_usec: c_long,
}

impl From<Duration> for OfpTimeval {
    fn from(d: Duration) -> Self {
        Self {
            tv_sec: c_long::try_from(d.as_secs()).unwrap_or(c_long::MAX),
            tv_usec: c_long::from(d.subsec_micros() as i32),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct OfpEpollEvent {
    events: u32,
    data: u64,
}

impl From<FpEpollEvent> for OfpEpollEvent {
    fn from(e: FpEpollEvent) -> Self {
        Self {
            events: e.events,
            data: e.data,
        }
    }
}

impl From<OfpEpollEvent> for FpEpollEvent {
    fn from(e: OfpEpollEvent) -> Self {
        Self {
            events: e.events,
            data: e.data,
        }
    }
}

// ---------------------------------------------------------------------------
// Function table
// ---------------------------------------------------------------------------

type SocketFn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;
type AddrInFn = unsafe extern "C" fn(c_int, *const c_void, OfpSocklen) -> c_int;
type AcceptFn = unsafe extern "C" fn(c_int, *mut c_void, *mut OfpSocklen) -> c_int;
type IntIntFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
type IntFn = unsafe extern "C" fn(c_int) -> c_int;
type RecvFn = unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t;
type SendFn = unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t;
type SetsockoptFn = unsafe extern "C" fn(c_int, c_int, c_int, *const c_void, OfpSocklen) -> c_int;
type GetsockoptFn =
    unsafe extern "C" fn(c_int, c_int, c_int, *mut c_void, *mut OfpSocklen) -> c_int;
type IoctlFn = unsafe extern "C" fn(c_int, u32, ...) -> c_int;
type SelectFn = unsafe extern "C" fn(
    c_int,
    *mut OfpFdSet,
    *mut OfpFdSet,
    *mut OfpFdSet,
    *mut OfpTimeval,
) -> c_int;
type EpollCtlFn = unsafe extern "C" fn(c_int, c_int, c_int, *mut OfpEpollEvent) -> c_int;
type EpollWaitFn = unsafe extern "C" fn(c_int, *mut OfpEpollEvent, c_int, c_int) -> c_int;
type ErrnoLinkFn = unsafe extern "C" fn() -> *mut c_int;
type SdOffsetFn = unsafe extern "C" fn() -> c_int;

/// The stack's entry points were not all found in the process image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("fast-path stack symbols not found: {}", .0.join(", "))]
    Missing(Vec<String>),
}

fn lookup(name: &CStr, missing: &mut Vec<String>) -> *mut c_void {
    // SAFETY: NUL-terminated name; RTLD_DEFAULT is a valid pseudo-handle.
    let p = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    if p.is_null() {
        missing.push(name.to_string_lossy().into_owned());
    }
    p
}

macro_rules! load_api {
    ($($field:ident: $ty:ty = $name:literal,)*) => {{
        let mut missing = Vec::new();
        $(let $field = lookup($name, &mut missing);)*
        if !missing.is_empty() {
            return Err(BackendError::Missing(missing));
        }
        // SAFETY: every pointer is non-null and names the `ofp_*` function
        // whose C signature is the declared type.
        unsafe {
            OfpApi {
                $($field: std::mem::transmute::<*mut c_void, $ty>($field),)*
            }
        }
    }};
}

struct OfpApi {
    socket: SocketFn,
    bind: AddrInFn,
    connect: AddrInFn,
    listen: IntIntFn,
    accept: AcceptFn,
    shutdown: IntIntFn,
    close: IntFn,
    recv: RecvFn,
    send: SendFn,
    setsockopt: SetsockoptFn,
    getsockopt: GetsockoptFn,
    ioctl: IoctlFn,
    select: SelectFn,
    epoll_create: IntFn,
    epoll_ctl: EpollCtlFn,
    epoll_wait: EpollWaitFn,
    errno_link: ErrnoLinkFn,
    sd_offset: SdOffsetFn,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// The OpenFastPath stack found in the running process.
pub struct OfpBackend {
    api: OfpApi,
}

impl OfpBackend {
    /// Bind every `ofp_*` entry point, or report all that are missing.
    pub fn load() -> Result<Self, BackendError> {
        let api = load_api! {
            socket: SocketFn = c"ofp_socket",
            bind: AddrInFn = c"ofp_bind",
            connect: AddrInFn = c"ofp_connect",
            listen: IntIntFn = c"ofp_listen",
            accept: AcceptFn = c"ofp_accept",
            shutdown: IntIntFn = c"ofp_shutdown",
            close: IntFn = c"ofp_close",
            recv: RecvFn = c"ofp_recv",
            send: SendFn = c"ofp_send",
            setsockopt: SetsockoptFn = c"ofp_setsockopt",
            getsockopt: GetsockoptFn = c"ofp_getsockopt",
            ioctl: IoctlFn = c"ofp_ioctl",
            select: SelectFn = c"ofp_select",
            epoll_create: IntFn = c"ofp_epoll_create",
            epoll_ctl: EpollCtlFn = c"ofp_epoll_ctl",
            epoll_wait: EpollWaitFn = c"ofp_epoll_wait",
            errno_link: ErrnoLinkFn = c"ofp_errno_link",
            sd_offset: SdOffsetFn = c"ofp_socket_sd_offset",
        };
        Ok(Self { api })
    }

    fn errno(&self) -> FpErrno {
        // SAFETY: ofp_errno_link returns the calling thread's errno slot.
        let slot = unsafe { (self.api.errno_link)() };
        if slot.is_null() {
            return FpErrno(OFP_EINVAL);
        }
        // SAFETY: non-null slot owned by the stack for this thread.
        FpErrno(unsafe { *slot })
    }

    fn check(&self, rc: c_int) -> FpResult<c_int> {
        if rc < 0 { Err(self.errno()) } else { Ok(rc) }
    }

    fn check_size(&self, rc: ssize_t) -> FpResult<usize> {
        usize::try_from(rc).map_err(|_| self.errno())
    }

    fn offset(&self) -> FpResult<i32> {
        self.params()
            .and_then(|p| i32::try_from(p.descriptor_offset).ok())
            .ok_or(FpErrno(OFP_EINVAL))
    }
}

impl FastPathStack for OfpBackend {
    fn params(&self) -> Option<StackParams> {
        // SAFETY: no arguments.
        let offset = unsafe { (self.api.sd_offset)() };
        u32::try_from(offset).ok().map(|descriptor_offset| StackParams { descriptor_offset })
    }

    fn socket(&self, domain: i32, sock_type: i32, protocol: i32) -> FpResult<FastPathFd> {
        // SAFETY: plain integer arguments.
        let rc = unsafe { (self.api.socket)(domain, sock_type, protocol) };
        self.check(rc).map(FastPathFd::from_raw)
    }

    fn bind(&self, fd: FastPathFd, addr: &SockAddr) -> FpResult<()> {
        let (buf, len) = OfpAddrBuf::encode(addr);
        // SAFETY: `buf` holds `len` initialized bytes.
        let rc = unsafe { (self.api.bind)(fd.raw(), buf.0.as_ptr().cast(), len) };
        self.check(rc).map(drop)
    }

    fn connect(&self, fd: FastPathFd, addr: &SockAddr) -> FpResult<()> {
        let (buf, len) = OfpAddrBuf::encode(addr);
        // SAFETY: `buf` holds `len` initialized bytes.
        let rc = unsafe { (self.api.connect)(fd.raw(), buf.0.as_ptr().cast(), len) };
        self.check(rc).map(drop)
    }

    fn listen(&self, fd: FastPathFd, backlog: i32) -> FpResult<()> {
        // SAFETY: plain integer arguments.
        let rc = unsafe { (self.api.listen)(fd.raw(), backlog) };
        self.check(rc).map(drop)
    }

    fn accept(&self, fd: FastPathFd) -> FpResult<(FastPathFd, Option<SockAddr>)> {
        let mut buf = OfpAddrBuf::zeroed();
        let mut len = buf.0.len() as OfpSocklen;
        // SAFETY: `buf` is writable for `len` bytes.
        let rc = unsafe { (self.api.accept)(fd.raw(), buf.0.as_mut_ptr().cast(), &mut len) };
        let child = self.check(rc).map(FastPathFd::from_raw)?;
        Ok((child, buf.decode(len)))
    }

    fn shutdown(&self, fd: FastPathFd, how: i32) -> FpResult<()> {
        // SAFETY: plain integer arguments.
        let rc = unsafe { (self.api.shutdown)(fd.raw(), how) };
        self.check(rc).map(drop)
    }

    fn close(&self, fd: FastPathFd) -> FpResult<()> {
        // SAFETY: plain integer argument.
        let rc = unsafe { (self.api.close)(fd.raw()) };
        self.check(rc).map(drop)
    }

    fn recv(&self, fd: FastPathFd, buf: &mut [u8], flags: i32) -> FpResult<usize> {
        // SAFETY: `buf` is writable for its length.
        let rc = unsafe { (self.api.recv)(fd.raw(), buf.as_mut_ptr().cast(), buf.len(), flags) };
        self.check_size(rc)
    }

    fn send(&self, fd: FastPathFd, buf: &[u8], flags: i32) -> FpResult<usize> {
        // SAFETY: `buf` is readable for its length.
        let rc = unsafe { (self.api.send)(fd.raw(), buf.as_ptr().cast(), buf.len(), flags) };
        self.check_size(rc)
    }

    fn setsockopt(&self, fd: FastPathFd, level: i32, name: i32, value: &[u8]) -> FpResult<()> {
        let len = OfpSocklen::try_from(value.len()).map_err(|_| FpErrno(OFP_EINVAL))?;
        // SAFETY: `value` is readable for `len` bytes.
        let rc =
            unsafe { (self.api.setsockopt)(fd.raw(), level, name, value.as_ptr().cast(), len) };
        self.check(rc).map(drop)
    }

    fn getsockopt(
        &self,
        fd: FastPathFd,
        level: i32,
        name: i32,
        value: &mut [u8],
    ) -> FpResult<usize> {
        let mut len = OfpSocklen::try_from(value.len()).map_err(|_| FpErrno(OFP_EINVAL))?;
        // SAFETY: `value` is writable for `len` bytes.
        let rc = unsafe {
            (self.api.getsockopt)(fd.raw(), level, name, value.as_mut_ptr().cast(), &mut len)
        };
        self.check(rc)?;
        Ok((len as usize).min(value.len()))
    }

    fn ioctl(&self, fd: FastPathFd, request: u64, arg: &mut i32) -> FpResult<()> {
        let request = u32::try_from(request).map_err(|_| FpErrno(OFP_EINVAL))?;
        let arg: *mut c_int = arg;
        // SAFETY: the requests used take a single `int *`.
        let rc = unsafe { (self.api.ioctl)(fd.raw(), request, arg) };
        self.check(rc).map(drop)
    }

    fn select(
        &self,
        nfds: i32,
        read: &mut FdBitmap,
        write: &mut FdBitmap,
        timeout: Duration,
    ) -> FpResult<usize> {
        let offset = self.offset()?;
        let mut r = OfpFdSet::pack(read, offset)?;
        let mut w = OfpFdSet::pack(write, offset)?;
        let mut tv = OfpTimeval::from(timeout);
        // SAFETY: sets and timeout live across the call.
        let rc = unsafe {
            (self.api.select)(nfds, &mut r, &mut w, std::ptr::null_mut(), &mut tv)
        };
        let n = self.check(rc)?;
        *read = r.unpack(offset);
        *write = w.unpack(offset);
        Ok(n as usize)
    }

    fn epoll_create(&self, size: i32) -> FpResult<FastPathFd> {
        // SAFETY: plain integer argument.
        let rc = unsafe { (self.api.epoll_create)(size) };
        self.check(rc).map(FastPathFd::from_raw)
    }

    fn epoll_ctl(
        &self,
        epfd: FastPathFd,
        op: i32,
        fd: i32,
        event: Option<&FpEpollEvent>,
    ) -> FpResult<()> {
        let mut ev = event.copied().map(OfpEpollEvent::from);
        let ev_ptr = ev
            .as_mut()
            .map_or(std::ptr::null_mut(), |e| e as *mut OfpEpollEvent);
        // SAFETY: `ev_ptr` is null or points at `ev`.
        let rc = unsafe { (self.api.epoll_ctl)(epfd.raw(), op, fd, ev_ptr) };
        self.check(rc).map(drop)
    }

    fn epoll_wait(
        &self,
        epfd: FastPathFd,
        events: &mut [FpEpollEvent],
        timeout_ms: i32,
    ) -> FpResult<usize> {
        let mut raw = vec![OfpEpollEvent::default(); events.len()];
        let max = c_int::try_from(raw.len()).unwrap_or(c_int::MAX);
        // SAFETY: `raw` has room for `max` records.
        let rc = unsafe { (self.api.epoll_wait)(epfd.raw(), raw.as_mut_ptr(), max, timeout_ms) };
        let n = (self.check(rc)? as usize).min(events.len());
        for (dst, src) in events.iter_mut().zip(&raw[..n]) {
            *dst = FpEpollEvent::from(*src);
        }
        Ok(n)
    }

    fn wait_writable(&self, fd: FastPathFd, slice: Duration) {
        let mut read = FdBitmap::new();
        let mut write: FdBitmap = std::iter::once(fd.raw()).collect();
        // Readiness or timeout both mean "try the send again".
        let _ = self.select(fd.raw() + 1, &mut read, &mut write, slice);
    }
}
