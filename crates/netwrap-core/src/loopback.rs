//! In-process loopback implementation of [`FastPathStack`].
//!
//! Connections only reach listeners inside the same instance. `recv` never
//! blocks (an empty buffer reports would-block), while `select`,
//! `epoll_wait` and `wait_writable` sleep on a condition variable until their
//! timeout. Faults can be scheduled per operation to drive error paths, and
//! every call is counted so callers can assert the stack was never touched.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::errno::FpErrno;
use crate::error::FpResult;
use crate::fd::{FastPathFd, FdBitmap};
use crate::ofp::*;
use crate::sockaddr::SockAddr;
use crate::stack::{FastPathStack, FpEpollEvent, StackParams};

/// Default per-socket receive buffer.
pub const DEFAULT_RX_CAPACITY: usize = 64 * 1024;

const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// Stack operation, for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Socket,
    Bind,
    Connect,
    Listen,
    Accept,
    Shutdown,
    Close,
    Recv,
    Send,
    SetSockOpt,
    GetSockOpt,
    Ioctl,
    Select,
    EpollCreate,
    EpollCtl,
    EpollWait,
}

#[derive(Debug, Default)]
struct Socket {
    domain: i32,
    sock_type: i32,
    local: Option<SockAddr>,
    remote: Option<SockAddr>,
    peer: Option<i32>,
    connected: bool,
    listening: bool,
    backlog: VecDeque<i32>,
    rx: VecDeque<u8>,
    peer_closed: bool,
    read_shut: bool,
    write_shut: bool,
    nonblocking: bool,
    async_io: bool,
    /// Fast-path errno reported once through `SO_ERROR`.
    pending_error: i32,
    options: HashMap<(i32, i32), Vec<u8>>,
}

#[derive(Debug, Default)]
struct Epoll {
    interest: BTreeMap<i32, FpEpollEvent>,
}

#[derive(Debug)]
enum Entry {
    Socket(Socket),
    Epoll(Epoll),
}

#[derive(Debug)]
struct Fault {
    op: Op,
    countdown: u32,
    errno: FpErrno,
}

#[derive(Debug)]
struct Inner {
    offset: u32,
    attached: bool,
    next_fd: i32,
    forced_fd: Option<i32>,
    next_port: u16,
    rx_capacity: usize,
    entries: HashMap<i32, Entry>,
    calls: HashMap<Op, u64>,
    faults: Vec<Fault>,
}

fn err<T>(errno: i32) -> FpResult<T> {
    Err(FpErrno(errno))
}

impl Inner {
    fn enter(&mut self, op: Op) -> FpResult<()> {
        *self.calls.entry(op).or_default() += 1;
        let mut hit = None;
        self.faults.retain_mut(|f| {
            if f.op != op || hit.is_some() {
                return true;
            }
            f.countdown = f.countdown.saturating_sub(1);
            if f.countdown == 0 {
                hit = Some(f.errno);
                false
            } else {
                true
            }
        });
        hit.map_or(Ok(()), Err)
    }

    fn allocate(&mut self, entry: Entry) -> i32 {
        let fd = self.forced_fd.take().unwrap_or_else(|| {
            let fd = self.next_fd;
            self.next_fd += 1;
            fd
        });
        self.entries.insert(fd, entry);
        fd
    }

    fn socket(&self, fd: i32) -> FpResult<&Socket> {
        match self.entries.get(&fd) {
            Some(Entry::Socket(s)) => Ok(s),
            Some(Entry::Epoll(_)) => err(OFP_ENOTSOCK),
            None => err(OFP_EBADF),
        }
    }

    fn socket_mut(&mut self, fd: i32) -> FpResult<&mut Socket> {
        match self.entries.get_mut(&fd) {
            Some(Entry::Socket(s)) => Ok(s),
            Some(Entry::Epoll(_)) => err(OFP_ENOTSOCK),
            None => err(OFP_EBADF),
        }
    }

    fn ephemeral(&mut self, domain: i32) -> SockAddr {
        let port = self.next_port;
        self.next_port = self.next_port.wrapping_add(1).max(FIRST_EPHEMERAL_PORT);
        if domain == OFP_AF_INET6 {
            SockAddr::V6 {
                port,
                flowinfo: 0,
                addr: std::net::Ipv6Addr::LOCALHOST.octets(),
                scope_id: 0,
            }
        } else {
            SockAddr::V4 {
                port,
                addr: [127, 0, 0, 1],
            }
        }
    }

    fn port_taken(&self, port: u16) -> bool {
        self.entries.values().any(|e| match e {
            Entry::Socket(s) => !s.connected && s.local.is_some_and(|a| a.port() == port),
            Entry::Epoll(_) => false,
        })
    }

    fn peer_space(&self, s: &Socket) -> usize {
        match s.peer.and_then(|p| self.socket(p).ok()) {
            Some(peer) => self.rx_capacity.saturating_sub(peer.rx.len()),
            None => 0,
        }
    }

    /// Epoll-style readiness mask of `fd`.
    fn readiness(&self, fd: i32) -> FpResult<u32> {
        let s = match self.entries.get(&fd) {
            Some(Entry::Socket(s)) => s,
            Some(Entry::Epoll(_)) => return Ok(0),
            None => return err(OFP_EBADF),
        };
        let mut mask = 0;
        if !s.rx.is_empty() || !s.backlog.is_empty() || s.peer_closed || s.read_shut {
            mask |= OFP_EPOLLIN;
        }
        if s.connected && !s.write_shut && !s.peer_closed && self.peer_space(s) > 0 {
            mask |= OFP_EPOLLOUT;
        }
        if s.peer_closed {
            mask |= OFP_EPOLLHUP;
        }
        Ok(mask)
    }

    fn drop_socket(&mut self, s: Socket) {
        if let Some(peer) = s.peer {
            if let Ok(p) = self.socket_mut(peer) {
                p.peer = None;
                p.peer_closed = true;
            }
        }
        // Connections nobody accepted die with their listener.
        for pending in s.backlog {
            if let Some(Entry::Socket(child)) = self.entries.remove(&pending) {
                self.drop_socket(child);
            }
        }
    }
}

/// Loopback fast-path stack.
#[derive(Debug)]
pub struct LoopbackStack {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl LoopbackStack {
    /// An attached stack numbering descriptors from `offset`.
    #[must_use]
    pub fn new(offset: u32) -> Self {
        let stack = Self::detached(offset);
        stack.attach();
        stack
    }

    /// A stack that reports no parameters until [`Self::attach`] is called.
    #[must_use]
    pub fn detached(offset: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                offset,
                attached: false,
                next_fd: i32::try_from(offset).unwrap_or(i32::MAX),
                forced_fd: None,
                next_port: FIRST_EPHEMERAL_PORT,
                rx_capacity: DEFAULT_RX_CAPACITY,
                entries: HashMap::new(),
                calls: HashMap::new(),
                faults: Vec::new(),
            }),
            changed: Condvar::new(),
        }
    }

    /// Limit every socket's receive buffer to `capacity` bytes.
    #[must_use]
    pub fn with_rx_capacity(self, capacity: usize) -> Self {
        self.inner.lock().rx_capacity = capacity;
        self
    }

    pub fn attach(&self) {
        self.inner.lock().attached = true;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    fn notify(&self) {
        self.changed.notify_all();
    }

    /// Number of calls made to `op` so far.
    #[must_use]
    pub fn calls(&self, op: Op) -> u64 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of calls made to any operation so far.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.lock().calls.values().sum()
    }

    /// Fail the next call to `op` with `errno`.
    pub fn fail_next(&self, op: Op, errno: i32) {
        self.fail_nth(op, 1, errno);
    }

    /// Fail the `nth` upcoming call to `op` (1 = the next one) with `errno`.
    pub fn fail_nth(&self, op: Op, nth: u32, errno: i32) {
        self.lock().faults.push(Fault {
            op,
            countdown: nth.max(1),
            errno: FpErrno(errno),
        });
    }

    /// Hand out `raw` as the next descriptor number, whatever the offset.
    pub fn issue_next(&self, raw: i32) {
        self.lock().forced_fd = Some(raw);
    }

    #[must_use]
    pub fn is_open(&self, fd: i32) -> bool {
        self.lock().entries.contains_key(&fd)
    }

    #[must_use]
    pub fn is_nonblocking(&self, fd: i32) -> bool {
        self.lock().socket(fd).is_ok_and(|s| s.nonblocking)
    }

    /// Deliver `bytes` into the receive buffer of `fd` as if sent by a peer.
    pub fn deliver(&self, fd: i32, bytes: &[u8]) -> FpResult<()> {
        self.lock().socket_mut(fd)?.rx.extend(bytes);
        self.notify();
        Ok(())
    }

    /// Record an asynchronous failure on `fd`, as a refused non-blocking
    /// connect would. `errno` is in fast-path numbering.
    pub fn set_pending_error(&self, fd: i32, errno: i32) -> FpResult<()> {
        self.lock().socket_mut(fd)?.pending_error = errno;
        Ok(())
    }

    /// Block until `ready` holds over the state or `deadline` passes.
    fn wait_until<T>(
        &self,
        deadline: Option<Instant>,
        mut ready: impl FnMut(&mut Inner) -> FpResult<Option<T>>,
        idle: T,
    ) -> FpResult<T> {
        let mut inner = self.lock();
        loop {
            if let Some(v) = ready(&mut inner)? {
                return Ok(v);
            }
            match deadline {
                None => self.changed.wait(&mut inner),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(idle);
                    }
                    let _ = self.changed.wait_for(&mut inner, d - now);
                }
            }
        }
    }
}

impl FastPathStack for LoopbackStack {
    fn params(&self) -> Option<StackParams> {
        let inner = self.lock();
        inner.attached.then_some(StackParams {
            descriptor_offset: inner.offset,
        })
    }

    fn socket(&self, domain: i32, sock_type: i32, _protocol: i32) -> FpResult<FastPathFd> {
        let mut inner = self.lock();
        inner.enter(Op::Socket)?;
        if domain != OFP_AF_INET && domain != OFP_AF_INET6 {
            return err(OFP_EAFNOSUPPORT);
        }
        let fd = inner.allocate(Entry::Socket(Socket {
            domain,
            sock_type,
            ..Socket::default()
        }));
        Ok(FastPathFd::from_raw(fd))
    }

    fn bind(&self, fd: FastPathFd, addr: &SockAddr) -> FpResult<()> {
        let mut inner = self.lock();
        inner.enter(Op::Bind)?;
        let s = inner.socket(fd.raw())?;
        if s.local.is_some() {
            return err(OFP_EINVAL);
        }
        let domain = s.domain;
        let local = if addr.port() == 0 {
            let eph = inner.ephemeral(domain);
            with_port(addr, eph.port())
        } else {
            if inner.port_taken(addr.port()) {
                return err(OFP_EADDRINUSE);
            }
            *addr
        };
        inner.socket_mut(fd.raw())?.local = Some(local);
        Ok(())
    }

    fn connect(&self, fd: FastPathFd, addr: &SockAddr) -> FpResult<()> {
        let mut inner = self.lock();
        inner.enter(Op::Connect)?;
        let s = inner.socket(fd.raw())?;
        if s.connected {
            return err(OFP_EISCONN);
        }
        let domain = s.domain;
        let listener = inner
            .entries
            .iter()
            .find_map(|(&lfd, e)| match e {
                Entry::Socket(l)
                    if l.listening && l.local.is_some_and(|a| a.port() == addr.port()) =>
                {
                    Some(lfd)
                }
                _ => None,
            })
            .ok_or(FpErrno(OFP_ECONNREFUSED))?;

        let bound = inner.socket(fd.raw())?.local;
        let client_local = match bound {
            Some(a) => a,
            None => inner.ephemeral(domain),
        };
        let server_local = inner.socket(listener)?.local;
        let server = inner.allocate(Entry::Socket(Socket {
            domain,
            sock_type: OFP_SOCK_STREAM,
            local: server_local,
            remote: Some(client_local),
            peer: Some(fd.raw()),
            connected: true,
            ..Socket::default()
        }));
        let client = inner.socket_mut(fd.raw())?;
        client.local = Some(client_local);
        client.remote = Some(*addr);
        client.peer = Some(server);
        client.connected = true;
        inner.socket_mut(listener)?.backlog.push_back(server);
        drop(inner);
        self.notify();
        Ok(())
    }

    fn listen(&self, fd: FastPathFd, _backlog: i32) -> FpResult<()> {
        let mut inner = self.lock();
        inner.enter(Op::Listen)?;
        let s = inner.socket(fd.raw())?;
        if s.connected {
            return err(OFP_EINVAL);
        }
        if s.local.is_none() {
            let domain = s.domain;
            let eph = inner.ephemeral(domain);
            inner.socket_mut(fd.raw())?.local = Some(eph);
        }
        inner.socket_mut(fd.raw())?.listening = true;
        Ok(())
    }

    fn accept(&self, fd: FastPathFd) -> FpResult<(FastPathFd, Option<SockAddr>)> {
        let mut inner = self.lock();
        inner.enter(Op::Accept)?;
        let l = inner.socket_mut(fd.raw())?;
        if !l.listening {
            return err(OFP_EINVAL);
        }
        let child = l.backlog.pop_front().ok_or(FpErrno(OFP_EWOULDBLOCK))?;
        let remote = inner.socket(child)?.remote;
        Ok((FastPathFd::from_raw(child), remote))
    }

    fn shutdown(&self, fd: FastPathFd, how: i32) -> FpResult<()> {
        let mut inner = self.lock();
        inner.enter(Op::Shutdown)?;
        let s = inner.socket_mut(fd.raw())?;
        if !s.connected {
            return err(OFP_ENOTCONN);
        }
        let (rd, wr) = match how {
            OFP_SHUT_RD => (true, false),
            OFP_SHUT_WR => (false, true),
            OFP_SHUT_RDWR => (true, true),
            _ => return err(OFP_EINVAL),
        };
        s.read_shut |= rd;
        s.write_shut |= wr;
        let peer = s.peer;
        if wr {
            if let Some(p) = peer.and_then(|p| inner.socket_mut(p).ok()) {
                p.peer_closed = true;
            }
        }
        drop(inner);
        self.notify();
        Ok(())
    }

    fn close(&self, fd: FastPathFd) -> FpResult<()> {
        let mut inner = self.lock();
        inner.enter(Op::Close)?;
        match inner.entries.remove(&fd.raw()) {
            Some(Entry::Socket(s)) => inner.drop_socket(s),
            Some(Entry::Epoll(_)) => {}
            None => return err(OFP_EBADF),
        }
        for entry in inner.entries.values_mut() {
            if let Entry::Epoll(ep) = entry {
                ep.interest.remove(&fd.raw());
            }
        }
        drop(inner);
        self.notify();
        Ok(())
    }

    fn recv(&self, fd: FastPathFd, buf: &mut [u8], flags: i32) -> FpResult<usize> {
        let mut inner = self.lock();
        inner.enter(Op::Recv)?;
        let s = inner.socket_mut(fd.raw())?;
        if s.rx.is_empty() {
            if s.peer_closed || s.read_shut {
                return Ok(0);
            }
            if !s.connected {
                return err(OFP_ENOTCONN);
            }
            return err(OFP_EWOULDBLOCK);
        }
        let n = buf.len().min(s.rx.len());
        for (dst, src) in buf.iter_mut().zip(s.rx.iter()) {
            *dst = *src;
        }
        if flags & OFP_MSG_PEEK == 0 {
            s.rx.drain(..n);
        }
        drop(inner);
        self.notify();
        Ok(n)
    }

    fn send(&self, fd: FastPathFd, buf: &[u8], _flags: i32) -> FpResult<usize> {
        let mut inner = self.lock();
        inner.enter(Op::Send)?;
        let s = inner.socket(fd.raw())?;
        if s.write_shut || s.peer_closed {
            return err(OFP_EPIPE);
        }
        if !s.connected {
            return err(OFP_ENOTCONN);
        }
        let space = inner.peer_space(s);
        let peer = s.peer.ok_or(FpErrno(OFP_EPIPE))?;
        if space == 0 {
            return err(OFP_EWOULDBLOCK);
        }
        let n = buf.len().min(space);
        inner.socket_mut(peer)?.rx.extend(&buf[..n]);
        drop(inner);
        self.notify();
        Ok(n)
    }

    fn setsockopt(&self, fd: FastPathFd, level: i32, name: i32, value: &[u8]) -> FpResult<()> {
        let mut inner = self.lock();
        inner.enter(Op::SetSockOpt)?;
        inner
            .socket_mut(fd.raw())?
            .options
            .insert((level, name), value.to_vec());
        Ok(())
    }

    fn getsockopt(
        &self,
        fd: FastPathFd,
        level: i32,
        name: i32,
        value: &mut [u8],
    ) -> FpResult<usize> {
        let mut inner = self.lock();
        inner.enter(Op::GetSockOpt)?;
        let s = inner.socket_mut(fd.raw())?;
        let stored = match (level, name) {
            (OFP_SOL_SOCKET, OFP_SO_ERROR) => std::mem::take(&mut s.pending_error)
                .to_ne_bytes()
                .to_vec(),
            (OFP_SOL_SOCKET, OFP_SO_TYPE) => s.sock_type.to_ne_bytes().to_vec(),
            (OFP_SOL_SOCKET, OFP_SO_ACCEPTCONN) => i32::from(s.listening).to_ne_bytes().to_vec(),
            key => s
                .options
                .get(&key)
                .cloned()
                .ok_or(FpErrno(OFP_ENOPROTOOPT))?,
        };
        let n = value.len().min(stored.len());
        value[..n].copy_from_slice(&stored[..n]);
        Ok(n)
    }

    fn ioctl(&self, fd: FastPathFd, request: u64, arg: &mut i32) -> FpResult<()> {
        let mut inner = self.lock();
        inner.enter(Op::Ioctl)?;
        let s = inner.socket_mut(fd.raw())?;
        match request {
            OFP_FIONREAD => *arg = i32::try_from(s.rx.len()).unwrap_or(i32::MAX),
            OFP_FIONBIO => s.nonblocking = *arg != 0,
            OFP_FIOASYNC => s.async_io = *arg != 0,
            _ => return err(OFP_EINVAL),
        }
        Ok(())
    }

    fn select(
        &self,
        nfds: i32,
        read: &mut FdBitmap,
        write: &mut FdBitmap,
        timeout: Duration,
    ) -> FpResult<usize> {
        self.lock().enter(Op::Select)?;
        let deadline = Instant::now().checked_add(timeout);
        let (want_read, want_write) = (read.clone(), write.clone());
        let (ready_read, ready_write) = self.wait_until(
            deadline,
            |inner| {
                let mut r = FdBitmap::new();
                let mut w = FdBitmap::new();
                for fd in want_read.iter().filter(|&fd| fd < nfds) {
                    if inner.readiness(fd)? & OFP_EPOLLIN != 0 {
                        r.insert(fd);
                    }
                }
                for fd in want_write.iter().filter(|&fd| fd < nfds) {
                    if inner.readiness(fd)? & OFP_EPOLLOUT != 0 {
                        w.insert(fd);
                    }
                }
                Ok((!r.is_empty() || !w.is_empty()).then_some((r, w)))
            },
            (FdBitmap::new(), FdBitmap::new()),
        )?;
        *read = ready_read;
        *write = ready_write;
        Ok(read.len() + write.len())
    }

    fn epoll_create(&self, size: i32) -> FpResult<FastPathFd> {
        let mut inner = self.lock();
        inner.enter(Op::EpollCreate)?;
        if size <= 0 {
            return err(OFP_EINVAL);
        }
        Ok(FastPathFd::from_raw(inner.allocate(Entry::Epoll(Epoll::default()))))
    }

    fn epoll_ctl(
        &self,
        epfd: FastPathFd,
        op: i32,
        fd: i32,
        event: Option<&FpEpollEvent>,
    ) -> FpResult<()> {
        let mut inner = self.lock();
        inner.enter(Op::EpollCtl)?;
        inner.socket(fd)?;
        let ep = match inner.entries.get_mut(&epfd.raw()) {
            Some(Entry::Epoll(ep)) => ep,
            Some(Entry::Socket(_)) => return err(OFP_EINVAL),
            None => return err(OFP_EBADF),
        };
        match op {
            OFP_EPOLL_CTL_ADD => {
                let ev = event.ok_or(FpErrno(OFP_EFAULT))?;
                if ep.interest.contains_key(&fd) {
                    return err(OFP_EEXIST);
                }
                ep.interest.insert(fd, *ev);
            }
            OFP_EPOLL_CTL_MOD => {
                let ev = event.ok_or(FpErrno(OFP_EFAULT))?;
                let slot = ep.interest.get_mut(&fd).ok_or(FpErrno(OFP_ENOENT))?;
                *slot = *ev;
            }
            OFP_EPOLL_CTL_DEL => {
                ep.interest.remove(&fd).ok_or(FpErrno(OFP_ENOENT))?;
            }
            _ => return err(OFP_EINVAL),
        }
        Ok(())
    }

    fn epoll_wait(
        &self,
        epfd: FastPathFd,
        events: &mut [FpEpollEvent],
        timeout_ms: i32,
    ) -> FpResult<usize> {
        self.lock().enter(Op::EpollWait)?;
        if events.is_empty() {
            return err(OFP_EINVAL);
        }
        let deadline = u64::try_from(timeout_ms)
            .ok()
            .and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms)));
        let max = events.len();
        let ready = self.wait_until(
            deadline,
            |inner| {
                let interest = match inner.entries.get(&epfd.raw()) {
                    Some(Entry::Epoll(ep)) => ep.interest.clone(),
                    Some(Entry::Socket(_)) => return err(OFP_EINVAL),
                    None => return err(OFP_EBADF),
                };
                let mut out = Vec::new();
                for (fd, ev) in interest {
                    let mask = inner.readiness(fd)? & (ev.events | OFP_EPOLLERR | OFP_EPOLLHUP);
                    if mask != 0 {
                        out.push(FpEpollEvent {
                            events: mask,
                            data: ev.data,
                        });
                    }
                    if out.len() == max {
                        break;
                    }
                }
                Ok((!out.is_empty()).then_some(out))
            },
            Vec::new(),
        )?;
        events[..ready.len()].copy_from_slice(&ready);
        Ok(ready.len())
    }

    fn wait_writable(&self, fd: FastPathFd, slice: Duration) {
        let deadline = Instant::now().checked_add(slice);
        let _ = self.wait_until(
            deadline,
            |inner| Ok((inner.readiness(fd.raw())? & OFP_EPOLLOUT != 0).then_some(())),
            (),
        );
    }
}

fn with_port(addr: &SockAddr, port: u16) -> SockAddr {
    match *addr {
        SockAddr::V4 { addr, .. } => SockAddr::V4 { port, addr },
        SockAddr::V6 {
            flowinfo,
            addr,
            scope_id,
            ..
        } => SockAddr::V6 {
            port,
            flowinfo,
            addr,
            scope_id,
        },
    }
}
