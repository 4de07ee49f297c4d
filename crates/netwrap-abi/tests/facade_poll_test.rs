//! Readiness through the routing facade: select over fast-path sockets,
//! kernel descriptors and both at once, and the epoll family on each side.

use std::ffi::c_int;
use std::mem::size_of;
use std::ptr;
use std::time::{Duration, Instant};

use libc::{epoll_event, fd_set, sockaddr_in, socklen_t, timeval};
use netwrap_abi::{DirectLibc, Netwrap};
use netwrap_core::loopback::{LoopbackStack, Op};
use netwrap_runtime::{ProcessState, ShimCounters};

const OFFSET: u32 = 1000;

fn errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

struct Rig {
    stack: LoopbackStack,
    state: ProcessState,
    counters: ShimCounters,
}

impl Rig {
    fn new() -> Self {
        Self {
            stack: LoopbackStack::new(OFFSET),
            state: ProcessState::new(),
            counters: ShimCounters::new(),
        }
    }

    fn ready() -> Self {
        let rig = Self::new();
        rig.state.initialize(|| Ok(Some(OFFSET))).unwrap();
        rig
    }

    fn nw(&self) -> Netwrap<'_, DirectLibc> {
        Netwrap::new(&DirectLibc, &self.state)
            .with_stack(&self.stack)
            .with_counters(&self.counters)
    }
}

fn pair(nw: &Netwrap<'_, DirectLibc>, port: u16) -> (c_int, c_int) {
    let mut sa: sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = port.to_be();
    sa.sin_addr.s_addr = u32::from_ne_bytes([127, 0, 0, 1]);
    let addr = ptr::from_ref(&sa).cast();
    let len = size_of::<sockaddr_in>() as socklen_t;
    unsafe {
        let l = nw.socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        assert_eq!(nw.bind(l, addr, len), 0);
        assert_eq!(nw.listen(l, 4), 0);
        let c = nw.socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        assert_eq!(nw.connect(c, addr, len), 0);
        let s = nw.accept(l, ptr::null_mut(), ptr::null_mut());
        (c, s)
    }
}

fn pipe() -> [c_int; 2] {
    let mut fds = [0 as c_int; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    fds
}

fn close_pipe(fds: [c_int; 2]) {
    unsafe {
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
}

fn set_of(fds: &[c_int]) -> fd_set {
    let mut set: fd_set = unsafe { std::mem::zeroed() };
    for &fd in fds {
        unsafe { libc::FD_SET(fd, &mut set) };
    }
    set
}

fn is_set(fd: c_int, set: &fd_set) -> bool {
    unsafe { libc::FD_ISSET(fd, set) }
}

fn tv(d: Duration) -> timeval {
    timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    }
}

fn tv_duration(t: &timeval) -> Duration {
    Duration::new(t.tv_sec as u64, t.tv_usec as u32 * 1000)
}

// ---------------------------------------------------------------------------
// select
// ---------------------------------------------------------------------------

#[test]
fn select_zero_timeout_polls_the_stack_once() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let (_c, s) = pair(&nw, 9000);
    let mut rd = set_of(&[s]);
    let mut t = tv(Duration::ZERO);
    let rc = unsafe { nw.select(s + 1, &mut rd, ptr::null_mut(), ptr::null_mut(), &mut t) };
    assert_eq!(rc, 0);
    assert!(!is_set(s, &rd));
    assert_eq!(rig.stack.calls(Op::Select), 1);
}

#[test]
fn select_wakes_when_data_arrives() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let (_c, s) = pair(&nw, 9001);
    let mut rd = set_of(&[s]);
    let mut t = tv(Duration::from_secs(1));

    let start = Instant::now();
    let rc = std::thread::scope(|scope| {
        let stack = &rig.stack;
        scope.spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            stack.deliver(s, b"x").unwrap();
        });
        unsafe { nw.select(s + 1, &mut rd, ptr::null_mut(), ptr::null_mut(), &mut t) }
    });
    let elapsed = start.elapsed();

    assert_eq!(rc, 1);
    assert!(is_set(s, &rd));
    assert!(elapsed >= Duration::from_millis(150), "woke early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "missed wakeup: {elapsed:?}");
    let left = tv_duration(&t);
    assert!(left > Duration::ZERO && left < Duration::from_secs(1), "left {left:?}");
}

#[test]
fn select_timeout_is_spent_and_written_back() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let (_c, s) = pair(&nw, 9002);
    let mut rd = set_of(&[s]);
    let mut t = tv(Duration::from_millis(50));
    let start = Instant::now();
    let rc = unsafe { nw.select(s + 1, &mut rd, ptr::null_mut(), ptr::null_mut(), &mut t) };
    assert_eq!(rc, 0);
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(tv_duration(&t), Duration::ZERO);
}

#[test]
fn select_reports_writable_connected_socket() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let (c, s) = pair(&nw, 9003);
    let mut rd = set_of(&[c, s]);
    let mut wr = set_of(&[c]);
    let mut t = tv(Duration::ZERO);
    let rc = unsafe { nw.select(c.max(s) + 1, &mut rd, &mut wr, ptr::null_mut(), &mut t) };
    assert_eq!(rc, 1);
    assert!(is_set(c, &wr));
    assert!(!is_set(c, &rd) && !is_set(s, &rd));
}

#[test]
fn select_over_both_descriptor_spaces() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let (_c, s) = pair(&nw, 9004);
    let p = pipe();
    assert_eq!(unsafe { libc::write(p[1], b"k".as_ptr().cast(), 1) }, 1);

    let mut rd = set_of(&[p[0], s]);
    let mut t = tv(Duration::from_millis(500));
    let rc = unsafe { nw.select(s + 1, &mut rd, ptr::null_mut(), ptr::null_mut(), &mut t) };
    assert_eq!(rc, 1);
    assert!(is_set(p[0], &rd));
    assert!(!is_set(s, &rd));

    rig.stack.deliver(s, b"f").unwrap();
    let mut rd = set_of(&[p[0], s]);
    let mut t = tv(Duration::ZERO);
    let rc = unsafe { nw.select(s + 1, &mut rd, ptr::null_mut(), ptr::null_mut(), &mut t) };
    assert_eq!(rc, 2);
    assert!(is_set(p[0], &rd) && is_set(s, &rd));
    close_pipe(p);
}

#[test]
fn select_kernel_only_passes_through() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let p = pipe();
    assert_eq!(unsafe { libc::write(p[1], b"k".as_ptr().cast(), 1) }, 1);
    let mut rd = set_of(&[p[0]]);
    let mut t = tv(Duration::from_millis(100));
    let rc = unsafe { nw.select(p[0] + 1, &mut rd, ptr::null_mut(), ptr::null_mut(), &mut t) };
    assert_eq!(rc, 1);
    assert!(is_set(p[0], &rd));
    assert_eq!(rig.stack.total_calls(), 0);
    close_pipe(p);
}

#[test]
fn select_never_reports_fast_path_exceptions() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let (_c, s) = pair(&nw, 9005);
    rig.stack.deliver(s, b"x").unwrap();
    let mut ex = set_of(&[s]);
    let mut t = tv(Duration::ZERO);
    let rc = unsafe { nw.select(s + 1, ptr::null_mut(), ptr::null_mut(), &mut ex, &mut t) };
    assert_eq!(rc, 0);
    assert!(!is_set(s, &ex));
}

#[test]
fn select_rejects_negative_timeout() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let (_c, s) = pair(&nw, 9006);
    let mut rd = set_of(&[s]);
    let mut t = timeval {
        tv_sec: -1,
        tv_usec: 0,
    };
    let rc = unsafe { nw.select(s + 1, &mut rd, ptr::null_mut(), ptr::null_mut(), &mut t) };
    assert_eq!(rc, -1);
    assert_eq!(errno(), libc::EINVAL);
    assert_eq!(rig.stack.calls(Op::Select), 0);
}

// ---------------------------------------------------------------------------
// epoll
// ---------------------------------------------------------------------------

fn interest(events: u32, data: u64) -> epoll_event {
    epoll_event { events, u64: data }
}

#[test]
fn fast_epoll_reports_registered_readiness() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let (_c, s) = pair(&nw, 9100);
    let ep = unsafe { nw.epoll_create(1) };
    assert!(ep >= OFFSET as c_int);

    let mut ev = interest(libc::EPOLLIN as u32, 42);
    assert_eq!(unsafe { nw.epoll_ctl(ep, libc::EPOLL_CTL_ADD, s, &mut ev) }, 0);

    let mut out = [interest(0, 0); 8];
    assert_eq!(unsafe { nw.epoll_wait(ep, out.as_mut_ptr(), 8, 0) }, 0);

    rig.stack.deliver(s, b"ping").unwrap();
    assert_eq!(unsafe { nw.epoll_wait(ep, out.as_mut_ptr(), 8, 100) }, 1);
    let first = out[0];
    let (events, data) = (first.events, first.u64);
    assert_ne!(events & libc::EPOLLIN as u32, 0);
    assert_eq!(data, 42);
    assert_eq!(rig.stack.calls(Op::EpollWait), 2);
}

#[test]
fn fast_epoll_ctl_modify_and_delete() {
    let rig = Rig::ready();
    let nw = rig.nw();
    let (_c, s) = pair(&nw, 9101);
    let ep = unsafe { nw.epoll_create(4) };
    let mut ev = interest(libc::EPOLLIN as u32, 1);
    unsafe {
        assert_eq!(nw.epoll_ctl(ep, libc::EPOLL_CTL_ADD, s, &mut ev), 0);
        assert_eq!(nw.epoll_ctl(ep, libc::EPOLL_CTL_ADD, s, &mut ev), -1);
        assert_eq!(errno(), libc::EEXIST);
        let mut ev = interest(libc::EPOLLIN as u32, 2);
        assert_eq!(nw.epoll_ctl(ep, libc::EPOLL_CTL_MOD, s, &mut ev), 0);
        assert_eq!(nw.epoll_ctl(ep, libc::EPOLL_CTL_DEL, s, ptr::null_mut()), 0);
        assert_eq!(nw.epoll_ctl(ep, libc::EPOLL_CTL_DEL, s, ptr::null_mut()), -1);
        assert_eq!(errno(), libc::ENOENT);
    }
}

#[test]
fn fast_epoll_argument_checks() {
    let rig = Rig::ready();
    let nw = rig.nw();
    assert_eq!(unsafe { nw.epoll_create(0) }, -1);
    assert_eq!(errno(), libc::EINVAL);

    let ep = unsafe { nw.epoll_create(1) };
    let mut out = [interest(0, 0); 1];
    assert_eq!(unsafe { nw.epoll_wait(ep, out.as_mut_ptr(), 0, 0) }, -1);
    assert_eq!(errno(), libc::EINVAL);
    assert_eq!(unsafe { nw.epoll_wait(ep, ptr::null_mut(), 1, 0) }, -1);
    assert_eq!(errno(), libc::EFAULT);
    assert_eq!(rig.stack.calls(Op::EpollWait), 0);
}

#[test]
fn kernel_epoll_before_ready() {
    let rig = Rig::new();
    let nw = rig.nw();
    let ep = unsafe { nw.epoll_create(1) };
    assert!(ep >= 0 && ep < OFFSET as c_int);
    let p = pipe();
    let mut ev = interest(libc::EPOLLIN as u32, 7);
    assert_eq!(unsafe { nw.epoll_ctl(ep, libc::EPOLL_CTL_ADD, p[0], &mut ev) }, 0);
    assert_eq!(unsafe { libc::write(p[1], b"k".as_ptr().cast(), 1) }, 1);

    let mut out = [interest(0, 0); 4];
    assert_eq!(unsafe { nw.epoll_wait(ep, out.as_mut_ptr(), 4, 100) }, 1);
    let data = out[0].u64;
    assert_eq!(data, 7);
    assert_eq!(rig.stack.total_calls(), 0);

    close_pipe(p);
    unsafe { nw.close(ep) };
}
