//! ABI layer for readiness: `select` and the epoll family.

use std::ffi::c_int;

use libc::{epoll_event, fd_set, timeval};

use crate::runtime;

// ---------------------------------------------------------------------------
// select
// ---------------------------------------------------------------------------

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn select(
    nfds: c_int,
    readfds: *mut fd_set,
    writefds: *mut fd_set,
    exceptfds: *mut fd_set,
    timeout: *mut timeval,
) -> c_int {
    unsafe { runtime::process().select(nfds, readfds, writefds, exceptfds, timeout) }
}

// ---------------------------------------------------------------------------
// epoll
// ---------------------------------------------------------------------------

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn epoll_create(size: c_int) -> c_int {
    unsafe { runtime::process().epoll_create(size) }
}

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn epoll_ctl(
    epfd: c_int,
    op: c_int,
    fd: c_int,
    event: *mut epoll_event,
) -> c_int {
    unsafe { runtime::process().epoll_ctl(epfd, op, fd, event) }
}

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn epoll_wait(
    epfd: c_int,
    events: *mut epoll_event,
    maxevents: c_int,
    timeout: c_int,
) -> c_int {
    unsafe { runtime::process().epoll_wait(epfd, events, maxevents, timeout) }
}
