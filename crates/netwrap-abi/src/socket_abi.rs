//! ABI layer for the `<sys/socket.h>` lifecycle calls.
//!
//! Each symbol dispatches through the process-wide [`Netwrap`] facade, which
//! routes fast-path descriptors to the stack and everything else to the next
//! libc definition.
//!
//! [`Netwrap`]: crate::facade::Netwrap

use std::ffi::c_int;

use libc::{sockaddr, socklen_t};

use crate::runtime;

// ---------------------------------------------------------------------------
// socket
// ---------------------------------------------------------------------------

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn socket(domain: c_int, sock_type: c_int, protocol: c_int) -> c_int {
    unsafe { runtime::process().socket(domain, sock_type, protocol) }
}

// ---------------------------------------------------------------------------
// bind / connect
// ---------------------------------------------------------------------------

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn bind(sockfd: c_int, addr: *const sockaddr, addrlen: socklen_t) -> c_int {
    unsafe { runtime::process().bind(sockfd, addr, addrlen) }
}

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn connect(
    sockfd: c_int,
    addr: *const sockaddr,
    addrlen: socklen_t,
) -> c_int {
    unsafe { runtime::process().connect(sockfd, addr, addrlen) }
}

// ---------------------------------------------------------------------------
// listen / accept / accept4
// ---------------------------------------------------------------------------

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn listen(sockfd: c_int, backlog: c_int) -> c_int {
    unsafe { runtime::process().listen(sockfd, backlog) }
}

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn accept(
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) -> c_int {
    unsafe { runtime::process().accept(sockfd, addr, addrlen) }
}

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn accept4(
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
    flags: c_int,
) -> c_int {
    unsafe { runtime::process().accept4(sockfd, addr, addrlen, flags) }
}

// ---------------------------------------------------------------------------
// shutdown / close
// ---------------------------------------------------------------------------

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn shutdown(sockfd: c_int, how: c_int) -> c_int {
    unsafe { runtime::process().shutdown(sockfd, how) }
}

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    unsafe { runtime::process().close(fd) }
}
