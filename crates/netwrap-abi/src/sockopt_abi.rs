//! ABI layer for socket options and `ioctl`.

use std::ffi::{c_int, c_ulong, c_void};

use libc::socklen_t;

use crate::runtime;

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn setsockopt(
    sockfd: c_int,
    level: c_int,
    optname: c_int,
    optval: *const c_void,
    optlen: socklen_t,
) -> c_int {
    unsafe { runtime::process().setsockopt(sockfd, level, optname, optval, optlen) }
}

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn getsockopt(
    sockfd: c_int,
    level: c_int,
    optname: c_int,
    optval: *mut c_void,
    optlen: *mut socklen_t,
) -> c_int {
    unsafe { runtime::process().getsockopt(sockfd, level, optname, optval, optlen) }
}

/// `ioctl(fd, request, ...)` taking exactly one trailing pointer argument.
///
/// On the Linux calling conventions a variadic callee reads its first
/// variadic argument from the same register as a fixed third parameter, so
/// the fixed signature receives what every socket request passes.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn ioctl(fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int {
    unsafe { runtime::process().ioctl(fd, request, arg) }
}
