//! Control symbols: explicit bootstrap and readiness query.

use std::ffi::c_int;

use netwrap_core::errno;
use netwrap_runtime::{BootstrapError, global_state};

use crate::runtime;
use crate::util::fail_int;

/// Bring the shim to ready. Returns 0 once ready; -1 with `errno` set to
/// `EAGAIN` while the stack is not configured or `ENOSYS` if no stack is
/// present in the process.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub extern "C" fn netwrap_initialize() -> c_int {
    match runtime::initialize() {
        Ok(_) => 0,
        Err(BootstrapError::NotAttached) => fail_int(errno::EAGAIN),
        Err(BootstrapError::OffsetOutOfRange(_)) => fail_int(errno::EINVAL),
        Err(BootstrapError::StackUnavailable(_)) => fail_int(errno::ENOSYS),
    }
}

/// 1 once fast-path routing is active, else 0.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub extern "C" fn netwrap_is_ready() -> c_int {
    c_int::from(global_state().is_ready())
}
