// Every extern "C" export takes raw pointers straight from C callers and keeps
// the libc contract of the call it replaces.
#![allow(clippy::missing_safety_doc)]
//! # netwrap-abi
//!
//! Interposition layer for the netwrap shim. Built as a `cdylib`
//! (`libnetwrap.so`) and loaded with `LD_PRELOAD`, it exports the socket API
//! and routes every call by descriptor: sockets issued by the fast-path
//! stack go to the stack, everything else goes to the next libc definition.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> Netwrap facade -> classify
//!     fast-path fd  -> translate -> FastPathStack (OfpBackend)
//!     kernel fd     -> Kernel (NextLibc, via dlsym(RTLD_NEXT))
//! ```
//!
//! Until bootstrap finds a configured stack, every call is forwarded.
//! [`facade::Netwrap`] is public so applications can drive the same routing
//! explicitly instead of relying on symbol interposition.

pub mod facade;
pub mod kernel;
pub mod ofp_backend;
pub mod resolver;
pub mod runtime;
mod util;

// Exported symbols (read, write, close, ...) would shadow libc inside the
// unit-test binary.
#[cfg(not(test))]
pub mod control_abi;
#[cfg(not(test))]
pub mod io_abi;
#[cfg(not(test))]
pub mod poll_abi;
#[cfg(not(test))]
pub mod socket_abi;
#[cfg(not(test))]
pub mod sockopt_abi;

pub use facade::Netwrap;
pub use kernel::{DirectLibc, Kernel, NEXT_LIBC, NextLibc};
