//! # netwrap-core
//!
//! Safe, allocation-light logic behind the netwrap interposition shim.
//!
//! Everything here is pure Rust with no `unsafe`: the constant spaces of the
//! host libc and of the fast-path stack, the finite translation tables between
//! them, the descriptor classifier, the [`stack::FastPathStack`] seam, and the
//! emulation loops (`writev`, `sendfile64`, two-source readiness wait) that the
//! fast-path API has no native primitive for.
//!
//! ```text
//! C caller -> netwrap-abi entry -> classify -> translate -> FastPathStack
//!                                          \-> original libc symbol
//! ```

#![deny(unsafe_code)]

pub mod emulate;
pub mod errno;
pub mod error;
pub mod fd;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod ofp;
pub mod sockaddr;
pub mod socket;
pub mod stack;
pub mod translate;

pub use error::{FpResult, NetError};
pub use fd::{Descriptor, FastPathFd, Partition};
pub use stack::FastPathStack;
