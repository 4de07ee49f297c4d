//! Host errno constants and the fast-path errno space.
//!
//! The fast-path stack reports failures through its own thread-local error
//! value whose numbering follows the BSD layout. Values 1..=34 coincide with
//! Linux except for 11; everything from 35 upwards is shuffled. [`to_host`]
//! maps the known values and passes unknown ones through untouched.

use std::fmt;

// ---------------------------------------------------------------------------
// Host (Linux) errno values used by the shim
// ---------------------------------------------------------------------------

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EINTR: i32 = 4;
pub const EIO: i32 = 5;
pub const EBADF: i32 = 9;
pub const EAGAIN: i32 = 11;
pub const EACCES: i32 = 13;
pub const EFAULT: i32 = 14;
pub const EEXIST: i32 = 17;
pub const EINVAL: i32 = 22;
pub const EMFILE: i32 = 24;
pub const EPIPE: i32 = 32;
pub const EDEADLK: i32 = 35;
pub const ENAMETOOLONG: i32 = 36;
pub const ENOSYS: i32 = 38;
pub const ENOTEMPTY: i32 = 39;
pub const ELOOP: i32 = 40;
pub const ENOTSOCK: i32 = 88;
pub const EDESTADDRREQ: i32 = 89;
pub const EMSGSIZE: i32 = 90;
pub const EPROTOTYPE: i32 = 91;
pub const ENOPROTOOPT: i32 = 92;
pub const EPROTONOSUPPORT: i32 = 93;
pub const ESOCKTNOSUPPORT: i32 = 94;
pub const EOPNOTSUPP: i32 = 95;
pub const EPFNOSUPPORT: i32 = 96;
pub const EAFNOSUPPORT: i32 = 97;
pub const EADDRINUSE: i32 = 98;
pub const EADDRNOTAVAIL: i32 = 99;
pub const ENETDOWN: i32 = 100;
pub const ENETUNREACH: i32 = 101;
pub const ENETRESET: i32 = 102;
pub const ECONNABORTED: i32 = 103;
pub const ECONNRESET: i32 = 104;
pub const ENOBUFS: i32 = 105;
pub const EISCONN: i32 = 106;
pub const ENOTCONN: i32 = 107;
pub const ESHUTDOWN: i32 = 108;
pub const ETOOMANYREFS: i32 = 109;
pub const ETIMEDOUT: i32 = 110;
pub const ECONNREFUSED: i32 = 111;
pub const EHOSTDOWN: i32 = 112;
pub const EHOSTUNREACH: i32 = 113;
pub const EALREADY: i32 = 114;
pub const EINPROGRESS: i32 = 115;

// ---------------------------------------------------------------------------
// Fast-path errno
// ---------------------------------------------------------------------------

/// An error number in the fast-path stack's numbering.
///
/// Kept distinct from host errno so a raw fast-path value can never be stored
/// into the caller's `errno` without passing through [`to_host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FpErrno(pub i32);

impl FpErrno {
    /// Translate into the host numbering.
    #[must_use]
    pub fn to_host(self) -> i32 {
        to_host(self)
    }

    /// Whether the stack reported a would-block condition.
    #[must_use]
    pub const fn is_would_block(self) -> bool {
        self.0 == crate::ofp::OFP_EWOULDBLOCK
    }
}

impl fmt::Display for FpErrno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map a fast-path errno to the host value. Unmapped values pass through.
#[must_use]
pub fn to_host(err: FpErrno) -> i32 {
    use crate::ofp::*;
    match err.0 {
        OFP_EDEADLK => EDEADLK,
        OFP_EWOULDBLOCK => EAGAIN,
        OFP_EINPROGRESS => EINPROGRESS,
        OFP_EALREADY => EALREADY,
        OFP_ENOTSOCK => ENOTSOCK,
        OFP_EDESTADDRREQ => EDESTADDRREQ,
        OFP_EMSGSIZE => EMSGSIZE,
        OFP_EPROTOTYPE => EPROTOTYPE,
        OFP_ENOPROTOOPT => ENOPROTOOPT,
        OFP_EPROTONOSUPPORT => EPROTONOSUPPORT,
        OFP_ESOCKTNOSUPPORT => ESOCKTNOSUPPORT,
        OFP_EOPNOTSUPP => EOPNOTSUPP,
        OFP_EPFNOSUPPORT => EPFNOSUPPORT,
        OFP_EAFNOSUPPORT => EAFNOSUPPORT,
        OFP_EADDRINUSE => EADDRINUSE,
        OFP_EADDRNOTAVAIL => EADDRNOTAVAIL,
        OFP_ENETDOWN => ENETDOWN,
        OFP_ENETUNREACH => ENETUNREACH,
        OFP_ENETRESET => ENETRESET,
        OFP_ECONNABORTED => ECONNABORTED,
        OFP_ECONNRESET => ECONNRESET,
        OFP_ENOBUFS => ENOBUFS,
        OFP_EISCONN => EISCONN,
        OFP_ENOTCONN => ENOTCONN,
        OFP_ESHUTDOWN => ESHUTDOWN,
        OFP_ETOOMANYREFS => ETOOMANYREFS,
        OFP_ETIMEDOUT => ETIMEDOUT,
        OFP_ECONNREFUSED => ECONNREFUSED,
        OFP_ELOOP => ELOOP,
        OFP_ENAMETOOLONG => ENAMETOOLONG,
        OFP_EHOSTDOWN => EHOSTDOWN,
        OFP_EHOSTUNREACH => EHOSTUNREACH,
        OFP_ENOTEMPTY => ENOTEMPTY,
        OFP_ENOSYS => ENOSYS,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_low_values_pass_through() {
        assert_eq!(to_host(FpErrno(EPERM)), EPERM);
        assert_eq!(to_host(FpErrno(EBADF)), EBADF);
        assert_eq!(to_host(FpErrno(EINVAL)), EINVAL);
        assert_eq!(to_host(FpErrno(EMFILE)), EMFILE);
    }

    #[test]
    fn would_block_becomes_eagain() {
        let e = FpErrno(crate::ofp::OFP_EWOULDBLOCK);
        assert!(e.is_would_block());
        assert_eq!(e.to_host(), EAGAIN);
    }

    #[test]
    fn bsd_eleven_is_deadlock_not_eagain() {
        assert_eq!(to_host(FpErrno(11)), EDEADLK);
    }

    #[test]
    fn socket_range_is_remapped() {
        assert_eq!(to_host(FpErrno(crate::ofp::OFP_ECONNREFUSED)), ECONNREFUSED);
        assert_eq!(to_host(FpErrno(crate::ofp::OFP_EINPROGRESS)), EINPROGRESS);
        assert_eq!(to_host(FpErrno(crate::ofp::OFP_EADDRINUSE)), EADDRINUSE);
        assert_eq!(to_host(FpErrno(crate::ofp::OFP_ENOTCONN)), ENOTCONN);
    }

    #[test]
    fn unknown_values_pass_through() {
        assert_eq!(to_host(FpErrno(4242)), 4242);
        assert_eq!(to_host(FpErrno(-7)), -7);
    }
}
