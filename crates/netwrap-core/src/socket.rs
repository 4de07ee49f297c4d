//! Host `<sys/socket.h>` constants.
//!
//! Linux x86_64/aarch64 values. The ABI crate's tests cross-check these
//! against the `libc` crate so a drift shows up as a test failure.

// ---------------------------------------------------------------------------
// Address families (AF_*)
// ---------------------------------------------------------------------------

/// Unix domain sockets.
pub const AF_UNIX: i32 = 1;
/// IPv4 Internet protocols.
pub const AF_INET: i32 = 2;
/// IPv6 Internet protocols.
pub const AF_INET6: i32 = 10;

// ---------------------------------------------------------------------------
// Socket types (SOCK_*)
// ---------------------------------------------------------------------------

pub const SOCK_STREAM: i32 = 1;
pub const SOCK_DGRAM: i32 = 2;
pub const SOCK_RAW: i32 = 3;
pub const SOCK_SEQPACKET: i32 = 5;

/// Set O_NONBLOCK on the new socket.
pub const SOCK_NONBLOCK: i32 = 0x800;
/// Set FD_CLOEXEC on the new socket.
pub const SOCK_CLOEXEC: i32 = 0x80000;

/// Mask covering the modifier flags ORed into the `type` argument.
pub const SOCK_TYPE_FLAG_MASK: i32 = SOCK_NONBLOCK | SOCK_CLOEXEC;

// ---------------------------------------------------------------------------
// Protocols
// ---------------------------------------------------------------------------

pub const IPPROTO_IP: i32 = 0;
pub const IPPROTO_ICMP: i32 = 1;
pub const IPPROTO_TCP: i32 = 6;
pub const IPPROTO_UDP: i32 = 17;
pub const IPPROTO_IPV6: i32 = 41;
pub const IPPROTO_ICMPV6: i32 = 58;
pub const IPPROTO_SCTP: i32 = 132;

// ---------------------------------------------------------------------------
// Shutdown modes
// ---------------------------------------------------------------------------

pub const SHUT_RD: i32 = 0;
pub const SHUT_WR: i32 = 1;
pub const SHUT_RDWR: i32 = 2;

// ---------------------------------------------------------------------------
// Socket-level options (SO_*)
// ---------------------------------------------------------------------------

pub const SOL_SOCKET: i32 = 1;

pub const SO_DEBUG: i32 = 1;
pub const SO_REUSEADDR: i32 = 2;
pub const SO_TYPE: i32 = 3;
pub const SO_ERROR: i32 = 4;
pub const SO_DONTROUTE: i32 = 5;
pub const SO_BROADCAST: i32 = 6;
pub const SO_SNDBUF: i32 = 7;
pub const SO_RCVBUF: i32 = 8;
pub const SO_KEEPALIVE: i32 = 9;
pub const SO_OOBINLINE: i32 = 10;
pub const SO_LINGER: i32 = 13;
pub const SO_REUSEPORT: i32 = 15;
pub const SO_RCVLOWAT: i32 = 18;
pub const SO_SNDLOWAT: i32 = 19;
pub const SO_RCVTIMEO: i32 = 20;
pub const SO_SNDTIMEO: i32 = 21;
pub const SO_ACCEPTCONN: i32 = 30;

// ---------------------------------------------------------------------------
// Message flags (MSG_*)
// ---------------------------------------------------------------------------

pub const MSG_OOB: i32 = 0x1;
pub const MSG_PEEK: i32 = 0x2;
pub const MSG_DONTROUTE: i32 = 0x4;
pub const MSG_CTRUNC: i32 = 0x8;
pub const MSG_TRUNC: i32 = 0x20;
pub const MSG_DONTWAIT: i32 = 0x40;
pub const MSG_EOR: i32 = 0x80;
pub const MSG_WAITALL: i32 = 0x100;
pub const MSG_NOSIGNAL: i32 = 0x4000;

// ---------------------------------------------------------------------------
// ioctl requests
// ---------------------------------------------------------------------------

/// Bytes available to read.
pub const FIONREAD: u64 = 0x541B;
/// Set/clear non-blocking mode.
pub const FIONBIO: u64 = 0x5421;
/// Set/clear async I/O notification.
pub const FIOASYNC: u64 = 0x5452;

// ---------------------------------------------------------------------------
// Struct sizes
// ---------------------------------------------------------------------------

/// `sizeof(struct sockaddr_in)`.
pub const SOCKADDR_IN_LEN: usize = 16;
/// `sizeof(struct sockaddr_in6)`.
pub const SOCKADDR_IN6_LEN: usize = 28;

/// Upper bound on `iovcnt` accepted by `writev`.
pub const IOV_MAX: i32 = 1024;

/// Capacity of a host `fd_set`.
pub const FD_SETSIZE: i32 = 1024;

/// Returns `true` for the families the fast path can carry.
#[inline]
pub fn is_inet_family(domain: i32) -> bool {
    matches!(domain, AF_INET | AF_INET6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inet_families() {
        assert!(is_inet_family(AF_INET));
        assert!(is_inet_family(AF_INET6));
        assert!(!is_inet_family(AF_UNIX));
        assert!(!is_inet_family(0));
        assert!(!is_inet_family(16));
    }

    #[test]
    fn flag_mask_covers_modifiers() {
        assert_eq!((SOCK_STREAM | SOCK_NONBLOCK) & SOCK_TYPE_FLAG_MASK, SOCK_NONBLOCK);
        assert_eq!((SOCK_DGRAM | SOCK_CLOEXEC) & !SOCK_TYPE_FLAG_MASK, SOCK_DGRAM);
    }
}
