//! Finite translation tables between host and fast-path constants.
//!
//! Each table is total over the values it recognizes. What happens to the
//! rest is decided per table: socket types and protocols pass through
//! verbatim, message flags drop unknown bits, and socket options, shutdown
//! modes and ioctl requests reject with an errno.

use crate::errno;
use crate::ofp::*;
use crate::socket::*;

/// A value the fast path cannot express, with the errno to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsupported {
    pub errno: i32,
}

const fn unsupported(errno: i32) -> Unsupported {
    Unsupported { errno }
}

// ---------------------------------------------------------------------------
// socket()
// ---------------------------------------------------------------------------

/// Host address family to fast-path family. Only internet families map.
#[must_use]
pub fn domain(host: i32) -> Option<i32> {
    match host {
        AF_INET => Some(OFP_AF_INET),
        AF_INET6 => Some(OFP_AF_INET6),
        _ => None,
    }
}

/// Fast-path address family back to the host value.
#[must_use]
pub fn domain_to_host(fp: i32) -> Option<i32> {
    match fp {
        OFP_AF_INET => Some(AF_INET),
        OFP_AF_INET6 => Some(AF_INET6),
        _ => None,
    }
}

/// Socket type with `SOCK_NONBLOCK`/`SOCK_CLOEXEC` already stripped.
#[must_use]
pub fn sock_type(host: i32) -> i32 {
    match host {
        SOCK_STREAM => OFP_SOCK_STREAM,
        SOCK_DGRAM => OFP_SOCK_DGRAM,
        SOCK_RAW => OFP_SOCK_RAW,
        SOCK_SEQPACKET => OFP_SOCK_SEQPACKET,
        other => other,
    }
}

#[must_use]
pub fn protocol(host: i32) -> i32 {
    match host {
        IPPROTO_IP => OFP_IPPROTO_IP,
        IPPROTO_ICMP => OFP_IPPROTO_ICMP,
        IPPROTO_TCP => OFP_IPPROTO_TCP,
        IPPROTO_UDP => OFP_IPPROTO_UDP,
        IPPROTO_IPV6 => OFP_IPPROTO_IPV6,
        IPPROTO_ICMPV6 => OFP_IPPROTO_ICMPV6,
        IPPROTO_SCTP => OFP_IPPROTO_SCTP,
        other => other,
    }
}

/// Decoded `socket()` arguments in fast-path terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketRequest {
    pub domain: i32,
    pub sock_type: i32,
    pub protocol: i32,
    pub nonblocking: bool,
}

/// Translate the `socket()` triple, or `None` for non-internet families.
#[must_use]
pub fn socket_request(host_domain: i32, host_type: i32, host_protocol: i32) -> Option<SocketRequest> {
    let domain = domain(host_domain)?;
    Some(SocketRequest {
        domain,
        sock_type: sock_type(host_type & !SOCK_TYPE_FLAG_MASK),
        protocol: protocol(host_protocol),
        nonblocking: host_type & SOCK_NONBLOCK != 0,
    })
}

// ---------------------------------------------------------------------------
// shutdown()
// ---------------------------------------------------------------------------

pub fn shutdown_how(host: i32) -> Result<i32, Unsupported> {
    match host {
        SHUT_RD => Ok(OFP_SHUT_RD),
        SHUT_WR => Ok(OFP_SHUT_WR),
        SHUT_RDWR => Ok(OFP_SHUT_RDWR),
        _ => Err(unsupported(errno::EINVAL)),
    }
}

// ---------------------------------------------------------------------------
// setsockopt()/getsockopt()
// ---------------------------------------------------------------------------

fn socket_option(host: i32) -> Option<i32> {
    Some(match host {
        SO_DEBUG => OFP_SO_DEBUG,
        SO_ACCEPTCONN => OFP_SO_ACCEPTCONN,
        SO_REUSEADDR => OFP_SO_REUSEADDR,
        SO_KEEPALIVE => OFP_SO_KEEPALIVE,
        SO_DONTROUTE => OFP_SO_DONTROUTE,
        SO_BROADCAST => OFP_SO_BROADCAST,
        SO_LINGER => OFP_SO_LINGER,
        SO_OOBINLINE => OFP_SO_OOBINLINE,
        SO_REUSEPORT => OFP_SO_REUSEPORT,
        SO_SNDBUF => OFP_SO_SNDBUF,
        SO_RCVBUF => OFP_SO_RCVBUF,
        SO_SNDLOWAT => OFP_SO_SNDLOWAT,
        SO_RCVLOWAT => OFP_SO_RCVLOWAT,
        SO_SNDTIMEO => OFP_SO_SNDTIMEO,
        SO_RCVTIMEO => OFP_SO_RCVTIMEO,
        SO_ERROR => OFP_SO_ERROR,
        SO_TYPE => OFP_SO_TYPE,
        _ => return None,
    })
}

/// Translate `(level, optname)`.
///
/// `SOL_SOCKET` options go through the table; any other level is assumed to
/// be numbered identically on both sides (protocol-level options).
pub fn sockopt(level: i32, optname: i32) -> Result<(i32, i32), Unsupported> {
    if level != SOL_SOCKET {
        return Ok((level, optname));
    }
    socket_option(optname)
        .map(|name| (OFP_SOL_SOCKET, name))
        .ok_or(unsupported(errno::ENOPROTOOPT))
}

// ---------------------------------------------------------------------------
// Message flags
// ---------------------------------------------------------------------------

const MSG_TABLE: [(i32, i32); 9] = [
    (MSG_OOB, OFP_MSG_OOB),
    (MSG_PEEK, OFP_MSG_PEEK),
    (MSG_DONTROUTE, OFP_MSG_DONTROUTE),
    (MSG_CTRUNC, OFP_MSG_CTRUNC),
    (MSG_TRUNC, OFP_MSG_TRUNC),
    (MSG_DONTWAIT, OFP_MSG_DONTWAIT),
    (MSG_EOR, OFP_MSG_EOR),
    (MSG_WAITALL, OFP_MSG_WAITALL),
    (MSG_NOSIGNAL, OFP_MSG_NOSIGNAL),
];

/// Translate a `MSG_*` bitmask. Bits with no fast-path counterpart are dropped.
#[must_use]
pub fn msg_flags(host: i32) -> i32 {
    MSG_TABLE
        .iter()
        .filter(|(h, _)| host & h != 0)
        .fold(0, |acc, (_, fp)| acc | fp)
}

// ---------------------------------------------------------------------------
// ioctl()
// ---------------------------------------------------------------------------

/// The control requests the fast path understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlRequest {
    /// Bytes available to read (`FIONREAD`).
    BytesAvailable,
    /// Set/clear non-blocking mode (`FIONBIO`).
    NonBlocking,
    /// Set/clear async notification (`FIOASYNC`).
    Async,
}

impl IoctlRequest {
    pub fn from_host(request: u64) -> Result<Self, Unsupported> {
        match request {
            FIONREAD => Ok(Self::BytesAvailable),
            FIONBIO => Ok(Self::NonBlocking),
            FIOASYNC => Ok(Self::Async),
            _ => Err(unsupported(errno::EINVAL)),
        }
    }

    #[must_use]
    pub const fn to_ofp(self) -> u64 {
        match self {
            Self::BytesAvailable => OFP_FIONREAD,
            Self::NonBlocking => OFP_FIONBIO,
            Self::Async => OFP_FIOASYNC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_request_translates_inet() {
        let req = socket_request(AF_INET6, SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC, IPPROTO_TCP)
            .expect("inet6 maps");
        assert_eq!(req.domain, OFP_AF_INET6);
        assert_eq!(req.sock_type, OFP_SOCK_STREAM);
        assert_eq!(req.protocol, OFP_IPPROTO_TCP);
        assert!(req.nonblocking);
    }

    #[test]
    fn socket_request_rejects_other_families() {
        assert_eq!(socket_request(AF_UNIX, SOCK_STREAM, 0), None);
        assert_eq!(socket_request(16, SOCK_RAW, 0), None);
    }

    #[test]
    fn unknown_type_and_protocol_pass_verbatim() {
        let req = socket_request(AF_INET, 9, 253).expect("inet maps");
        assert_eq!(req.sock_type, 9);
        assert_eq!(req.protocol, 253);
        assert!(!req.nonblocking);
    }

    #[test]
    fn domain_round_trip() {
        assert_eq!(domain(AF_INET).and_then(domain_to_host), Some(AF_INET));
        assert_eq!(domain(AF_INET6).and_then(domain_to_host), Some(AF_INET6));
        assert_eq!(domain_to_host(99), None);
    }

    #[test]
    fn shutdown_table() {
        assert_eq!(shutdown_how(SHUT_RD), Ok(OFP_SHUT_RD));
        assert_eq!(shutdown_how(SHUT_WR), Ok(OFP_SHUT_WR));
        assert_eq!(shutdown_how(SHUT_RDWR), Ok(OFP_SHUT_RDWR));
        assert_eq!(shutdown_how(3), Err(unsupported(errno::EINVAL)));
        assert_eq!(shutdown_how(-1), Err(unsupported(errno::EINVAL)));
    }

    #[test]
    fn socket_level_options_are_remapped() {
        assert_eq!(
            sockopt(SOL_SOCKET, SO_REUSEADDR),
            Ok((OFP_SOL_SOCKET, OFP_SO_REUSEADDR))
        );
        assert_eq!(
            sockopt(SOL_SOCKET, SO_RCVBUF),
            Ok((OFP_SOL_SOCKET, OFP_SO_RCVBUF))
        );
        assert_eq!(
            sockopt(SOL_SOCKET, SO_ERROR),
            Ok((OFP_SOL_SOCKET, OFP_SO_ERROR))
        );
    }

    #[test]
    fn unlisted_socket_option_is_not_supported() {
        // SO_PASSCRED has no fast-path counterpart.
        assert_eq!(sockopt(SOL_SOCKET, 16), Err(unsupported(errno::ENOPROTOOPT)));
    }

    #[test]
    fn protocol_level_options_pass_through() {
        // TCP_NODELAY
        assert_eq!(sockopt(IPPROTO_TCP, 1), Ok((IPPROTO_TCP, 1)));
        assert_eq!(sockopt(IPPROTO_IP, 16), Ok((IPPROTO_IP, 16)));
    }

    #[test]
    fn msg_flags_translate_and_drop_unknown() {
        assert_eq!(msg_flags(0), 0);
        assert_eq!(msg_flags(MSG_PEEK), OFP_MSG_PEEK);
        assert_eq!(msg_flags(MSG_DONTWAIT), OFP_MSG_DONTWAIT);
        assert_eq!(
            msg_flags(MSG_WAITALL | MSG_NOSIGNAL),
            OFP_MSG_WAITALL | OFP_MSG_NOSIGNAL
        );
        // MSG_CONFIRM (0x800) and MSG_MORE (0x8000) have no counterpart.
        assert_eq!(msg_flags(MSG_PEEK | 0x800 | 0x8000), OFP_MSG_PEEK);
    }

    #[test]
    fn ioctl_recognizes_exactly_three_requests() {
        assert_eq!(IoctlRequest::from_host(FIONREAD), Ok(IoctlRequest::BytesAvailable));
        assert_eq!(IoctlRequest::from_host(FIONBIO), Ok(IoctlRequest::NonBlocking));
        assert_eq!(IoctlRequest::from_host(FIOASYNC), Ok(IoctlRequest::Async));
        // TIOCGWINSZ
        assert_eq!(IoctlRequest::from_host(0x5413), Err(unsupported(errno::EINVAL)));
        assert_eq!(IoctlRequest::BytesAvailable.to_ofp(), OFP_FIONREAD);
        assert_eq!(IoctlRequest::NonBlocking.to_ofp(), OFP_FIONBIO);
        assert_eq!(IoctlRequest::Async.to_ofp(), OFP_FIOASYNC);
    }
}
