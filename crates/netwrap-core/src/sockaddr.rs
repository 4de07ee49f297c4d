//! Internet socket addresses as carried between the two APIs.
//!
//! The host side is decoded from and encoded into the raw bytes of a Linux
//! `sockaddr_in` / `sockaddr_in6`; the fast-path backend lays the same fields
//! out in its BSD-style structures. Port and address bytes stay in network
//! order throughout; IPv6 flow label and scope id are copied as stored.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::errno;
use crate::socket::{AF_INET, AF_INET6, SOCKADDR_IN_LEN, SOCKADDR_IN6_LEN};

/// An IPv4 or IPv6 endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockAddr {
    V4 {
        /// Port in host order.
        port: u16,
        addr: [u8; 4],
    },
    V6 {
        /// Port in host order.
        port: u16,
        flowinfo: u32,
        addr: [u8; 16],
        scope_id: u32,
    },
}

impl SockAddr {
    /// Size of the host structure for this family.
    #[must_use]
    pub const fn host_len(&self) -> usize {
        match self {
            Self::V4 { .. } => SOCKADDR_IN_LEN,
            Self::V6 { .. } => SOCKADDR_IN6_LEN,
        }
    }

    /// Host address family constant.
    #[must_use]
    pub const fn host_family(&self) -> i32 {
        match self {
            Self::V4 { .. } => AF_INET,
            Self::V6 { .. } => AF_INET6,
        }
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        match self {
            Self::V4 { port, .. } | Self::V6 { port, .. } => *port,
        }
    }

    /// Decode a host `sockaddr` of exactly the expected size.
    ///
    /// Fails `EINVAL` when the length does not match the declared family's
    /// structure and `EAFNOSUPPORT` for non-internet families.
    pub fn decode_host(bytes: &[u8]) -> Result<Self, i32> {
        if bytes.len() < 2 {
            return Err(errno::EINVAL);
        }
        let family = i32::from(u16::from_ne_bytes([bytes[0], bytes[1]]));
        match family {
            AF_INET => {
                if bytes.len() != SOCKADDR_IN_LEN {
                    return Err(errno::EINVAL);
                }
                Ok(Self::V4 {
                    port: u16::from_be_bytes([bytes[2], bytes[3]]),
                    addr: [bytes[4], bytes[5], bytes[6], bytes[7]],
                })
            }
            AF_INET6 => {
                if bytes.len() != SOCKADDR_IN6_LEN {
                    return Err(errno::EINVAL);
                }
                let mut addr = [0u8; 16];
                addr.copy_from_slice(&bytes[8..24]);
                Ok(Self::V6 {
                    port: u16::from_be_bytes([bytes[2], bytes[3]]),
                    flowinfo: u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
                    addr,
                    scope_id: u32::from_ne_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
                })
            }
            _ => Err(errno::EAFNOSUPPORT),
        }
    }

    /// Write the host structure into `out`, truncating to `out.len()`.
    ///
    /// Returns the full structure size, which callers report through
    /// `*addrlen` even when the copy was truncated.
    pub fn encode_host(&self, out: &mut [u8]) -> usize {
        let mut full = [0u8; SOCKADDR_IN6_LEN];
        let family = (self.host_family() as u16).to_ne_bytes();
        full[0..2].copy_from_slice(&family);
        full[2..4].copy_from_slice(&self.port().to_be_bytes());
        match self {
            Self::V4 { addr, .. } => {
                full[4..8].copy_from_slice(addr);
            }
            Self::V6 {
                flowinfo,
                addr,
                scope_id,
                ..
            } => {
                full[4..8].copy_from_slice(&flowinfo.to_ne_bytes());
                full[8..24].copy_from_slice(addr);
                full[24..28].copy_from_slice(&scope_id.to_ne_bytes());
            }
        }
        let len = self.host_len();
        let n = out.len().min(len);
        out[..n].copy_from_slice(&full[..n]);
        len
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(sa: SocketAddr) -> Self {
        match sa {
            SocketAddr::V4(v4) => Self::V4 {
                port: v4.port(),
                addr: v4.ip().octets(),
            },
            SocketAddr::V6(v6) => Self::V6 {
                port: v6.port(),
                flowinfo: v6.flowinfo(),
                addr: v6.ip().octets(),
                scope_id: v6.scope_id(),
            },
        }
    }
}

impl From<SockAddr> for SocketAddr {
    fn from(sa: SockAddr) -> Self {
        match sa {
            SockAddr::V4 { port, addr } => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(addr), port)),
            SockAddr::V6 {
                port,
                flowinfo,
                addr,
                scope_id,
            } => SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(addr),
                port,
                flowinfo,
                scope_id,
            )),
        }
    }
}

impl SockAddr {
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        SocketAddr::from(*self).ip()
    }
}
