//! Constant space of the fast-path stack.
//!
//! The fast-path API follows BSD numbering for address families, socket
//! options, message flags, ioctl requests and errno. Only the values the shim
//! translates are listed.

// ---------------------------------------------------------------------------
// Address families
// ---------------------------------------------------------------------------

pub const OFP_AF_INET: i32 = 2;
pub const OFP_AF_INET6: i32 = 28;

// ---------------------------------------------------------------------------
// Socket types and protocols
// ---------------------------------------------------------------------------

pub const OFP_SOCK_STREAM: i32 = 1;
pub const OFP_SOCK_DGRAM: i32 = 2;
pub const OFP_SOCK_RAW: i32 = 3;
pub const OFP_SOCK_SEQPACKET: i32 = 5;

pub const OFP_IPPROTO_IP: i32 = 0;
pub const OFP_IPPROTO_ICMP: i32 = 1;
pub const OFP_IPPROTO_TCP: i32 = 6;
pub const OFP_IPPROTO_UDP: i32 = 17;
pub const OFP_IPPROTO_IPV6: i32 = 41;
pub const OFP_IPPROTO_ICMPV6: i32 = 58;
pub const OFP_IPPROTO_SCTP: i32 = 132;

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

pub const OFP_SHUT_RD: i32 = 0;
pub const OFP_SHUT_WR: i32 = 1;
pub const OFP_SHUT_RDWR: i32 = 2;

// ---------------------------------------------------------------------------
// Socket-level options
// ---------------------------------------------------------------------------

pub const OFP_SOL_SOCKET: i32 = 0xffff;

pub const OFP_SO_DEBUG: i32 = 0x0001;
pub const OFP_SO_ACCEPTCONN: i32 = 0x0002;
pub const OFP_SO_REUSEADDR: i32 = 0x0004;
pub const OFP_SO_KEEPALIVE: i32 = 0x0008;
pub const OFP_SO_DONTROUTE: i32 = 0x0010;
pub const OFP_SO_BROADCAST: i32 = 0x0020;
pub const OFP_SO_LINGER: i32 = 0x0080;
pub const OFP_SO_OOBINLINE: i32 = 0x0100;
pub const OFP_SO_REUSEPORT: i32 = 0x0200;
pub const OFP_SO_SNDBUF: i32 = 0x1001;
pub const OFP_SO_RCVBUF: i32 = 0x1002;
pub const OFP_SO_SNDLOWAT: i32 = 0x1003;
pub const OFP_SO_RCVLOWAT: i32 = 0x1004;
pub const OFP_SO_SNDTIMEO: i32 = 0x1005;
pub const OFP_SO_RCVTIMEO: i32 = 0x1006;
pub const OFP_SO_ERROR: i32 = 0x1007;
pub const OFP_SO_TYPE: i32 = 0x1008;

// ---------------------------------------------------------------------------
// Message flags
// ---------------------------------------------------------------------------

pub const OFP_MSG_OOB: i32 = 0x1;
pub const OFP_MSG_PEEK: i32 = 0x2;
pub const OFP_MSG_DONTROUTE: i32 = 0x4;
pub const OFP_MSG_EOR: i32 = 0x8;
pub const OFP_MSG_TRUNC: i32 = 0x10;
pub const OFP_MSG_CTRUNC: i32 = 0x20;
pub const OFP_MSG_WAITALL: i32 = 0x40;
pub const OFP_MSG_DONTWAIT: i32 = 0x80;
pub const OFP_MSG_NOSIGNAL: i32 = 0x20000;

// ---------------------------------------------------------------------------
// ioctl requests (`_IOR('f', 127, int)` and friends)
// ---------------------------------------------------------------------------

pub const OFP_FIONREAD: u64 = 0x4004_667f;
pub const OFP_FIONBIO: u64 = 0x8004_667e;
pub const OFP_FIOASYNC: u64 = 0x8004_667d;

// ---------------------------------------------------------------------------
// select
// ---------------------------------------------------------------------------

/// Capacity of `ofp_fd_set`. Bits are indexed by `fd - descriptor_offset`.
pub const OFP_FD_SETSIZE: usize = 1024;

// ---------------------------------------------------------------------------
// epoll
// ---------------------------------------------------------------------------

// Event bits and control opcodes use the Linux values, so event records are
// copied between the two layouts without remapping.
pub const OFP_EPOLLIN: u32 = 0x001;
pub const OFP_EPOLLPRI: u32 = 0x002;
pub const OFP_EPOLLOUT: u32 = 0x004;
pub const OFP_EPOLLERR: u32 = 0x008;
pub const OFP_EPOLLHUP: u32 = 0x010;

pub const OFP_EPOLL_CTL_ADD: i32 = 1;
pub const OFP_EPOLL_CTL_DEL: i32 = 2;
pub const OFP_EPOLL_CTL_MOD: i32 = 3;

// ---------------------------------------------------------------------------
// errno
// ---------------------------------------------------------------------------

// Values below 35 share the host numbering except EDEADLK.
pub const OFP_ENOENT: i32 = 2;
pub const OFP_EBADF: i32 = 9;
pub const OFP_EDEADLK: i32 = 11;
pub const OFP_EFAULT: i32 = 14;
pub const OFP_EEXIST: i32 = 17;
pub const OFP_EINVAL: i32 = 22;
pub const OFP_EMFILE: i32 = 24;
pub const OFP_EPIPE: i32 = 32;
pub const OFP_EWOULDBLOCK: i32 = 35;
pub const OFP_EINPROGRESS: i32 = 36;
pub const OFP_EALREADY: i32 = 37;
pub const OFP_ENOTSOCK: i32 = 38;
pub const OFP_EDESTADDRREQ: i32 = 39;
pub const OFP_EMSGSIZE: i32 = 40;
pub const OFP_EPROTOTYPE: i32 = 41;
pub const OFP_ENOPROTOOPT: i32 = 42;
pub const OFP_EPROTONOSUPPORT: i32 = 43;
pub const OFP_ESOCKTNOSUPPORT: i32 = 44;
pub const OFP_EOPNOTSUPP: i32 = 45;
pub const OFP_EPFNOSUPPORT: i32 = 46;
pub const OFP_EAFNOSUPPORT: i32 = 47;
pub const OFP_EADDRINUSE: i32 = 48;
pub const OFP_EADDRNOTAVAIL: i32 = 49;
pub const OFP_ENETDOWN: i32 = 50;
pub const OFP_ENETUNREACH: i32 = 51;
pub const OFP_ENETRESET: i32 = 52;
pub const OFP_ECONNABORTED: i32 = 53;
pub const OFP_ECONNRESET: i32 = 54;
pub const OFP_ENOBUFS: i32 = 55;
pub const OFP_EISCONN: i32 = 56;
pub const OFP_ENOTCONN: i32 = 57;
pub const OFP_ESHUTDOWN: i32 = 58;
pub const OFP_ETOOMANYREFS: i32 = 59;
pub const OFP_ETIMEDOUT: i32 = 60;
pub const OFP_ECONNREFUSED: i32 = 61;
pub const OFP_ELOOP: i32 = 62;
pub const OFP_ENAMETOOLONG: i32 = 63;
pub const OFP_EHOSTDOWN: i32 = 64;
pub const OFP_EHOSTUNREACH: i32 = 65;
pub const OFP_ENOTEMPTY: i32 = 66;
pub const OFP_ENOSYS: i32 = 78;

// ---------------------------------------------------------------------------
// Struct sizes of the BSD-style sockaddr layouts
// ---------------------------------------------------------------------------

/// `sizeof(struct ofp_sockaddr_in)`.
pub const OFP_SOCKADDR_IN_LEN: usize = 16;
/// `sizeof(struct ofp_sockaddr_in6)`.
pub const OFP_SOCKADDR_IN6_LEN: usize = 28;
