//! Host constants used by the shim agree with the platform headers.

use netwrap_core::{errno, socket};

#[test]
fn socket_constants_match_libc() {
    assert_eq!(socket::AF_UNIX, libc::AF_UNIX);
    assert_eq!(socket::AF_INET, libc::AF_INET);
    assert_eq!(socket::AF_INET6, libc::AF_INET6);
    assert_eq!(socket::SOCK_STREAM, libc::SOCK_STREAM);
    assert_eq!(socket::SOCK_DGRAM, libc::SOCK_DGRAM);
    assert_eq!(socket::SOCK_RAW, libc::SOCK_RAW);
    assert_eq!(socket::SOCK_SEQPACKET, libc::SOCK_SEQPACKET);
    assert_eq!(socket::SOCK_NONBLOCK, libc::SOCK_NONBLOCK);
    assert_eq!(socket::SOCK_CLOEXEC, libc::SOCK_CLOEXEC);
    assert_eq!(socket::SHUT_RD, libc::SHUT_RD);
    assert_eq!(socket::SHUT_WR, libc::SHUT_WR);
    assert_eq!(socket::SHUT_RDWR, libc::SHUT_RDWR);
    assert_eq!(socket::IPPROTO_TCP, libc::IPPROTO_TCP);
    assert_eq!(socket::IPPROTO_UDP, libc::IPPROTO_UDP);
    assert_eq!(socket::IPPROTO_IPV6, libc::IPPROTO_IPV6);
}

#[test]
fn option_and_flag_constants_match_libc() {
    assert_eq!(socket::SOL_SOCKET, libc::SOL_SOCKET);
    assert_eq!(socket::SO_REUSEADDR, libc::SO_REUSEADDR);
    assert_eq!(socket::SO_TYPE, libc::SO_TYPE);
    assert_eq!(socket::SO_ERROR, libc::SO_ERROR);
    assert_eq!(socket::SO_KEEPALIVE, libc::SO_KEEPALIVE);
    assert_eq!(socket::SO_LINGER, libc::SO_LINGER);
    assert_eq!(socket::SO_REUSEPORT, libc::SO_REUSEPORT);
    assert_eq!(socket::SO_SNDBUF, libc::SO_SNDBUF);
    assert_eq!(socket::SO_RCVBUF, libc::SO_RCVBUF);
    assert_eq!(socket::SO_RCVTIMEO, libc::SO_RCVTIMEO);
    assert_eq!(socket::SO_SNDTIMEO, libc::SO_SNDTIMEO);
    assert_eq!(socket::SO_ACCEPTCONN, libc::SO_ACCEPTCONN);
    assert_eq!(socket::MSG_PEEK, libc::MSG_PEEK);
    assert_eq!(socket::MSG_DONTWAIT, libc::MSG_DONTWAIT);
    assert_eq!(socket::MSG_WAITALL, libc::MSG_WAITALL);
    assert_eq!(socket::MSG_NOSIGNAL, libc::MSG_NOSIGNAL);
    assert_eq!(socket::FIONREAD, libc::FIONREAD as u64);
    assert_eq!(socket::FIONBIO, libc::FIONBIO as u64);
    assert_eq!(socket::FIOASYNC, libc::FIOASYNC as u64);
}

#[test]
fn struct_sizes_match_libc() {
    assert_eq!(socket::SOCKADDR_IN_LEN, size_of::<libc::sockaddr_in>());
    assert_eq!(socket::SOCKADDR_IN6_LEN, size_of::<libc::sockaddr_in6>());
    assert_eq!(socket::FD_SETSIZE as usize, libc::FD_SETSIZE as usize);
    assert_eq!(socket::IOV_MAX, libc::IOV_MAX);
}

#[test]
fn errno_constants_match_libc() {
    for (ours, theirs) in [
        (errno::EBADF, libc::EBADF),
        (errno::EINTR, libc::EINTR),
        (errno::EAGAIN, libc::EAGAIN),
        (errno::EACCES, libc::EACCES),
        (errno::EFAULT, libc::EFAULT),
        (errno::EINVAL, libc::EINVAL),
        (errno::EMFILE, libc::EMFILE),
        (errno::EPIPE, libc::EPIPE),
        (errno::ENOSYS, libc::ENOSYS),
        (errno::ENOTSOCK, libc::ENOTSOCK),
        (errno::ENOPROTOOPT, libc::ENOPROTOOPT),
        (errno::EAFNOSUPPORT, libc::EAFNOSUPPORT),
        (errno::EADDRINUSE, libc::EADDRINUSE),
        (errno::ECONNRESET, libc::ECONNRESET),
        (errno::ENOBUFS, libc::ENOBUFS),
        (errno::ENOTCONN, libc::ENOTCONN),
        (errno::ETIMEDOUT, libc::ETIMEDOUT),
        (errno::ECONNREFUSED, libc::ECONNREFUSED),
        (errno::EINPROGRESS, libc::EINPROGRESS),
    ] {
        assert_eq!(ours, theirs);
    }
}
