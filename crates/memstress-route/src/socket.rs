//! Routing control-socket transport.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Byte transport underneath a [`RoutingSession`](crate::RoutingSession).
///
/// Every call blocks until the kernel accepts or answers the message.
pub trait RouteTransport {
    /// Write one complete routing message.
    fn send(&mut self, msg: &[u8]) -> io::Result<usize>;

    /// Read one routing message into `buf`.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Bind the transport to routing table `fib`.
    fn set_fib(&mut self, fib: i32) -> io::Result<()>;
}

/// Raw `PF_ROUTE` socket. Closed on drop.
#[derive(Debug)]
pub struct RouteSocket {
    fd: OwnedFd,
}

impl RouteSocket {
    /// Open a raw routing socket.
    ///
    /// Only BSD-derived kernels speak `rt_msghdr`. Linux aliases `PF_ROUTE`
    /// to netlink, which would silently drop these messages, so every other
    /// target gets `EAFNOSUPPORT`.
    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "macos"
    ))]
    pub fn open() -> io::Result<Self> {
        use std::os::fd::FromRawFd;

        // SAFETY: plain socket(2) call; the descriptor is owned below.
        let fd = unsafe { libc::socket(libc::PF_ROUTE, libc::SOCK_RAW, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` is a freshly created descriptor nobody else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        tracing::debug!(fd = fd.as_raw_fd(), "routing socket opened");
        Ok(Self { fd })
    }

    #[cfg(not(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "macos"
    )))]
    pub fn open() -> io::Result<Self> {
        Err(io::Error::from_raw_os_error(libc::EAFNOSUPPORT))
    }
}

impl AsRawFd for RouteSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl RouteTransport for RouteSocket {
    fn send(&mut self, msg: &[u8]) -> io::Result<usize> {
        // SAFETY: `msg` is valid for `msg.len()` bytes.
        let n = unsafe { libc::write(self.fd.as_raw_fd(), msg.as_ptr().cast(), msg.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    #[cfg(target_os = "freebsd")]
    fn set_fib(&mut self, fib: i32) -> io::Result<()> {
        let value: libc::c_int = fib;
        // SAFETY: `value` outlives the call and its size is passed alongside.
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_SETFIB,
                (&value as *const libc::c_int).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Only FreeBSD has multiple routing tables; everywhere else fib 0 is the
    /// one table there is.
    #[cfg(not(target_os = "freebsd"))]
    fn set_fib(&mut self, fib: i32) -> io::Result<()> {
        if fib == 0 {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(libc::ENOPROTOOPT))
        }
    }
}

#[cfg(all(
    test,
    not(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "macos"
    ))
))]
mod tests {
    use super::*;
    use crate::{RouteError, RoutingSession};

    #[test]
    fn open_without_routing_socket_support_fails() {
        let err = RouteSocket::open().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EAFNOSUPPORT));

        let err = RoutingSession::open(0).unwrap_err();
        assert!(matches!(err, RouteError::SocketCreation(_)));
        assert_eq!(err.errno(), libc::EAFNOSUPPORT);
    }
}
