use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::unix::AsyncFd;

use crate::config::AddressFamily;
use crate::sys;

/// Raw ICMP socket bound to the wildcard address of one family. The
/// descriptor is closed when the value is dropped.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
    family: AddressFamily,
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Socket {
    pub fn open(family: AddressFamily) -> io::Result<Self> {
        let (domain, protocol) = match family {
            AddressFamily::V4 => (libc::AF_INET, libc::IPPROTO_ICMP),
            AddressFamily::V6 => (libc::AF_INET6, libc::IPPROTO_ICMPV6),
        };
        let raw = sys::socket(domain, libc::SOCK_RAW, protocol)?;
        let socket = Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
            family,
        };
        sys::bind(socket.as_raw_fd(), &SocketAddr::new(family.unspecified(), 0))?;
        Ok(socket)
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn set_nonblocking(&self) -> io::Result<()> {
        sys::set_nonblocking(self.as_raw_fd())
    }

    pub fn send_to(&self, buf: &[u8], target: IpAddr) -> io::Result<usize> {
        sys::sendto(self.as_raw_fd(), buf, &SocketAddr::new(target, 0), 0)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
        let (n, addr) = sys::recvfrom(self.as_raw_fd(), buf, 0)?;
        Ok((n, addr.map(|addr| addr.ip())))
    }
}

/// The two socket operations a ping session needs. Implemented by
/// [`AsyncIcmpSocket`] and by scripted transports in tests.
#[allow(async_fn_in_trait)]
pub trait IcmpTransport {
    async fn send_to(&self, buf: &[u8], target: IpAddr) -> io::Result<usize>;

    /// Waits for the next datagram, returning its length and sender.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)>;
}

#[derive(Debug)]
pub struct AsyncIcmpSocket {
    inner: AsyncFd<Socket>,
}

impl AsyncIcmpSocket {
    /// Must be called from within a tokio runtime.
    pub fn new(socket: Socket) -> io::Result<Self> {
        socket.set_nonblocking()?;
        Ok(Self {
            inner: AsyncFd::new(socket)?,
        })
    }
}

impl IcmpTransport for AsyncIcmpSocket {
    async fn send_to(&self, buf: &[u8], target: IpAddr) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.writable().await?;

            match guard.try_io(|inner| inner.get_ref().send_to(buf, target)) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
        loop {
            let mut guard = self.inner.readable().await?;

            match guard.try_io(|inner| inner.get_ref().recv_from(buf)) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }
}
