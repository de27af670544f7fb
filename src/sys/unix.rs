use std::io;
use std::mem::{self, size_of};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;

use libc::{c_int, sockaddr_storage, socklen_t};

macro_rules! syscall {
    ($fn:ident ($($args:expr),* $(,)*)) => {
        {
            let res = unsafe { libc::$fn($($args),*) };
            if res == -1 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(res)
            }
        }
    };
}

#[cfg(any(
    target_os = "android",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "fuchsia",
    target_os = "illumos",
    target_os = "linux",
    target_os = "netbsd",
    target_os = "openbsd",
))]
pub(crate) fn socket(family: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
    syscall!(socket(family, ty | libc::SOCK_CLOEXEC, protocol))
}

/// Platforms without `SOCK_CLOEXEC` set `FD_CLOEXEC` right after creation.
#[cfg(not(any(
    target_os = "android",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "fuchsia",
    target_os = "illumos",
    target_os = "linux",
    target_os = "netbsd",
    target_os = "openbsd",
)))]
pub(crate) fn socket(family: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
    let fd = syscall!(socket(family, ty, protocol))?;
    if let Err(err) = fcntl_add(fd, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC) {
        unsafe { libc::close(fd) };
        return Err(err);
    }
    Ok(fd)
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    fcntl_add(fd, libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)
}

fn fcntl_add(fd: RawFd, get_cmd: c_int, set_cmd: c_int, flag: c_int) -> io::Result<()> {
    let pre = syscall!(fcntl(fd, get_cmd))?;
    let new = pre | flag;
    if new != pre {
        syscall!(fcntl(fd, set_cmd, new)).map(|_| ())
    } else {
        Ok(())
    }
}

pub(crate) fn bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = to_sockaddr(addr);
    syscall!(bind(fd, (&storage as *const sockaddr_storage).cast(), len)).map(|_| ())
}

pub(crate) fn sendto(fd: RawFd, buf: &[u8], addr: &SocketAddr, flags: c_int) -> io::Result<usize> {
    let (storage, len) = to_sockaddr(addr);
    syscall!(sendto(
        fd,
        buf.as_ptr().cast(),
        buf.len(),
        flags,
        (&storage as *const sockaddr_storage).cast(),
        len
    ))
    .map(|n| n as usize)
}

pub(crate) fn recvfrom(
    fd: RawFd,
    buf: &mut [u8],
    flags: c_int,
) -> io::Result<(usize, Option<SocketAddr>)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = size_of::<sockaddr_storage>() as socklen_t;
    let n = syscall!(recvfrom(
        fd,
        buf.as_mut_ptr().cast(),
        buf.len(),
        flags,
        (&mut storage as *mut sockaddr_storage).cast(),
        &mut len
    ))?;
    Ok((n as usize, from_sockaddr(&storage)))
}

fn to_sockaddr(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(addr) => {
            let mut in_s: libc::sockaddr_in = unsafe { mem::zeroed() };
            in_s.sin_family = libc::AF_INET as libc::sa_family_t;
            in_s.sin_addr = to_in_addr(addr.ip());
            in_s.sin_port = addr.port().to_be();
            unsafe { (&mut storage as *mut sockaddr_storage).cast::<libc::sockaddr_in>().write(in_s) };
            size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(addr) => {
            let mut in6_s: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            in6_s.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            in6_s.sin6_addr = to_in6_addr(addr.ip());
            in6_s.sin6_port = addr.port().to_be();
            in6_s.sin6_scope_id = addr.scope_id();
            unsafe { (&mut storage as *mut sockaddr_storage).cast::<libc::sockaddr_in6>().write(in6_s) };
            size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as socklen_t)
}

fn from_sockaddr(storage: &sockaddr_storage) -> Option<SocketAddr> {
    match c_int::from(storage.ss_family) {
        libc::AF_INET => {
            let addr = unsafe { &*(storage as *const sockaddr_storage).cast::<libc::sockaddr_in>() };
            Some(SocketAddr::V4(SocketAddrV4::new(
                from_in_addr(addr.sin_addr),
                u16::from_be(addr.sin_port),
            )))
        }
        libc::AF_INET6 => {
            let addr = unsafe { &*(storage as *const sockaddr_storage).cast::<libc::sockaddr_in6>() };
            Some(SocketAddr::V6(SocketAddrV6::new(
                from_in6_addr(addr.sin6_addr),
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

fn to_in_addr(addr: &Ipv4Addr) -> libc::in_addr {
    libc::in_addr {
        s_addr: u32::from_ne_bytes(addr.octets()),
    }
}

fn from_in_addr(addr: libc::in_addr) -> Ipv4Addr {
    Ipv4Addr::from(addr.s_addr.to_ne_bytes())
}

fn to_in6_addr(addr: &Ipv6Addr) -> libc::in6_addr {
    libc::in6_addr {
        s6_addr: addr.octets(),
    }
}

fn from_in6_addr(addr: libc::in6_addr) -> Ipv6Addr {
    Ipv6Addr::from(addr.s6_addr)
}
