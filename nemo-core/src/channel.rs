//! A UDP socket plus the per-datagram event counters that accompany it.

use crate::error::Error;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};

/// Which IP family a [`Channel`] was opened for. The current design never
/// opens both at once; the requester/responder pick one family at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::V4 => "ipv4",
            Family::V6 => "ipv6",
        }
    }
}

/// Single-writer event counters. Only the owning event loop ever mutates
/// these; external observers (the `-u`/SIGUSR1 info dump) only ever read a
/// snapshot, so no atomics or locking are needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub received_total: u64,
    pub received_network_error: u64,
    pub received_size_mismatch: u64,
    pub received_magic_mismatch: u64,
    pub received_version_mismatch: u64,
    pub received_type_mismatch: u64,
    pub sent_total: u64,
    pub sent_network_error: u64,
}

/// One UDP socket for one IP family, with its bound port and event
/// counters.
pub struct Channel {
    socket: Socket,
    family: Family,
    local_port: u16,
    pub counters: Counters,
}

impl Channel {
    /// Opens an IPv4 DGRAM socket: enables address reuse, binds the
    /// wildcard address at `port` (0 picks an ephemeral port, which is then
    /// queried back), sets the send/receive buffer sizes, the outgoing TTL,
    /// and requests the `IP_RECVTTL` ancillary option used by
    /// [`crate::packet_io::receive_packet`].
    pub fn open_v4(port: u16, recv_buf: usize, send_buf: usize, ttl: u8) -> Result<Self, Error> {
        let socket = new_dgram_socket(Domain::IPV4)?;
        bind_and_tune(&socket, IpAddr::V4(Ipv4Addr::UNSPECIFIED), port, recv_buf, send_buf)?;
        socket.set_ttl(ttl as u32).map_err(|source| Error::Socket {
            step: "setsockopt(IP_TTL)",
            source,
        })?;
        set_recv_ttl_v4(&socket)?;

        let local_port = bound_port(&socket)?;

        Ok(Channel {
            socket,
            family: Family::V4,
            local_port,
            counters: Counters::default(),
        })
    }

    /// Opens an IPv6 DGRAM socket with `IPV6_V6ONLY` set, and otherwise
    /// mirrors [`Channel::open_v4`] using the hop-limit equivalents of the
    /// v4 options.
    pub fn open_v6(port: u16, recv_buf: usize, send_buf: usize, hops: u8) -> Result<Self, Error> {
        let socket = new_dgram_socket(Domain::IPV6)?;
        socket.set_only_v6(true).map_err(|source| Error::Socket {
            step: "setsockopt(IPV6_V6ONLY)",
            source,
        })?;
        bind_and_tune(&socket, IpAddr::V6(Ipv6Addr::UNSPECIFIED), port, recv_buf, send_buf)?;
        socket.set_unicast_hops_v6(hops as u32).map_err(|source| Error::Socket {
            step: "setsockopt(IPV6_UNICAST_HOPS)",
            source,
        })?;
        set_recv_hoplimit_v6(&socket)?;

        let local_port = bound_port(&socket)?;

        Ok(Channel {
            socket,
            family: Family::V6,
            local_port,
            counters: Counters::default(),
        })
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// The port learned at bind time, always in host byte order.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Best-effort close; failures are logged, never propagated, since
    /// there is nothing a caller at shutdown time can usefully do about it.
    pub fn close(self) {
        drop(self.socket);
    }
}

fn new_dgram_socket(domain: Domain) -> Result<Socket, Error> {
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(|source| Error::Socket {
        step: "socket()",
        source,
    })?;
    socket.set_reuse_address(true).map_err(|source| Error::Socket {
        step: "setsockopt(SO_REUSEADDR)",
        source,
    })?;
    socket.set_nonblocking(true).map_err(|source| Error::Socket {
        step: "fcntl(O_NONBLOCK)",
        source,
    })?;
    Ok(socket)
}

fn bind_and_tune(
    socket: &Socket,
    wildcard: IpAddr,
    port: u16,
    recv_buf: usize,
    send_buf: usize,
) -> Result<(), Error> {
    socket
        .bind(&SockAddr::from(SocketAddr::new(wildcard, port)))
        .map_err(|source| Error::Socket { step: "bind()", source })?;
    socket
        .set_recv_buffer_size(recv_buf)
        .map_err(|source| Error::Socket { step: "setsockopt(SO_RCVBUF)", source })?;
    socket
        .set_send_buffer_size(send_buf)
        .map_err(|source| Error::Socket { step: "setsockopt(SO_SNDBUF)", source })?;
    Ok(())
}

fn bound_port(socket: &Socket) -> Result<u16, Error> {
    let addr = socket
        .local_addr()
        .map_err(|source| Error::Socket { step: "getsockname()", source })?;
    Ok(addr.as_socket().map(|sa| sa.port()).unwrap_or(0))
}

#[cfg(target_os = "linux")]
fn set_recv_ttl_v4(socket: &Socket) -> Result<(), Error> {
    use nix::sys::socket::{setsockopt, sockopt};
    use std::os::fd::BorrowedFd;

    let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
    setsockopt(&fd, sockopt::Ipv4RecvTtl, &true).map_err(|source| Error::Socket {
        step: "setsockopt(IP_RECVTTL)",
        source: source.into(),
    })
}

#[cfg(not(target_os = "linux"))]
fn set_recv_ttl_v4(_socket: &Socket) -> Result<(), Error> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_recv_hoplimit_v6(socket: &Socket) -> Result<(), Error> {
    use nix::sys::socket::{setsockopt, sockopt};
    use std::os::fd::BorrowedFd;

    let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
    setsockopt(&fd, sockopt::Ipv6RecvHopLimit, &true).map_err(|source| Error::Socket {
        step: "setsockopt(IPV6_RECVHOPLIMIT)",
        source: source.into(),
    })
}

#[cfg(not(target_os = "linux"))]
fn set_recv_hoplimit_v6(_socket: &Socket) -> Result<(), Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_on_port_zero_assigns_an_ephemeral_port() {
        let channel = Channel::open_v4(0, 4096, 4096, 64).unwrap();
        assert_ne!(channel.local_port(), 0);
    }

    #[test]
    fn counters_start_at_zero() {
        let channel = Channel::open_v4(0, 4096, 4096, 64).unwrap();
        assert_eq!(channel.counters.received_total, 0);
        assert_eq!(channel.counters.sent_total, 0);
    }
}
