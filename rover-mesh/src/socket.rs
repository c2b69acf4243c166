//! Datagram boundary.
//!
//! The routing and transport layers only ever send a byte buffer to an IPv4
//! address or wait for the next buffer to arrive.  [`DatagramLink`] is that
//! contract.  [`Socket`] implements it over a tokio `UdpSocket`;
//! [`crate::simulator::SimSocket`] implements it over an in-memory network
//! for tests.  All protocol logic lives elsewhere; this module owns only byte
//! I/O.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

/// Unreliable, unordered datagram endpoint.
///
/// Methods take `&self` so one endpoint can be shared between a receive loop
/// and any number of senders.
pub trait DatagramLink: Send + Sync + 'static {
    /// Send `buf` as one datagram to `dest`.
    fn send_to(&self, buf: &[u8], dest: SocketAddrV4)
        -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram; returns `(bytes, sender_address)`.
    fn recv_from(&self) -> impl Future<Output = io::Result<(Vec<u8>, SocketAddrV4)>> + Send;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async UDP socket speaking IPv4 only.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddrV4) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Bind to `port` on every interface and join multicast `group`.
    pub async fn bind_multicast(group: Ipv4Addr, port: u16) -> io::Result<Self> {
        let socket = Self::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).await?;
        socket
            .inner
            .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
        Ok(socket)
    }
}

impl DatagramLink for Socket {
    async fn send_to(&self, buf: &[u8], dest: SocketAddrV4) -> io::Result<()> {
        self.inner.send_to(buf, dest).await?;
        Ok(())
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddrV4)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        match addr {
            SocketAddr::V4(addr) => Ok((buf, addr)),
            SocketAddr::V6(addr) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("datagram from IPv6 peer {addr}"),
            )),
        }
    }
}
