//! Direct UDP transport: the path the transport picker prefers whenever
//! it is alive, falling back to the TCP relay stack when it isn't.
//!
//! This is a thin async wrapper over [`tokio::net::UdpSocket`] — it does
//! not know about sessions, cookies, or handshakes; it only moves
//! datagrams to and from the wire for whatever layer above constructs
//! them.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

/// A bound UDP socket, cheaply cloneable (it wraps an `Arc`) so both the
/// send and receive sides of a session manager's tick loop can hold a
/// handle to it.
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind a UDP socket to `addr`. Works for both IPv4 and IPv6; the
    /// caller picks the family via the address passed in.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the bind fails (port in use,
    /// permission denied, unsupported address family).
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// The local address this socket is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send a datagram to `addr`.
    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> std::io::Result<usize> {
        self.socket.send_to(buf, addr).await
    }

    /// Receive a datagram into `buf`, returning its length and the
    /// sender's address.
    pub async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}
