//! Errors surfaced by the UDP transport and the TCP relay stack.

use thiserror::Error;

/// Errors from the TCP relay client, its proxy-negotiation phase, and the
/// connection multiplexer above it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The underlying TCP connection failed or was reset.
    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP CONNECT proxy did not reply with a 200 status.
    #[error("HTTP proxy CONNECT rejected")]
    HttpConnectRejected,

    /// The SOCKS5 proxy rejected the method-selection or connect request.
    #[error("SOCKS5 proxy negotiation failed: {0}")]
    Socks5Rejected(&'static str),

    /// The relay handshake's AEAD open failed (wrong key, tampered frame,
    /// or talking to a relay that doesn't hold the expected long-term key).
    #[error("relay handshake authentication failed")]
    HandshakeAuthFailed,

    /// A length-prefixed frame's declared length exceeded the configured
    /// maximum, or the frame's AEAD failed to open.
    #[error("relay frame error: {0}")]
    FrameError(&'static str),

    /// The virtual-connection table has no free slot for a new peer.
    #[error("virtual connection table full ({0} slots)")]
    ConnectionTableFull(usize),

    /// No PONG arrived within the configured ping timeout.
    #[error("relay ping timed out, connection considered dead")]
    PingTimeout,

    /// The relay client is not in a state that can send application data.
    #[error("relay client not confirmed")]
    NotConfirmed,

    /// No relay in the pool currently has a route to the requested peer.
    #[error("no route to peer via any pooled relay")]
    NoRoute,

    /// An ordinary (non-priority) write was rejected because the send
    /// queues already hold pending data; the caller should retry once
    /// [`RelayClient::flush`](crate::relay::RelayClient::flush) has
    /// drained them.
    #[error("relay send queues busy, write rejected")]
    WouldBlock,
}

/// Convenience alias for relay-stack results.
pub type RelayResult<T> = Result<T, RelayError>;
