//! Typed configuration surface.
//!
//! Collects every protocol tunable into a `Default`-able struct, one
//! substruct per subsystem. No configuration here is read from
//! environment variables or files — that loading, if any, belongs to
//! the embedder.

use std::time::Duration;

/// Top-level configuration for a [`crate::session_manager::SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Reliable-layer ring buffer sizing.
    pub reliable: ReliableConfig,
    /// Cookie engine timing.
    pub cookie: CookieConfig,
    /// Handshake/session retry timing.
    pub handshake: HandshakeConfig,
    /// Congestion-controller constants.
    pub congestion: CongestionConfig,
    /// TCP relay client timing and connection limits.
    pub relay: RelayConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reliable: ReliableConfig::default(),
            cookie: CookieConfig::default(),
            handshake: HandshakeConfig::default(),
            congestion: CongestionConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

/// Sliding-window reliable layer sizing.
#[derive(Debug, Clone)]
pub struct ReliableConfig {
    /// Ring size for send/receive buffers. Must be a power of two.
    pub ring_size: u32,
    /// Maximum plaintext frame size before AEAD overhead.
    pub max_crypto_packet_size: usize,
    /// Maximum padding bytes appended after a payload.
    pub max_padding: usize,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            ring_size: 32_768,
            max_crypto_packet_size: 1400,
            max_padding: 8,
        }
    }
}

/// Cookie engine timing.
#[derive(Debug, Clone)]
pub struct CookieConfig {
    /// How long a cookie remains valid after issuance.
    pub validity_window: Duration,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            validity_window: Duration::from_secs(15),
        }
    }
}

/// Handshake and session retry/timeout timing.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Interval between retransmissions of an unacknowledged
    /// cookie-request/handshake/data send attempt.
    pub send_packet_interval: Duration,
    /// Number of retries before giving up and killing the session.
    pub max_send_packet_tries: u32,
}

impl HandshakeConfig {
    /// Duration after which a direct UDP path is considered dead:
    /// `send_packet_interval * max_send_packet_tries`.
    #[must_use]
    pub fn udp_direct_timeout(&self) -> Duration {
        self.send_packet_interval * self.max_send_packet_tries
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            send_packet_interval: Duration::from_millis(1000),
            max_send_packet_tries: 8,
        }
    }
}

/// Congestion-controller constants.
#[derive(Debug, Clone)]
pub struct CongestionConfig {
    /// Interval at which the receive-rate counter is sampled.
    pub packet_counter_average_interval: Duration,
    /// Length of the send-queue-depth history ring.
    pub queue_array_size: usize,
    /// Length of the sent/resent packet-count history ring.
    pub last_sent_array_size: usize,
    /// Queue depth below which back-off is not triggered.
    pub min_queue_length: u32,
    /// Floor on the computed send rate.
    pub packet_min_rate: f64,
    /// How long after a TCP send to suppress congestion-rate adjustment,
    /// so a cold-starting UDP path isn't mistaken for loss.
    pub event_timeout: Duration,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            packet_counter_average_interval: Duration::from_millis(50),
            queue_array_size: 12,
            last_sent_array_size: 24,
            min_queue_length: 64,
            packet_min_rate: 4.0,
            event_timeout: Duration::from_secs(1),
        }
    }
}

/// TCP relay client configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interval between keepalive pings.
    ///
    /// This default is a documented assumption (see DESIGN.md).
    pub ping_frequency: Duration,
    /// Time to wait for a pong before declaring the relay disconnected.
    ///
    /// Same assumption caveat as `ping_frequency`.
    pub ping_timeout: Duration,
    /// Maximum simultaneous virtual connections per relay socket.
    pub num_client_connections: usize,
    /// Reserved connection-id range below which ids are not assignable
    /// to peer routing slots.
    pub num_reserved_ports: u16,
    /// Maximum relay references held per peer session.
    pub max_friend_tcp_connections: usize,
    /// Recommended working set size out of `max_friend_tcp_connections`.
    pub recommended_friend_tcp_connections: usize,
    /// Cap on the number of onion-capable relay slots.
    pub num_onion_tcp_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ping_frequency: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
            num_client_connections: 128,
            num_reserved_ports: 16,
            max_friend_tcp_connections: 6,
            recommended_friend_tcp_connections: 3,
            num_onion_tcp_connections: 3,
        }
    }
}
