//! # WRAITH Transport
//!
//! The two paths a session's data can travel: a direct UDP socket, and
//! a pool of TCP relay connections used when direct UDP is unreachable
//! (symmetric NATs, restrictive firewalls, UDP-filtering middleboxes).
//!
//! This crate provides:
//! - [`udp`]: the direct UDP socket wrapper
//! - [`relay`]: the TCP relay client — proxy negotiation, relay
//!   handshake, virtual connections, ping/pong, priority queues, OOB
//! - [`multiplexer`]: the pool of relay clients and per-peer routing
//!   table above them
//!
//! It deliberately does not depend on `wraith-core`: this crate knows
//! only long-term keys and raw payloads, never sessions. `wraith-core`
//! depends on this crate to decide, per peer, which path to use.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod multiplexer;
pub mod relay;
pub mod udp;

pub use error::{RelayError, RelayResult};
pub use multiplexer::{Multiplexer, MultiplexerConfig};
pub use relay::{ConnectState, ProxyConfig, RelayClient, RelayEvent};
pub use udp::UdpTransport;
