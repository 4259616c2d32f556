//! # WRAITH Core
//!
//! The WRAITH session protocol: a Tox-style authenticated, encrypted
//! peer-to-peer session built on top of whatever transport happens to
//! be reachable — direct UDP when it's up, a TCP relay when it isn't.
//!
//! This crate provides:
//! - **Identity keys**: long-term identity keys, DHT keys, and
//!   per-connection ephemeral session keypairs
//! - **Cookie exchange and handshake**: the two-step key-confirmation
//!   protocol that precedes session key derivation
//! - **Session state machine**: cookie request through established
//!   data exchange, and its destruction
//! - **Sliding-window reliable layer**: ordered delivery with
//!   run-length-encoded gap requests
//! - **Congestion control**: a rate-limited sender driven by queue
//!   depth, RTT, and loss
//! - **Session manager**: owns every peer session, picks between direct
//!   UDP and TCP relay per send, and drives the tick loop
//! - **LAN beacon and onion collaborator interfaces**: local-network
//!   and onion-routed peer discovery, left to the embedder to implement
//! - **Error types**: the taxonomy shared across the above
//!
//! ## Module Structure
//!
//! - [`keys`]: long-term, DHT, and session keypairs
//! - [`cookie`]: cookie issuance and verification
//! - [`handshake`]: cookie-request and crypto-handshake wire formats
//! - [`session`]: per-peer lifecycle state machine
//! - [`session_manager`]: the session table, transport picker, and tick loop
//! - [`sliding_window`]: send/receive ring buffers and gap requests
//! - [`congestion`]: rate control
//! - [`frame`]: the data-frame wire format carried inside the AEAD payload
//! - [`nonce`]: nonce reconstruction from a truncated wire counter
//! - [`lan`]: LAN beacon payloads and address classification
//! - [`onion`]: the onion/announce collaborator interface
//! - [`config`]: tunables for every module above
//! - [`error`]: error types and result handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod congestion;
pub mod cookie;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod keys;
pub mod lan;
pub mod nonce;
pub mod onion;
pub mod session;
pub mod session_manager;
pub mod sliding_window;

pub use config::SessionConfig;
pub use cookie::CookieEngine;
pub use error::Error;
pub use keys::{DhtKeypair, DhtPublicKey, Ltk, LongTermKeypair, SessionKeypair};
pub use session::{PathState, Session, SessionState};
pub use session_manager::{SessionCallbacks, SessionManager, TransportDecision};

/// Wire packet-id for the cookie request.
pub use handshake::PACKET_COOKIE_REQUEST;
/// Wire packet-id for the cookie response.
pub use handshake::PACKET_COOKIE_RESPONSE;
/// Wire packet-id for the crypto handshake.
pub use handshake::PACKET_CRYPTO_HANDSHAKE;
