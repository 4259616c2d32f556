//! Onion/announce client: a collaborator interface, not a subsystem of
//! its own.
//!
//! The session only calls into the onion/announce client for two
//! things: looking up a peer's current DHT key by their long-term key
//! (so a cookie request can be addressed), and handing off an onion
//! response payload the TCP multiplexer received on our behalf. The
//! onion protocol's own routing and handshake internals — path
//! selection, layered encryption, announce storage — belong entirely to
//! the embedder and are not reimplemented here.

use crate::keys::{DhtPublicKey, Ltk};

/// What the session needs from an onion/announce client.
///
/// An embedder without onion support can use [`NullOnionCollaborator`],
/// which always reports peers as unlocatable and drops forwarded
/// payloads.
pub trait OnionCollaborator: Send + Sync {
    /// Look up a peer's current DHT public key by their long-term key,
    /// if the onion/announce client has one on file.
    fn lookup_dht_key(&self, peer_ltk: Ltk) -> Option<DhtPublicKey>;

    /// Hand off an onion response payload the TCP multiplexer received
    /// through an onion-capable relay. The session does not parse this
    /// payload; it is opaque onion-protocol data.
    fn forward_onion_payload(&self, payload: &[u8]);
}

/// An [`OnionCollaborator`] that never locates anyone and silently
/// drops forwarded payloads, for embedders that only use direct UDP and
/// TCP relay fallback without onion-based peer discovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOnionCollaborator;

impl OnionCollaborator for NullOnionCollaborator {
    fn lookup_dht_key(&self, _peer_ltk: Ltk) -> Option<DhtPublicKey> {
        None
    }

    fn forward_onion_payload(&self, _payload: &[u8]) {}
}
