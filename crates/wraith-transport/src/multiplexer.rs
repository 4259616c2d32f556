//! TCP connection multiplexer: a pool of [`RelayClient`] connections
//! shared across every peer that has fallen back to a relay, plus the
//! per-peer `connection_to` bookkeeping that decides which pooled
//! relays currently carry a route to which peer.
//!
//! A relay that nothing currently routes through is put to sleep
//! (its socket dropped) rather than closed outright, so it can be
//! reanimated without renegotiating the relay handshake's long-term
//! key material from scratch — only a fresh TCP connect and relay
//! handshake, which is cheap relative to losing the slot entirely.

use std::collections::HashMap;
use std::net::SocketAddr;

use rand::seq::SliceRandom;

use crate::error::{RelayError, RelayResult};
use crate::relay::RelayClient;

/// Tunables mirroring `wraith_core::config::RelayConfig`'s connection
/// limits. Kept as a standalone struct here rather than a dependency on
/// `wraith-core` (which depends on this crate, not the reverse).
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Maximum relay references held per peer.
    pub max_friend_tcp_connections: usize,
    /// Recommended working set size out of `max_friend_tcp_connections`.
    pub recommended_friend_tcp_connections: usize,
    /// Cap on the number of onion-capable relay slots.
    pub num_onion_tcp_connections: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            max_friend_tcp_connections: 6,
            recommended_friend_tcp_connections: 3,
            num_onion_tcp_connections: 3,
        }
    }
}

/// A pooled relay connection, possibly asleep.
struct RelaySlot {
    addr: SocketAddr,
    relay_ltk: [u8; 32],
    client: Option<RelayClient>,
    onion_capable: bool,
}

impl RelaySlot {
    fn is_sleeping(&self) -> bool {
        self.client.is_none()
    }
}

/// One virtual-connection route for a single peer: which pooled relays
/// carry a registered or confirmed route to them, and under which
/// per-relay connection id.
#[derive(Default)]
struct ConnectionTo {
    routes: Vec<Route>,
}

struct Route {
    relay_index: usize,
    relay_connection_id: u8,
    online: bool,
}

/// Owns every pooled relay connection and the per-peer routing table
/// above them.
pub struct Multiplexer {
    config: MultiplexerConfig,
    relays: Vec<RelaySlot>,
    connections: HashMap<[u8; 32], ConnectionTo>,
}

impl Multiplexer {
    /// Create an empty multiplexer.
    #[must_use]
    pub fn new(config: MultiplexerConfig) -> Self {
        Self {
            config,
            relays: Vec::new(),
            connections: HashMap::new(),
        }
    }

    /// Add a freshly connected, handshaken relay to the pool. Returns
    /// its pool index.
    pub fn add_relay(&mut self, addr: SocketAddr, relay_ltk: [u8; 32], client: RelayClient) -> usize {
        if let Some(index) = self
            .relays
            .iter()
            .position(|slot| slot.relay_ltk == relay_ltk)
        {
            self.relays[index].client = Some(client);
            self.relays[index].addr = addr;
            return index;
        }
        self.relays.push(RelaySlot {
            addr,
            relay_ltk,
            client: Some(client),
            onion_capable: false,
        });
        self.relays.len() - 1
    }

    /// Number of pooled relays that currently have a live socket.
    #[must_use]
    pub fn working_relay_count(&self) -> usize {
        self.relays.iter().filter(|s| !s.is_sleeping()).count()
    }

    /// Whether the pool has fewer working relays than recommended and
    /// should either wake a sleeping one or connect a new one.
    #[must_use]
    pub fn needs_more_relays(&self) -> bool {
        self.working_relay_count() < self.config.recommended_friend_tcp_connections
    }

    /// Put a relay to sleep: drop its socket but keep its address and
    /// key so it can be reconnected later without losing pool identity.
    pub fn sleep_relay(&mut self, relay_index: usize) {
        if let Some(slot) = self.relays.get_mut(relay_index) {
            slot.client = None;
            tracing::debug!(relay_index, "relay put to sleep");
        }
        for conn in self.connections.values_mut() {
            for route in &mut conn.routes {
                if route.relay_index == relay_index {
                    route.online = false;
                }
            }
        }
    }

    /// Whether the relay at `relay_index` is currently sleeping.
    #[must_use]
    pub fn is_sleeping(&self, relay_index: usize) -> bool {
        self.relays
            .get(relay_index)
            .map(RelaySlot::is_sleeping)
            .unwrap_or(true)
    }

    /// Reconnect address/key for a sleeping relay, for the caller to
    /// pass to [`RelayClient::connect`].
    #[must_use]
    pub fn sleeping_relay_target(&self, relay_index: usize) -> Option<(SocketAddr, [u8; 32])> {
        let slot = self.relays.get(relay_index)?;
        slot.is_sleeping().then_some((slot.addr, slot.relay_ltk))
    }

    /// Mark a relay as capable of carrying onion-announce egress.
    pub fn set_onion_capable(&mut self, relay_index: usize, capable: bool) {
        if let Some(slot) = self.relays.get_mut(relay_index) {
            slot.onion_capable = capable;
        }
    }

    /// Pick a random awake, onion-capable relay for announce egress.
    #[must_use]
    pub fn pick_onion_relay(&self) -> Option<usize> {
        let candidates: Vec<usize> = self
            .relays
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.onion_capable && !slot.is_sleeping())
            .map(|(i, _)| i)
            .collect();
        candidates.choose(&mut rand::thread_rng()).copied()
    }

    /// Register that we've asked `relay_index` to route to `peer_ltk`
    /// under `relay_connection_id`. Creates the peer's `connection_to`
    /// record if this is its first route.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionTableFull`] if the peer already
    /// has `max_friend_tcp_connections` routes.
    pub fn register_route(
        &mut self,
        peer_ltk: [u8; 32],
        relay_index: usize,
        relay_connection_id: u8,
    ) -> RelayResult<()> {
        let conn = self.connections.entry(peer_ltk).or_default();
        if conn.routes.len() >= self.config.max_friend_tcp_connections {
            return Err(RelayError::ConnectionTableFull(
                self.config.max_friend_tcp_connections,
            ));
        }
        conn.routes.push(Route {
            relay_index,
            relay_connection_id,
            online: false,
        });
        Ok(())
    }

    /// Mark a peer's route through `relay_index` online or offline, as
    /// reported by that relay's routing/connect/disconnect packets.
    pub fn set_route_status(&mut self, peer_ltk: [u8; 32], relay_index: usize, online: bool) {
        if let Some(conn) = self.connections.get_mut(&peer_ltk) {
            for route in &mut conn.routes {
                if route.relay_index == relay_index {
                    route.online = online;
                }
            }
        }
    }

    /// Every pooled relay index with a confirmed-online route to
    /// `peer_ltk`.
    #[must_use]
    pub fn online_relays_for(&self, peer_ltk: [u8; 32]) -> Vec<(usize, u8)> {
        self.connections
            .get(&peer_ltk)
            .map(|conn| {
                conn.routes
                    .iter()
                    .filter(|r| r.online)
                    .map(|r| (r.relay_index, r.relay_connection_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any pooled relay currently has a live route to
    /// `peer_ltk`.
    #[must_use]
    pub fn has_route(&self, peer_ltk: [u8; 32]) -> bool {
        !self.online_relays_for(peer_ltk).is_empty()
    }

    /// Send `data` to `peer_ltk` over its first online route.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoRoute`] if no pooled relay has a
    /// confirmed route, or bubbles up the per-relay send error
    /// otherwise.
    pub fn send_packet(&mut self, peer_ltk: [u8; 32], data: &[u8]) -> RelayResult<()> {
        let (relay_index, connection_id) = self
            .online_relays_for(peer_ltk)
            .first()
            .copied()
            .ok_or(RelayError::NoRoute)?;
        let client = self
            .relays
            .get_mut(relay_index)
            .and_then(|slot| slot.client.as_mut())
            .ok_or(RelayError::NoRoute)?;
        client.queue_data(connection_id, data)
    }

    /// Drop every route recorded for `peer_ltk` (the session was
    /// killed or the peer reconnected directly over UDP).
    pub fn forget_peer(&mut self, peer_ltk: [u8; 32]) {
        self.connections.remove(&peer_ltk);
    }

    /// Number of pooled relays, awake or asleep.
    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }
}
