//! Session manager: the single owner of every peer [`Session`], the
//! direct-UDP/TCP-relay transport picker above them, and the tick loop
//! that drives retries, request-packet generation, and idle collection.
//!
//! Lock order is always session-manager tables -> TCP multiplexer ->
//! one peer's session. No lock is ever held across an `.await` other
//! than the one it directly guards — in particular, `DashMap` guards
//! are dropped before taking a session's `tokio::sync::Mutex`, never
//! held across it.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

use wraith_transport::{Multiplexer, MultiplexerConfig, UdpTransport};

use crate::config::SessionConfig;
use crate::congestion::TickInput;
use crate::cookie::CookieEngine;
use crate::error::SessionError;
use crate::frame::{self, PACKET_CRYPTO_DATA};
use crate::handshake::{
    self, CookieRequest, HandshakePacket, PACKET_COOKIE_REQUEST, PACKET_COOKIE_RESPONSE,
    PACKET_CRYPTO_HANDSHAKE,
};
use crate::keys::{DhtKeypair, DhtPublicKey, Ltk, LongTermKeypair};
use crate::lan;
use crate::onion::OnionCollaborator;
use crate::session::{Session, SessionState};
use crate::sliding_window::RecvBuffer;

/// What the transport picker decided for one outgoing send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDecision {
    /// Send directly over UDP; a path is alive.
    DirectUdp(SocketAddr),
    /// Neither path is confirmed alive, but this send is eligible (a
    /// handshake-phase packet, or small enough) to spend a speculative
    /// UDP probe before falling back to the relay.
    ProbeUdp(SocketAddr),
    /// No UDP path is usable; route through the TCP relay multiplexer.
    TcpRelay,
}

/// Pick a transport for one outgoing send to `session`'s peer.
///
/// Prefers a confirmed-alive path, favoring IPv6 only when its address
/// is on the local network (a fresher, cheaper route than going out to
/// the internet and back over IPv4). When neither path is alive, an
/// already-known address is worth a rate-limited speculative probe for
/// handshake-phase traffic or small payloads, on the theory that a NAT
/// binding may simply have gone idle rather than died outright. Anything
/// else falls back to the TCP relay.
#[must_use]
pub fn pick_transport(
    session: &Session,
    now: Instant,
    udp_direct_timeout: Duration,
    is_handshake_like: bool,
    payload_len: usize,
) -> TransportDecision {
    let v4_alive = session.path_v4.is_alive(now, udp_direct_timeout);
    let v6_alive = session.path_v6.is_alive(now, udp_direct_timeout);

    if v4_alive || v6_alive {
        if v6_alive {
            if let Some(addr) = session.path_v6.addr {
                if lan::is_lan_socket_addr(addr) {
                    return TransportDecision::DirectUdp(addr);
                }
            }
        }
        if v4_alive {
            if let Some(addr) = session.path_v4.addr {
                return TransportDecision::DirectUdp(addr);
            }
        }
        if let Some(addr) = session.path_v6.addr {
            return TransportDecision::DirectUdp(addr);
        }
    }

    let probe_eligible = is_handshake_like || payload_len <= 96;
    if probe_eligible {
        let probe_interval = udp_direct_timeout / 2;
        let candidate = session.path_v4.addr.or(session.path_v6.addr);
        if let Some(addr) = candidate {
            let path = match addr {
                SocketAddr::V4(_) => &session.path_v4,
                SocketAddr::V6(_) => &session.path_v6,
            };
            let due = path
                .last_speculative_send
                .is_none_or(|t| now.duration_since(t) >= probe_interval);
            if due {
                return TransportDecision::ProbeUdp(addr);
            }
        }
    }

    TransportDecision::TcpRelay
}

/// Delivery notifications a [`SessionManager`] reports to its embedder.
///
/// Called synchronously from inside the manager's packet-handling path;
/// implementations must not block (spawn or queue work elsewhere if a
/// callback needs to do anything non-trivial).
pub trait SessionCallbacks: Send + Sync {
    /// A session transitioned state.
    fn on_status(&self, peer: Ltk, state: SessionState);
    /// A lossless application payload was delivered, in order.
    fn on_data(&self, peer: Ltk, data: &[u8]);
    /// A lossy application payload arrived.
    fn on_lossy(&self, peer: Ltk, data: &[u8]);
    /// A peer's DHT key was learned or changed (from a verified
    /// handshake, not a bare claim).
    fn on_dht_pk(&self, peer: Ltk, dht_key: DhtPublicKey);
}

/// A sent-but-unacknowledged cookie-request or handshake packet, kept
/// as raw bytes because `Session`'s state machine forbids re-entering
/// `begin_cookie_request`/`begin_handshake` from the states those
/// packets were built in — a retry resends the exact same bytes rather
/// than rebuilding them.
struct PendingSend {
    target: SocketAddr,
    bytes: Vec<u8>,
    sent_at: Instant,
    attempts: u32,
}

/// Owns every peer session, the DHT-scoped handshake bookkeeping ahead
/// of session establishment, the direct UDP socket, and the TCP relay
/// multiplexer. One instance per process identity.
pub struct SessionManager<C: SessionCallbacks> {
    our_ltk: LongTermKeypair,
    our_dht: DhtKeypair,
    config: SessionConfig,
    cookies: CookieEngine,
    onion: Arc<dyn OnionCollaborator>,
    callbacks: Arc<C>,

    sessions: DashMap<Ltk, Arc<Mutex<Session>>>,
    /// Last address a peer was observed at or targeted for, keyed for
    /// fast dispatch of address-only-identified replies (cookie
    /// responses carry no sender identity of their own).
    addr_index: DashMap<SocketAddr, Ltk>,
    retries: DashMap<Ltk, PendingSend>,
    dht_shared: DashMap<Ltk, [u8; 32]>,
    pending_request_nonce: DashMap<Ltk, u64>,

    udp: UdpTransport,
    multiplexer: Mutex<Multiplexer>,
    request_nonce_counter: AtomicU64,
}

impl<C: SessionCallbacks> SessionManager<C> {
    /// Build a session manager bound to `udp`, with no peers and an
    /// empty relay pool.
    #[must_use]
    pub fn new(
        our_ltk: LongTermKeypair,
        our_dht: DhtKeypair,
        config: SessionConfig,
        udp: UdpTransport,
        onion: Arc<dyn OnionCollaborator>,
        callbacks: Arc<C>,
    ) -> Self {
        let cookies = CookieEngine::new(config.cookie.validity_window);
        let multiplexer = Multiplexer::new(MultiplexerConfig {
            max_friend_tcp_connections: config.relay.max_friend_tcp_connections,
            recommended_friend_tcp_connections: config.relay.recommended_friend_tcp_connections,
            num_onion_tcp_connections: config.relay.num_onion_tcp_connections,
        });
        Self {
            our_ltk,
            our_dht,
            config,
            cookies,
            onion,
            callbacks,
            sessions: DashMap::new(),
            addr_index: DashMap::new(),
            retries: DashMap::new(),
            dht_shared: DashMap::new(),
            pending_request_nonce: DashMap::new(),
            udp,
            multiplexer: Mutex::new(multiplexer),
            request_nonce_counter: AtomicU64::new(0),
        }
    }

    /// Our DHT public key, for the embedder to publish via onion
    /// announce or LAN beacon.
    #[must_use]
    pub fn our_dht_public(&self) -> DhtPublicKey {
        DhtPublicKey(*self.our_dht.public().as_bytes())
    }

    /// The current lifecycle state of a peer's session, if one exists.
    #[must_use]
    pub async fn session_state(&self, peer: Ltk) -> Option<SessionState> {
        let arc = self.sessions.get(&peer)?.value().clone();
        let session = arc.lock().await;
        Some(session.state())
    }

    fn next_request_nonce(&self) -> u64 {
        self.request_nonce_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Begin connecting to a peer at a known DHT key and address: create
    /// an outbound session and send the first cookie request.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] if a session already exists in a state
    /// that forbids restarting the cookie phase, or if the DH exchange
    /// against the peer's DHT key fails (a low-order point).
    pub async fn connect(
        &self,
        peer_ltk: Ltk,
        peer_dht_key: DhtPublicKey,
        peer_addr: SocketAddr,
    ) -> Result<(), SessionError> {
        let now = Instant::now();
        let mut session = Session::new_outbound(peer_ltk, peer_dht_key, self.config.clone(), now);
        session.begin_cookie_request(now)?;

        self.sessions
            .insert(peer_ltk, Arc::new(Mutex::new(session)));
        self.addr_index.insert(peer_addr, peer_ltk);

        let Some(shared) = self.our_dht.precompute_with(peer_dht_key.as_bytes()) else {
            self.kill_session(peer_ltk).await;
            return Err(SessionError::InvalidState(SessionState::CookieRequesting));
        };

        let request_nonce = self.next_request_nonce();
        let packet = CookieRequest::build(
            self.our_dht.public().as_bytes(),
            &shared,
            self.our_ltk.public().as_bytes(),
            request_nonce,
        );

        self.dht_shared.insert(peer_ltk, shared);
        self.pending_request_nonce.insert(peer_ltk, request_nonce);
        self.retries.insert(
            peer_ltk,
            PendingSend {
                target: peer_addr,
                bytes: packet.to_vec(),
                sent_at: now,
                attempts: 1,
            },
        );

        let _ = self.udp.send_to(&packet, peer_addr).await;
        self.callbacks
            .on_status(peer_ltk, SessionState::CookieRequesting);
        Ok(())
    }

    /// Dispatch one received UDP datagram by its leading packet-id byte.
    pub async fn handle_packet(&self, data: &[u8], from: SocketAddr) {
        if data.is_empty() {
            return;
        }
        match data[0] {
            PACKET_COOKIE_REQUEST => self.handle_cookie_request(data, from).await,
            PACKET_COOKIE_RESPONSE => self.handle_cookie_response(data, from).await,
            PACKET_CRYPTO_HANDSHAKE => self.handle_handshake(data, from).await,
            PACKET_CRYPTO_DATA => self.handle_data(data, from).await,
            lan::PACKET_LAN_DISCOVERY => self.handle_lan_beacon(data, from),
            _ => {}
        }
    }

    /// Feed a received TCP-relay payload through the same data-frame
    /// path UDP receipts use. The relay/multiplexer layer is
    /// responsible for identifying which peer a payload belongs to
    /// before calling this.
    pub async fn handle_relay_payload(&self, peer: Ltk, data: &[u8]) {
        self.handle_data_for_peer(peer, data, None).await;
    }

    async fn handle_cookie_request(&self, data: &[u8], from: SocketAddr) {
        let Ok(parsed) = CookieRequest::parse(data) else {
            return;
        };
        let Some(shared) = self.our_dht.precompute_with(&parsed.requester_dht_key) else {
            return;
        };
        let Ok((requester_ltk, request_nonce)) = parsed.open(&shared) else {
            return;
        };
        let cookie = self
            .cookies
            .issue_cookie(&requester_ltk, &parsed.requester_dht_key);
        let response = handshake::build_cookie_response(&shared, &cookie, request_nonce);
        let _ = self.udp.send_to(&response, from).await;
    }

    async fn handle_cookie_response(&self, data: &[u8], from: SocketAddr) {
        let Some(peer) = self.addr_index.get(&from).map(|kv| *kv.value()) else {
            return;
        };
        let Some(shared) = self.dht_shared.get(&peer).map(|v| *v) else {
            return;
        };
        let Ok((cookie, echoed)) = handshake::open_cookie_response(&shared, data) else {
            return;
        };
        let Some(expected) = self.pending_request_nonce.get(&peer).map(|v| *v) else {
            return;
        };
        if echoed != expected {
            return;
        }
        let Some(entry) = self.sessions.get(&peer) else {
            return;
        };
        let session_arc = entry.value().clone();
        drop(entry);

        let now = Instant::now();
        let mut session = session_arc.lock().await;
        if session.state() != SessionState::CookieRequesting {
            return;
        }
        let Ok((session_pub, base_nonce)) = session.begin_handshake(now) else {
            return;
        };
        let Some(ltk_shared) = self.our_ltk.precompute_with(peer.as_bytes()) else {
            return;
        };
        let peer_dht_key = session
            .peer_dht_key()
            .map(|k| *k.as_bytes())
            .unwrap_or([0u8; 32]);
        let fresh_cookie_for_peer = self.cookies.issue_cookie(peer.as_bytes(), &peer_dht_key);
        let packet = HandshakePacket::build(
            &ltk_shared,
            &cookie,
            &session_pub,
            &base_nonce,
            &fresh_cookie_for_peer,
        );
        drop(session);

        self.retries.insert(
            peer,
            PendingSend {
                target: from,
                bytes: packet.to_vec(),
                sent_at: now,
                attempts: 1,
            },
        );
        self.dht_shared.remove(&peer);
        self.pending_request_nonce.remove(&peer);

        let _ = self.udp.send_to(&packet, from).await;
    }

    async fn handle_handshake(&self, data: &[u8], from: SocketAddr) {
        let Ok(parsed) = HandshakePacket::parse(data) else {
            return;
        };

        // An existing session, either initiator awaiting the reply or a
        // peer we haven't seen yet (inbound), are handled differently:
        // the initiator case has an `expected_ltk` to pin against, the
        // inbound case does not.
        if let Some(peer) = self.addr_index.get(&from).map(|kv| *kv.value()) {
            if let Some(entry) = self.sessions.get(&peer) {
                let session_arc = entry.value().clone();
                drop(entry);
                let mut session = session_arc.lock().await;
                if session.state() == SessionState::HandshakeSent {
                    let expected = *peer.as_bytes();
                    let Ok(verified) =
                        parsed.verify(&self.cookies, self.our_ltk.secret(), Some(&expected))
                    else {
                        return;
                    };
                    let now = Instant::now();
                    if session.complete_as_initiator(verified, now).is_err() {
                        return;
                    }
                    session.observe_udp_receipt(from, now);
                    self.addr_index.insert(from, peer);
                    drop(session);
                    self.retries.remove(&peer);
                    self.callbacks
                        .on_status(peer, SessionState::NotConfirmed);
                    return;
                }
            }
        }

        let Ok(verified) = parsed.verify(&self.cookies, self.our_ltk.secret(), None) else {
            return;
        };
        let peer = Ltk(verified.peer_ltk);

        if self.sessions.contains_key(&peer) {
            // Already known (likely a retransmitted handshake we've
            // already answered); the retry table will resend our
            // existing reply.
            return;
        }

        let fresh_cookie_for_us = verified.fresh_cookie_for_us;
        let now = Instant::now();
        let mut session = Session::new_inbound(peer, self.config.clone(), now);
        let Ok((our_pub, our_base_nonce)) = session.complete_as_responder(verified, now) else {
            return;
        };
        session.observe_udp_receipt(from, now);

        let ltk_shared = match self.our_ltk.precompute_with(&peer.0) {
            Some(s) => s,
            None => return,
        };
        let peer_dht_key = session
            .peer_dht_key()
            .map(|k| *k.as_bytes())
            .unwrap_or([0u8; 32]);
        let fresh_cookie_for_peer = self.cookies.issue_cookie(&peer.0, &peer_dht_key);
        let reply = HandshakePacket::build(
            &ltk_shared,
            &fresh_cookie_for_us,
            &our_pub,
            &our_base_nonce,
            &fresh_cookie_for_peer,
        );

        self.sessions.insert(peer, Arc::new(Mutex::new(session)));
        self.addr_index.insert(from, peer);
        self.retries.insert(
            peer,
            PendingSend {
                target: from,
                bytes: reply.to_vec(),
                sent_at: now,
                attempts: 1,
            },
        );

        let _ = self.udp.send_to(&reply, from).await;
        self.callbacks.on_status(peer, SessionState::NotConfirmed);
        if let Some(dht_key) = self
            .sessions
            .get(&peer)
            .map(|_| DhtPublicKey(peer_dht_key))
        {
            self.callbacks.on_dht_pk(peer, dht_key);
        }
    }

    fn handle_lan_beacon(&self, data: &[u8], from: SocketAddr) {
        let Some(dht_key) = lan::parse_beacon_payload(data) else {
            return;
        };
        tracing::debug!(?from, dht_key = %hex_prefix(&dht_key), "observed LAN beacon");
    }

    async fn handle_data(&self, data: &[u8], from: SocketAddr) {
        let Some(peer) = self.addr_index.get(&from).map(|kv| *kv.value()) else {
            return;
        };
        self.handle_data_for_peer(peer, data, Some(from)).await;
    }

    async fn handle_data_for_peer(&self, peer: Ltk, data: &[u8], from: Option<SocketAddr>) {
        if data.len() < 3 {
            return;
        }
        let Some(entry) = self.sessions.get(&peer) else {
            return;
        };
        let session_arc = entry.value().clone();
        drop(entry);

        let now = Instant::now();
        let mut session = session_arc.lock().await;

        let low = u16::from_be_bytes([data[1], data[2]]);
        let Some(nonce) = session.reconstruct_and_advance_recv_nonce(low) else {
            tracing::debug!("data frame nonce outside acceptance window, dropped");
            return;
        };
        let Some(recv_key) = session.session_keys().map(|k| k.recv_key) else {
            return;
        };
        let cipher = wraith_crypto::aead::AeadCipher::new(&recv_key);
        let Ok(plaintext) = cipher.decrypt(nonce.as_bytes(), &data[3..], &[]) else {
            tracing::debug!("data frame failed to authenticate, dropped");
            return;
        };
        let Ok(parsed) = frame::Frame::parse(&plaintext) else {
            return;
        };

        if let Some(rtt_sample) = session.send_buffer_mut().clear_until(parsed.buffer_start(), now) {
            session.record_rtt_sample(rtt_sample);
        }
        if let Some(addr) = from {
            session.observe_udp_receipt(addr, now);
        } else {
            session.congestion_mut().record_tcp_send(now);
        }

        let became_established = session.state() == SessionState::NotConfirmed;
        if became_established {
            let _ = session.confirm(now);
        }

        let packet_id = parsed.packet_id();

        if frame::is_lossy(packet_id) {
            let payload = parsed.payload()[1..].to_vec();
            drop(session);
            self.callbacks.on_lossy(peer, &payload);
        } else if packet_id == frame::PACKET_ID_KILL {
            drop(session);
            self.kill_session(peer).await;
            return;
        } else if packet_id == frame::PACKET_ID_REQUEST {
            let missing = RecvBuffer::decode_request(parsed.buffer_start(), parsed.payload());
            let missing_set: HashSet<u32> = missing.iter().copied().collect();
            let threshold = Duration::from_millis(500);
            for n in &missing {
                session.send_buffer_mut().mark_for_resend(*n, now, threshold);
            }
            let occupied: Vec<u32> = session.send_buffer_mut().occupied_slots().collect();
            for n in occupied {
                if !missing_set.contains(&n) {
                    session.send_buffer_mut().free(n);
                }
            }
        } else if packet_id == frame::PACKET_ID_PADDING {
            // keepalive only
        } else {
            let packet_number = parsed.packet_number();
            let payload = parsed.payload()[1..].to_vec();
            let delivered = session
                .recv_buffer_mut()
                .insert_and_drain(packet_number, payload);
            drop(session);
            for payload in delivered {
                self.callbacks.on_data(peer, &payload);
            }
        }

        if became_established {
            self.retries.remove(&peer);
            self.callbacks.on_status(peer, SessionState::Established);
        }
    }

    /// Send a lossless application payload, tagged `packet_id` (caller's
    /// choice of application sub-channel, `16..192`). Queued in the
    /// sliding window for retransmission until the peer acks it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownSession`] if no session exists for
    /// `peer`, [`SessionError::InvalidState`] if the handshake hasn't
    /// derived session keys yet, [`SessionError::CongestionLimited`] if
    /// the congestion controller has no send token left this period, or
    /// [`SessionError::SendBufferFull`] if the ring has no free slot.
    pub async fn send_lossless(&self, peer: Ltk, packet_id: u8, data: &[u8]) -> Result<(), SessionError> {
        let Some(entry) = self.sessions.get(&peer) else {
            return Err(SessionError::UnknownSession);
        };
        let session_arc = entry.value().clone();
        drop(entry);

        let mut payload = Vec::with_capacity(1 + data.len());
        payload.push(packet_id);
        payload.extend_from_slice(data);

        let now = Instant::now();
        let sealed = {
            let mut session = session_arc.lock().await;
            if session.session_keys().is_none() {
                return Err(SessionError::InvalidState(session.state()));
            }
            if !session.congestion_mut().try_consume() {
                session.set_congestion_stalled(true);
                return Err(SessionError::CongestionLimited);
            }
            session.set_congestion_stalled(false);
            let number = session
                .send_buffer_mut()
                .enqueue(payload)
                .ok_or(SessionError::SendBufferFull)?;
            let max_size = self.config.reliable.max_crypto_packet_size;
            let sealed = seal_data_frame(&mut session, number, max_size)
                .ok_or(SessionError::InvalidState(session.state()))?;
            session.send_buffer_mut().mark_sent(number, now);
            session.note_sent();
            sealed
        };

        self.dispatch(peer, &sealed, false).await;
        Ok(())
    }

    /// Send a lossy application payload, tagged `packet_id`
    /// (`192..=255`). Sent once, never retransmitted, and not tracked
    /// in the sliding window — a dropped lossy frame is simply gone.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::send_lossless`], minus
    /// [`SessionError::SendBufferFull`] (lossy sends never queue).
    pub async fn send_lossy(&self, peer: Ltk, packet_id: u8, data: &[u8]) -> Result<(), SessionError> {
        let Some(entry) = self.sessions.get(&peer) else {
            return Err(SessionError::UnknownSession);
        };
        let session_arc = entry.value().clone();
        drop(entry);

        let mut payload = Vec::with_capacity(1 + data.len());
        payload.push(packet_id);
        payload.extend_from_slice(data);

        let sealed = {
            let mut session = session_arc.lock().await;
            if session.session_keys().is_none() {
                return Err(SessionError::InvalidState(session.state()));
            }
            let max_size = self.config.reliable.max_crypto_packet_size;
            seal_payload(&mut session, 0, &payload, max_size)
                .ok_or(SessionError::InvalidState(session.state()))?
        };

        self.dispatch(peer, &sealed, false).await;
        Ok(())
    }

    async fn dispatch(&self, peer: Ltk, bytes: &[u8], is_handshake_like: bool) {
        let Some(entry) = self.sessions.get(&peer) else {
            return;
        };
        let session_arc = entry.value().clone();
        drop(entry);

        let now = Instant::now();
        let decision = {
            let session = session_arc.lock().await;
            let timeout = self.config.handshake.udp_direct_timeout();
            pick_transport(&session, now, timeout, is_handshake_like, bytes.len())
        };

        match decision {
            TransportDecision::DirectUdp(addr) => {
                let _ = self.udp.send_to(bytes, addr).await;
            }
            TransportDecision::ProbeUdp(addr) => {
                {
                    let mut session = session_arc.lock().await;
                    let path = match addr {
                        SocketAddr::V4(_) => &mut session.path_v4,
                        SocketAddr::V6(_) => &mut session.path_v6,
                    };
                    path.last_speculative_send = Some(now);
                }
                let _ = self.udp.send_to(bytes, addr).await;
            }
            TransportDecision::TcpRelay => {
                {
                    let mut session = session_arc.lock().await;
                    session.congestion_mut().record_tcp_send(now);
                }
                let mut mux = self.multiplexer.lock().await;
                let _ = mux.send_packet(*peer.as_bytes(), bytes);
            }
        }
    }

    /// Drive one tick of the manager: resend overdue handshake packets
    /// (killing sessions that have exhausted their retry budget),
    /// generate and send request packets for peers with gaps in their
    /// receive window, advance each session's congestion accounting and
    /// spend its retransmit budget on packets the peer reported missing,
    /// and garbage-collect sessions idle well past the direct-path
    /// timeout.
    pub async fn tick(&self, now: Instant) {
        self.retry_pending(now).await;
        self.generate_requests(now).await;
        self.update_congestion(now).await;
        self.resend_due(now).await;
        self.reap_idle(now).await;
    }

    /// Feed each session's queue depth, RTT estimate, and this tick's
    /// sent/resent counts into its [`CongestionController`](crate::congestion::CongestionController).
    async fn update_congestion(&self, now: Instant) {
        let snapshot: Vec<Arc<Mutex<Session>>> =
            self.sessions.iter().map(|kv| kv.value().clone()).collect();

        for arc in snapshot {
            let mut session = arc.lock().await;
            let queue_depth = session.send_buffer_mut().len();
            let rtt = session.rtt_estimate();
            let (sent_this_tick, resent_this_tick) = session.take_tick_counters();
            session.congestion_mut().tick(TickInput {
                queue_depth,
                sent_this_tick,
                resent_this_tick,
                rtt,
                now,
            });
        }
    }

    /// Retransmit send-buffer slots the peer's last request packet
    /// marked missing, spending the congestion controller's retransmit
    /// budget one packet at a time until it's exhausted.
    async fn resend_due(&self, now: Instant) {
        let snapshot: Vec<(Ltk, Arc<Mutex<Session>>)> = self
            .sessions
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect();

        for (peer, arc) in snapshot {
            let due: Vec<u32> = {
                let mut session = arc.lock().await;
                if session.session_keys().is_none() {
                    Vec::new()
                } else {
                    let occupied: Vec<u32> = session.send_buffer_mut().occupied_slots().collect();
                    let mut numbers = Vec::new();
                    for n in occupied {
                        let Some((_, sent_at)) = session.send_buffer_mut().get(n) else {
                            continue;
                        };
                        if sent_at.is_some() {
                            continue;
                        }
                        if !session.congestion_mut().try_consume_retransmit() {
                            break;
                        }
                        numbers.push(n);
                    }
                    numbers
                }
            };

            for number in due {
                let sealed = {
                    let mut session = arc.lock().await;
                    let max_size = self.config.reliable.max_crypto_packet_size;
                    let sealed = seal_data_frame(&mut session, number, max_size);
                    if sealed.is_some() {
                        session.send_buffer_mut().mark_sent(number, now);
                        session.note_resent();
                    }
                    sealed
                };
                if let Some(bytes) = sealed {
                    self.dispatch(peer, &bytes, false).await;
                }
            }
        }
    }

    async fn retry_pending(&self, now: Instant) {
        let interval = self.config.handshake.send_packet_interval;
        let max_tries = self.config.handshake.max_send_packet_tries;

        let mut to_send = Vec::new();
        let mut to_kill = Vec::new();
        for entry in self.retries.iter() {
            let pending = entry.value();
            if now.duration_since(pending.sent_at) < interval {
                continue;
            }
            if pending.attempts >= max_tries {
                to_kill.push(*entry.key());
            } else {
                to_send.push((*entry.key(), pending.target, pending.bytes.clone()));
            }
        }

        for (peer, target, bytes) in to_send {
            if self.udp.send_to(&bytes, target).await.is_ok() {
                if let Some(mut pending) = self.retries.get_mut(&peer) {
                    pending.attempts += 1;
                    pending.sent_at = now;
                }
            }
        }

        for peer in to_kill {
            self.kill_session(peer).await;
        }
    }

    async fn generate_requests(&self, now: Instant) {
        let snapshot: Vec<(Ltk, Arc<Mutex<Session>>)> = self
            .sessions
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect();

        for (peer, arc) in snapshot {
            let maybe_request = {
                let mut session = arc.lock().await;
                if session.session_keys().is_none() {
                    None
                } else {
                    let payload = session.recv_buffer_mut().build_request_payload();
                    if payload.len() > 1 {
                        let number = session.send_buffer_mut().end();
                        let max_size = self.config.reliable.max_crypto_packet_size;
                        seal_payload(&mut session, number, &payload, max_size)
                    } else {
                        None
                    }
                }
            };
            if let Some(bytes) = maybe_request {
                self.dispatch(peer, &bytes, false).await;
            }
        }
    }

    async fn reap_idle(&self, now: Instant) {
        let gc_timeout = self.config.handshake.udp_direct_timeout() * 4;
        let snapshot: Vec<(Ltk, Arc<Mutex<Session>>)> = self
            .sessions
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect();

        for (peer, arc) in snapshot {
            let idle = {
                let session = arc.lock().await;
                session.idle_for(now)
            };
            if idle > gc_timeout {
                self.kill_session(peer).await;
            }
        }
    }

    /// Tear down a peer's session: zero its derived keys, drop its
    /// relay routes, and notify the embedder.
    pub async fn kill_session(&self, peer: Ltk) {
        if let Some((_, arc)) = self.sessions.remove(&peer) {
            let mut session = arc.lock().await;
            session.kill();
        }
        self.retries.remove(&peer);
        self.dht_shared.remove(&peer);
        self.pending_request_nonce.remove(&peer);
        {
            let mut mux = self.multiplexer.lock().await;
            mux.forget_peer(*peer.as_bytes());
        }
        self.callbacks.on_status(peer, SessionState::NoConnection);
    }

    /// The LAN/announce collaborator this manager was built with, for
    /// the embedder's own beacon/announce loop to query.
    #[must_use]
    pub fn onion_collaborator(&self) -> &Arc<dyn OnionCollaborator> {
        &self.onion
    }

    /// Run the manager's event loop: a tick timer and the UDP receive
    /// path, forever. Relay-carried packets arrive through
    /// [`Self::handle_relay_payload`] instead, driven by whatever task
    /// owns the multiplexer's sockets.
    pub async fn run(self: Arc<Self>, tick_interval: Duration) {
        let mut ticker = tokio::time::interval(tick_interval);
        let mut buf = vec![0u8; 2048];
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Instant::now()).await;
                }
                received = self.udp.recv_from(&mut buf) => {
                    if let Ok((n, from)) = received {
                        self.handle_packet(&buf[..n], from).await;
                    }
                }
            }
        }
    }
}

fn seal_data_frame(session: &mut Session, packet_number: u32, max_crypto_packet_size: usize) -> Option<Vec<u8>> {
    let payload = {
        let (p, _) = session.send_buffer_mut().get(packet_number)?;
        p.to_vec()
    };
    seal_payload(session, packet_number, &payload, max_crypto_packet_size)
}

fn seal_payload(
    session: &mut Session,
    packet_number: u32,
    payload: &[u8],
    max_crypto_packet_size: usize,
) -> Option<Vec<u8>> {
    let send_key = session.session_keys()?.send_key;
    let buffer_start = session.recv_buffer_mut().start();
    let plaintext = frame::encode(buffer_start, packet_number, payload, max_crypto_packet_size);
    let nonce = session.next_send_nonce();
    let cipher = wraith_crypto::aead::AeadCipher::new(&send_key);
    let ciphertext = cipher.encrypt(nonce.as_bytes(), &plaintext, &[]).ok()?;

    let mut out = Vec::with_capacity(3 + ciphertext.len());
    out.push(PACKET_CRYPTO_DATA);
    out.extend_from_slice(&nonce.low_u16().to_be_bytes());
    out.extend_from_slice(&ciphertext);
    Some(out)
}

fn hex_prefix(bytes: &[u8; 32]) -> String {
    hex::encode(&bytes[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::keys::DhtPublicKey;
    use crate::onion::NullOnionCollaborator;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::Mutex as StdMutex;

    fn make_session(is_v4_alive: bool, is_v6_alive: bool, now: Instant, timeout: Duration) -> Session {
        let peer = LongTermKeypair::generate();
        let mut session = Session::new_outbound(
            peer.public(),
            DhtPublicKey([0u8; 32]),
            SessionConfig::default(),
            now,
        );
        if is_v4_alive {
            session.observe_udp_receipt(SocketAddr::new(Ipv4Addr::new(203, 0, 113, 5).into(), 9000), now);
        }
        if is_v6_alive {
            session.observe_udp_receipt(
                SocketAddr::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1).into(), 9000),
                now,
            );
        }
        let _ = timeout;
        session
    }

    #[test]
    fn test_pick_transport_prefers_direct_v4_when_alive() {
        let now = Instant::now();
        let timeout = Duration::from_secs(8);
        let session = make_session(true, false, now, timeout);
        let decision = pick_transport(&session, now, timeout, false, 64);
        assert!(matches!(decision, TransportDecision::DirectUdp(addr) if addr.is_ipv4()));
    }

    #[test]
    fn test_pick_transport_prefers_lan_v6_over_v4() {
        let now = Instant::now();
        let timeout = Duration::from_secs(8);
        let session = make_session(true, true, now, timeout);
        let decision = pick_transport(&session, now, timeout, false, 64);
        assert!(matches!(decision, TransportDecision::DirectUdp(addr) if addr.is_ipv6()));
    }

    #[test]
    fn test_pick_transport_prefers_v4_over_non_lan_v6() {
        let now = Instant::now();
        let timeout = Duration::from_secs(8);
        let mut session = make_session(true, false, now, timeout);
        session.observe_udp_receipt(
            SocketAddr::new(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).into(), 9000),
            now,
        );
        let decision = pick_transport(&session, now, timeout, false, 64);
        assert!(matches!(decision, TransportDecision::DirectUdp(addr) if addr.is_ipv4()));
    }

    #[test]
    fn test_pick_transport_probes_when_neither_alive_but_handshake_like() {
        let now = Instant::now();
        let timeout = Duration::from_millis(100);
        let mut session = make_session(true, false, now, timeout);
        let later = now + Duration::from_secs(1);
        let decision = pick_transport(&session, later, timeout, true, 0);
        assert!(matches!(decision, TransportDecision::ProbeUdp(_)));
        // Second probe attempt immediately after should be rate-limited.
        session.path_v4.last_speculative_send = Some(later);
        let decision2 = pick_transport(&session, later, timeout, true, 0);
        assert_eq!(decision2, TransportDecision::TcpRelay);
    }

    #[test]
    fn test_pick_transport_falls_back_to_relay_for_large_payload_without_path() {
        let now = Instant::now();
        let timeout = Duration::from_millis(100);
        let session = make_session(false, false, now, timeout);
        let later = now + Duration::from_secs(1);
        let decision = pick_transport(&session, later, timeout, false, 500);
        assert_eq!(decision, TransportDecision::TcpRelay);
    }

    struct Recorder {
        events: StdMutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                events: StdMutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SessionCallbacks for Recorder {
        fn on_status(&self, peer: Ltk, state: SessionState) {
            self.events
                .lock()
                .unwrap()
                .push(format!("status:{:02x}:{:?}", peer.0[0], state));
        }

        fn on_data(&self, peer: Ltk, data: &[u8]) {
            self.events.lock().unwrap().push(format!(
                "data:{:02x}:{}",
                peer.0[0],
                String::from_utf8_lossy(data)
            ));
        }

        fn on_lossy(&self, peer: Ltk, data: &[u8]) {
            self.events.lock().unwrap().push(format!(
                "lossy:{:02x}:{}",
                peer.0[0],
                String::from_utf8_lossy(data)
            ));
        }

        fn on_dht_pk(&self, _peer: Ltk, _dht_key: DhtPublicKey) {}
    }

    #[tokio::test]
    async fn test_end_to_end_handshake_then_data_over_loopback() {
        let a_ltk = LongTermKeypair::generate();
        let b_ltk = LongTermKeypair::generate();
        let a_dht = DhtKeypair::generate();
        let b_dht = DhtKeypair::generate();
        let a_ltk_pub = a_ltk.public();
        let b_ltk_pub = b_ltk.public();
        let b_dht_pub = DhtPublicKey(*b_dht.public().as_bytes());

        let udp_a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let udp_b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr_b = udp_b.local_addr().unwrap();

        let cb_a = Arc::new(Recorder::new());
        let cb_b = Arc::new(Recorder::new());

        let mgr_a = Arc::new(SessionManager::new(
            a_ltk,
            a_dht,
            SessionConfig::default(),
            udp_a,
            Arc::new(NullOnionCollaborator),
            cb_a.clone(),
        ));
        let mgr_b = Arc::new(SessionManager::new(
            b_ltk,
            b_dht,
            SessionConfig::default(),
            udp_b,
            Arc::new(NullOnionCollaborator),
            cb_b.clone(),
        ));

        mgr_a.connect(b_ltk_pub, b_dht_pub, addr_b).await.unwrap();

        let mut buf_a = vec![0u8; 2048];
        let mut buf_b = vec![0u8; 2048];

        // cookie request: a -> b
        let (n, from) = mgr_b.udp.recv_from(&mut buf_b).await.unwrap();
        mgr_b.handle_packet(&buf_b[..n], from).await;

        // cookie response: b -> a
        let (n, from) = mgr_a.udp.recv_from(&mut buf_a).await.unwrap();
        mgr_a.handle_packet(&buf_a[..n], from).await;

        // handshake: a -> b
        let (n, from) = mgr_b.udp.recv_from(&mut buf_b).await.unwrap();
        mgr_b.handle_packet(&buf_b[..n], from).await;

        // handshake reply: b -> a
        let (n, from) = mgr_a.udp.recv_from(&mut buf_a).await.unwrap();
        mgr_a.handle_packet(&buf_a[..n], from).await;

        assert_eq!(
            mgr_a.session_state(b_ltk_pub).await,
            Some(SessionState::NotConfirmed)
        );

        mgr_a.send_lossless(b_ltk_pub, 16, b"ping-a").await.unwrap();
        let (n, from) = mgr_b.udp.recv_from(&mut buf_b).await.unwrap();
        mgr_b.handle_packet(&buf_b[..n], from).await;

        assert_eq!(
            mgr_b.session_state(a_ltk_pub).await,
            Some(SessionState::Established)
        );
        assert!(cb_b.events().iter().any(|e| e == "data:01:ping-a" || e.starts_with("data:") && e.ends_with("ping-a")));

        mgr_b.send_lossless(a_ltk_pub, 16, b"pong-b").await.unwrap();
        let (n, from) = mgr_a.udp.recv_from(&mut buf_a).await.unwrap();
        mgr_a.handle_packet(&buf_a[..n], from).await;

        assert_eq!(
            mgr_a.session_state(b_ltk_pub).await,
            Some(SessionState::Established)
        );
        assert!(cb_a.events().iter().any(|e| e.ends_with("pong-b")));
    }
}
