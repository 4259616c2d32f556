//! Session state machine: per-peer authenticated, encrypted connection
//! lifecycle from the first cookie request through established data
//! exchange, and its destruction.

use crate::config::SessionConfig;
use crate::congestion::CongestionController;
use crate::cookie::COOKIE_LEN;
use crate::error::SessionError;
use crate::handshake::VerifiedHandshake;
use crate::keys::{DhtPublicKey, Ltk, SessionKeypair};
use crate::nonce::Nonce;
use crate::sliding_window::{RecvBuffer, SendBuffer};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use wraith_crypto::SessionKeys;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No handshake has started; nothing sent or received yet.
    NoConnection,
    /// We sent a cookie request and are awaiting the response.
    CookieRequesting,
    /// We sent our crypto handshake packet and are awaiting the peer's.
    HandshakeSent,
    /// Both handshake packets have been exchanged and verified, but no
    /// data frame has been received yet, so the peer's reachability at
    /// the derived keys is still unconfirmed.
    NotConfirmed,
    /// At least one data frame decrypted successfully under the derived
    /// keys; the session is fully usable.
    Established,
}

impl SessionState {
    fn can_transition(self, to: SessionState) -> bool {
        use SessionState::{CookieRequesting, Established, HandshakeSent, NoConnection, NotConfirmed};
        matches!(
            (self, to),
            (NoConnection, CookieRequesting | NotConfirmed)
                | (CookieRequesting, HandshakeSent)
                | (HandshakeSent, NotConfirmed)
                | (NotConfirmed, Established)
                | (_, NoConnection)
        )
    }
}

/// Direct-path (UDP) reachability tracking for one IP family.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathState {
    /// Last address this peer was observed sending from.
    pub addr: Option<SocketAddr>,
    /// When we last received a packet confirmed to be from this peer on
    /// this path.
    pub last_received: Option<Instant>,
    /// When we last sent a speculative (unconfirmed-path) probe.
    pub last_speculative_send: Option<Instant>,
}

impl PathState {
    /// Whether this path has produced a confirmed receipt within
    /// `timeout`.
    #[must_use]
    pub fn is_alive(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.last_received
            .is_some_and(|t| now.duration_since(t) < timeout)
    }

    fn record_receipt(&mut self, addr: SocketAddr, now: Instant) {
        self.addr = Some(addr);
        self.last_received = Some(now);
    }
}

/// A single peer session: handshake progress, derived keys, the
/// sliding-window reliable layer, congestion state, and path tracking.
pub struct Session {
    state: SessionState,
    config: SessionConfig,

    peer_ltk: Ltk,
    peer_dht_key: Option<DhtPublicKey>,

    our_session_keypair: Option<SessionKeypair>,
    our_base_nonce: Option<Nonce>,
    we_are_initiator: bool,

    session_keys: Option<SessionKeys>,
    send_nonce: Nonce,
    recv_expected_nonce: Nonce,

    send_buffer: SendBuffer,
    recv_buffer: RecvBuffer,
    congestion: CongestionController,
    rtt_estimate: Duration,
    congestion_stalled: bool,
    packets_sent_tick: u32,
    packets_resent_tick: u32,

    /// IPv4 direct-path tracking.
    pub path_v4: PathState,
    /// IPv6 direct-path tracking.
    pub path_v6: PathState,
    /// TCP relay virtual-connection id, if the session has fallen back
    /// to a relay.
    pub tcp_connection_id: Option<u32>,

    created_at: Instant,
    last_activity: Instant,
    handshake_attempts: u32,
}

impl Session {
    /// Create a session for a peer we intend to connect to.
    #[must_use]
    pub fn new_outbound(
        peer_ltk: Ltk,
        peer_dht_key: DhtPublicKey,
        config: SessionConfig,
        now: Instant,
    ) -> Self {
        Self::new(peer_ltk, Some(peer_dht_key), true, config, now)
    }

    /// Create a session for a peer whose identity we only learn once
    /// their handshake packet arrives.
    #[must_use]
    pub fn new_inbound(peer_ltk: Ltk, config: SessionConfig, now: Instant) -> Self {
        Self::new(peer_ltk, None, false, config, now)
    }

    fn new(
        peer_ltk: Ltk,
        peer_dht_key: Option<DhtPublicKey>,
        we_are_initiator: bool,
        config: SessionConfig,
        now: Instant,
    ) -> Self {
        let ring_size = config.reliable.ring_size;
        Self {
            state: SessionState::NoConnection,
            congestion: CongestionController::new(config.congestion.clone(), now),
            config,
            peer_ltk,
            peer_dht_key,
            our_session_keypair: None,
            our_base_nonce: None,
            we_are_initiator,
            session_keys: None,
            send_nonce: Nonce::from_bytes([0u8; 24]),
            recv_expected_nonce: Nonce::from_bytes([0u8; 24]),
            send_buffer: SendBuffer::new(ring_size),
            recv_buffer: RecvBuffer::new(ring_size),
            rtt_estimate: Duration::ZERO,
            congestion_stalled: false,
            packets_sent_tick: 0,
            packets_resent_tick: 0,
            path_v4: PathState::default(),
            path_v6: PathState::default(),
            tcp_connection_id: None,
            created_at: now,
            last_activity: now,
            handshake_attempts: 0,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The peer's long-term identity key.
    #[must_use]
    pub fn peer_ltk(&self) -> Ltk {
        self.peer_ltk
    }

    /// The peer's DHT key, once known (present from creation for
    /// outbound sessions, or after the first verified handshake for
    /// inbound ones).
    #[must_use]
    pub fn peer_dht_key(&self) -> Option<DhtPublicKey> {
        self.peer_dht_key
    }

    /// Whether this session initiated the connection (sent the first
    /// cookie request) rather than accepting an inbound handshake.
    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.we_are_initiator
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition(to) {
            return Err(SessionError::InvalidState(self.state));
        }
        tracing::debug!(from = ?self.state, to = ?to, "session state transition");
        self.state = to;
        Ok(())
    }

    /// Mark that we have sent a cookie request and generated an
    /// outstanding request nonce, transitioning `NoConnection` ->
    /// `CookieRequesting`.
    pub fn begin_cookie_request(&mut self, now: Instant) -> Result<(), SessionError> {
        self.transition(SessionState::CookieRequesting)?;
        self.handshake_attempts = 0;
        self.last_activity = now;
        Ok(())
    }

    /// Generate our ephemeral session keypair and base nonce, bump the
    /// retry counter, and transition `CookieRequesting` -> `HandshakeSent`.
    /// Returns the keypair's public half and the base nonce, for the
    /// caller to build the outgoing handshake packet.
    pub fn begin_handshake(&mut self, now: Instant) -> Result<([u8; 32], [u8; 24]), SessionError> {
        self.transition(SessionState::HandshakeSent)?;

        let keypair = SessionKeypair::generate();
        let public = keypair.public();
        let mut base_nonce_bytes = [0u8; 24];
        wraith_crypto::random::fill_random(&mut base_nonce_bytes)
            .map_err(|_| SessionError::InvalidState(self.state))?;

        self.our_session_keypair = Some(keypair);
        self.our_base_nonce = Some(Nonce::from_bytes(base_nonce_bytes));
        self.handshake_attempts += 1;
        self.last_activity = now;

        Ok((public, base_nonce_bytes))
    }

    /// Whether another handshake retry attempt is still permitted before
    /// the session should be killed as unreachable.
    #[must_use]
    pub fn handshake_retries_exhausted(&self) -> bool {
        self.handshake_attempts >= self.config.handshake.max_send_packet_tries
    }

    /// Complete the handshake as the initiator: derive session keys from
    /// our stored ephemeral secret and the peer's session public key,
    /// verify the peer's claimed identity matches what we expected, and
    /// transition `HandshakeSent` -> `NotConfirmed`.
    pub fn complete_as_initiator(
        &mut self,
        verified: VerifiedHandshake,
        now: Instant,
    ) -> Result<(), SessionError> {
        if verified.peer_ltk != *self.peer_ltk.as_bytes() {
            return Err(SessionError::DhtKeyChanged);
        }
        let keypair = self
            .our_session_keypair
            .take()
            .ok_or(SessionError::InvalidState(self.state))?;
        let shared = keypair
            .into_shared_secret(&verified.session_pub)
            .ok_or(SessionError::InvalidState(self.state))?;

        self.finish_handshake(shared, verified, now, true)
    }

    /// Complete the handshake as the responder: generate our own
    /// ephemeral keypair and base nonce, derive session keys against the
    /// initiator's session public key, and transition `NoConnection` ->
    /// `NotConfirmed`. Returns the keypair's public half and base nonce
    /// for the caller to build the reply handshake packet.
    pub fn complete_as_responder(
        &mut self,
        verified: VerifiedHandshake,
        now: Instant,
    ) -> Result<([u8; 32], [u8; 24]), SessionError> {
        self.peer_dht_key = Some(DhtPublicKey(verified.peer_dht_key));

        let keypair = SessionKeypair::generate();
        let our_public = keypair.public();
        let mut base_nonce_bytes = [0u8; 24];
        wraith_crypto::random::fill_random(&mut base_nonce_bytes)
            .map_err(|_| SessionError::InvalidState(self.state))?;
        let our_base_nonce = Nonce::from_bytes(base_nonce_bytes);

        let shared = keypair
            .into_shared_secret(&verified.session_pub)
            .ok_or(SessionError::InvalidState(self.state))?;

        self.our_base_nonce = Some(our_base_nonce);
        self.finish_handshake(shared, verified, now, false)?;

        Ok((our_public, base_nonce_bytes))
    }

    fn finish_handshake(
        &mut self,
        shared_secret: [u8; 32],
        verified: VerifiedHandshake,
        now: Instant,
        we_are_initiator: bool,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::NotConfirmed)?;

        self.session_keys = Some(SessionKeys::derive(&shared_secret, we_are_initiator));
        self.recv_expected_nonce = Nonce::from_bytes(verified.base_nonce);
        self.send_nonce = self.our_base_nonce.unwrap_or(self.send_nonce);
        self.last_activity = now;
        Ok(())
    }

    /// The fresh cookie the cookie-engine should hand back to the peer
    /// inside our handshake / reply, scoped to `peer_ltk`/`peer_dht_key`.
    #[must_use]
    pub fn identity(&self) -> (Ltk, Option<DhtPublicKey>) {
        (self.peer_ltk, self.peer_dht_key)
    }

    /// Mark the session fully usable after the first data frame has been
    /// decrypted successfully, transitioning `NotConfirmed` ->
    /// `Established`.
    pub fn confirm(&mut self, now: Instant) -> Result<(), SessionError> {
        self.transition(SessionState::Established)?;
        self.last_activity = now;
        Ok(())
    }

    /// This session's derived AEAD keys, once the handshake has
    /// completed.
    #[must_use]
    pub fn session_keys(&self) -> Option<&SessionKeys> {
        self.session_keys.as_ref()
    }

    /// The next nonce to use for an outgoing frame, advancing the
    /// internal counter by one.
    pub fn next_send_nonce(&mut self) -> Nonce {
        let current = self.send_nonce;
        self.send_nonce.increment_by(1);
        current
    }

    /// Reconstruct the full nonce an incoming frame used from its
    /// carried low 16 bits, and if it falls within the acceptance
    /// window, advance our expectation to match.
    pub fn reconstruct_and_advance_recv_nonce(&mut self, received_low: u16) -> Option<Nonce> {
        let reconstructed = Nonce::reconstruct(&self.recv_expected_nonce, received_low)?;
        let mut next_expected = reconstructed;
        next_expected.increment_by(1);
        self.recv_expected_nonce = next_expected;
        Some(reconstructed)
    }

    /// Mutable access to the send-side sliding window.
    pub fn send_buffer_mut(&mut self) -> &mut SendBuffer {
        &mut self.send_buffer
    }

    /// Mutable access to the receive-side sliding window.
    pub fn recv_buffer_mut(&mut self) -> &mut RecvBuffer {
        &mut self.recv_buffer
    }

    /// Mutable access to the congestion controller.
    pub fn congestion_mut(&mut self) -> &mut CongestionController {
        &mut self.congestion
    }

    /// Update the RTT estimate used to pick the congestion accounting
    /// window, from a freshly acknowledged send-buffer sample.
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        self.rtt_estimate = sample;
    }

    /// Current RTT estimate fed to [`CongestionController::tick`].
    #[must_use]
    pub fn rtt_estimate(&self) -> Duration {
        self.rtt_estimate
    }

    /// Whether the last lossless write was rejected for lack of a
    /// congestion token. Cleared once a retry succeeds.
    #[must_use]
    pub fn congestion_stalled(&self) -> bool {
        self.congestion_stalled
    }

    pub fn set_congestion_stalled(&mut self, stalled: bool) {
        self.congestion_stalled = stalled;
    }

    /// Count one first-time send toward this tick's congestion accounting.
    pub fn note_sent(&mut self) {
        self.packets_sent_tick = self.packets_sent_tick.saturating_add(1);
    }

    /// Count one retransmission toward this tick's congestion accounting.
    pub fn note_resent(&mut self) {
        self.packets_resent_tick = self.packets_resent_tick.saturating_add(1);
    }

    /// Drain the accumulated sent/resent counters for this tick.
    pub fn take_tick_counters(&mut self) -> (u32, u32) {
        (
            std::mem::take(&mut self.packets_sent_tick),
            std::mem::take(&mut self.packets_resent_tick),
        )
    }

    /// Record a UDP packet confirmed to originate from this peer,
    /// updating path-liveness tracking for the matching address family.
    pub fn observe_udp_receipt(&mut self, addr: SocketAddr, now: Instant) {
        self.last_activity = now;
        match addr {
            SocketAddr::V4(_) => self.path_v4.record_receipt(addr, now),
            SocketAddr::V6(_) => self.path_v6.record_receipt(addr, now),
        }
    }

    /// Whether this session has gone idle long enough that its direct
    /// UDP path (in aggregate) should be considered dead.
    #[must_use]
    pub fn direct_path_dead(&self, now: Instant) -> bool {
        let timeout = self.config.handshake.udp_direct_timeout();
        !self.path_v4.is_alive(now, timeout) && !self.path_v6.is_alive(now, timeout)
    }

    /// Time since the session was created.
    #[must_use]
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.duration_since(self.created_at)
    }

    /// Time since the last recorded activity (handshake progress, data
    /// frame, or confirmed receipt).
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.duration_since(self.last_activity)
    }

    /// Destroy the session: zero the derived keys, drop the sliding
    /// windows, and reset to `NoConnection`. Called on local close, a
    /// received KILL packet, handshake timeout, or a detected DHT-key
    /// change on an established peer.
    pub fn kill(&mut self) {
        self.session_keys = None;
        self.our_session_keypair = None;
        self.our_base_nonce = None;
        let ring_size = self.config.reliable.ring_size;
        self.send_buffer = SendBuffer::new(ring_size);
        self.recv_buffer = RecvBuffer::new(ring_size);
        self.tcp_connection_id = None;
        self.state = SessionState::NoConnection;
        self.handshake_attempts = 0;
        self.rtt_estimate = Duration::ZERO;
        self.congestion_stalled = false;
        self.packets_sent_tick = 0;
        self.packets_resent_tick = 0;
    }
}
