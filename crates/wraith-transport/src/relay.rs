//! TCP relay client.
//!
//! Speaks the relay wire protocol: an optional HTTP/SOCKS5 proxy
//! negotiation, a long-term-key-scoped Diffie-Hellman
//! handshake establishing a per-connection session key, then a
//! length-prefixed AEAD tunnel carrying routing control packets, ping/
//! pong keepalive, out-of-band (OOB) sends, onion egress, and routed
//! application data for up to [`crate::error::RelayError::ConnectionTableFull`]
//! virtual connections.
//!
//! This client does not know about [`wraith_core::session::Session`] —
//! it only knows long-term keys (32-byte `[u8; 32]`) and raw payloads.
//! The multiplexer above it maps those payloads onto sessions.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use wraith_crypto::aead::AeadCipher;
use wraith_crypto::random::fill_random;
use wraith_crypto::x25519::{PrivateKey, PublicKey};
use wraith_crypto::SessionKeys;

use crate::error::{RelayError, RelayResult};

/// First packet-id reserved for routed application data; ids below this
/// carry relay control traffic (routing, keepalive, OOB, onion egress).
pub const NUM_RESERVED_PACKET_IDS: u8 = 16;

const PACKET_ROUTING_REQUEST: u8 = 0;
const PACKET_ROUTING_RESPONSE: u8 = 1;
const PACKET_CONNECT_NOTIFICATION: u8 = 2;
const PACKET_DISCONNECT_NOTIFICATION: u8 = 3;
const PACKET_PING: u8 = 4;
const PACKET_PONG: u8 = 5;
const PACKET_OOB_SEND: u8 = 6;
const PACKET_OOB_RECV: u8 = 7;
const PACKET_ONION_REQUEST: u8 = 8;
const PACKET_ONION_RESPONSE: u8 = 9;

const HANDSHAKE_PAYLOAD_LEN: usize = 32 + 24;
/// `client_ltk_pub (32) || nonce (24) || AEAD(session_pub || session_nonce)`
pub const HANDSHAKE_REQUEST_LEN: usize = 32 + 24 + HANDSHAKE_PAYLOAD_LEN + 16;
/// `nonce (24) || AEAD(session_pub || session_nonce)`
pub const HANDSHAKE_RESPONSE_LEN: usize = 24 + HANDSHAKE_PAYLOAD_LEN + 16;

/// Maximum length of one relay tunnel frame's ciphertext, matching the
/// u16 length prefix.
const MAX_FRAME_LEN: usize = u16::MAX as usize;

fn increment_nonce(nonce: &mut [u8; 24]) {
    for byte in nonce.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

/// Build the client's relay handshake request.
///
/// # Errors
///
/// Returns [`RelayError::FrameError`] if the encryption step fails
/// (only possible on an internal RNG failure).
pub fn build_handshake_request(
    our_secret: &PrivateKey,
    our_ltk_pub: &PublicKey,
    relay_ltk_pub: &PublicKey,
    session_pub: &[u8; 32],
    session_nonce: &[u8; 24],
) -> RelayResult<Vec<u8>> {
    let shared = our_secret
        .exchange(relay_ltk_pub)
        .ok_or(RelayError::HandshakeAuthFailed)?;
    let cipher = AeadCipher::new(shared.as_bytes());

    let mut nonce = [0u8; 24];
    fill_random(&mut nonce).map_err(|_| RelayError::FrameError("rng failure"))?;

    let mut payload = Vec::with_capacity(HANDSHAKE_PAYLOAD_LEN);
    payload.extend_from_slice(session_pub);
    payload.extend_from_slice(session_nonce);

    let ciphertext = cipher
        .encrypt(&nonce, &payload, &[])
        .map_err(|_| RelayError::FrameError("handshake encrypt failed"))?;

    let mut out = Vec::with_capacity(HANDSHAKE_REQUEST_LEN);
    out.extend_from_slice(our_ltk_pub.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Server-side: open a client's handshake request, returning the
/// client's long-term key, the precomputed shared key (reused for the
/// response), and the client's session public key / base nonce.
///
/// # Errors
///
/// Returns [`RelayError::FrameError`] if `data` is the wrong length, or
/// [`RelayError::HandshakeAuthFailed`] if the DH or AEAD open fails.
pub fn open_handshake_request(
    data: &[u8],
    our_secret: &PrivateKey,
) -> RelayResult<(PublicKey, [u8; 32], [u8; 32], [u8; 24])> {
    if data.len() != HANDSHAKE_REQUEST_LEN {
        return Err(RelayError::FrameError("bad handshake request length"));
    }
    let client_ltk_pub = PublicKey::from_bytes(data[0..32].try_into().unwrap());
    let nonce: [u8; 24] = data[32..56].try_into().unwrap();
    let ciphertext = &data[56..];

    let shared = our_secret
        .exchange(&client_ltk_pub)
        .ok_or(RelayError::HandshakeAuthFailed)?;
    let shared_bytes = *shared.as_bytes();
    let cipher = AeadCipher::new(&shared_bytes);
    let plaintext = cipher
        .decrypt(&nonce, ciphertext, &[])
        .map_err(|_| RelayError::HandshakeAuthFailed)?;

    let session_pub: [u8; 32] = plaintext[0..32].try_into().unwrap();
    let session_nonce: [u8; 24] = plaintext[32..56].try_into().unwrap();
    Ok((client_ltk_pub, shared_bytes, session_pub, session_nonce))
}

/// Server-side: build the relay handshake response.
///
/// # Errors
///
/// Returns [`RelayError::FrameError`] on an internal RNG or AEAD
/// failure.
pub fn build_handshake_response(
    shared_key: &[u8; 32],
    session_pub: &[u8; 32],
    session_nonce: &[u8; 24],
) -> RelayResult<Vec<u8>> {
    let cipher = AeadCipher::new(shared_key);
    let mut nonce = [0u8; 24];
    fill_random(&mut nonce).map_err(|_| RelayError::FrameError("rng failure"))?;

    let mut payload = Vec::with_capacity(HANDSHAKE_PAYLOAD_LEN);
    payload.extend_from_slice(session_pub);
    payload.extend_from_slice(session_nonce);

    let ciphertext = cipher
        .encrypt(&nonce, &payload, &[])
        .map_err(|_| RelayError::FrameError("handshake encrypt failed"))?;

    let mut out = Vec::with_capacity(HANDSHAKE_RESPONSE_LEN);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Client-side: open the relay's handshake response.
///
/// # Errors
///
/// Returns [`RelayError::FrameError`] for a malformed response or
/// [`RelayError::HandshakeAuthFailed`] if the AEAD open fails.
pub fn open_handshake_response(
    data: &[u8],
    shared_key: &[u8; 32],
) -> RelayResult<([u8; 32], [u8; 24])> {
    if data.len() != HANDSHAKE_RESPONSE_LEN {
        return Err(RelayError::FrameError("bad handshake response length"));
    }
    let nonce: [u8; 24] = data[0..24].try_into().unwrap();
    let ciphertext = &data[24..];

    let cipher = AeadCipher::new(shared_key);
    let plaintext = cipher
        .decrypt(&nonce, ciphertext, &[])
        .map_err(|_| RelayError::HandshakeAuthFailed)?;

    let session_pub: [u8; 32] = plaintext[0..32].try_into().unwrap();
    let session_nonce: [u8; 24] = plaintext[32..56].try_into().unwrap();
    Ok((session_pub, session_nonce))
}

/// Connection-establishment phase a [`RelayClient`] is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// The relay handshake has completed but no control packet has been
    /// received from the relay since the socket came up, so routing
    /// state from a prior connection (if any) is not yet trusted.
    Unconfirmed,
    /// At least one packet has been received since handshake; routing
    /// requests can be trusted to reflect the relay's live state.
    Confirmed,
}

/// A proxy to tunnel the initial TCP connect through.
#[derive(Debug, Clone)]
pub enum ProxyConfig {
    /// Issue an HTTP `CONNECT` request to `addr` before the relay
    /// handshake.
    Http(SocketAddr),
    /// Negotiate a SOCKS5 CONNECT to `addr` before the relay handshake.
    Socks5(SocketAddr),
}

/// Status of one slot in a relay's virtual-connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Slot is free.
    Unused,
    /// A routing request was sent; no response yet.
    Registered,
    /// The relay confirmed the peer is online and routable.
    Online,
}

struct ConnectionSlot {
    peer_ltk: [u8; 32],
    status: ConnectionStatus,
}

/// Event surfaced by [`RelayClient::poll_event`] for the multiplexer to
/// act on.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// The relay answered a routing request.
    RoutingResponse {
        /// Virtual-connection slot this routing request used.
        connection_id: u8,
        /// The peer's long-term key that was being routed.
        peer_ltk: [u8; 32],
        /// Whether the peer is currently reachable through this relay.
        online: bool,
    },
    /// A previously-registered peer came online.
    Connected {
        /// Virtual-connection slot.
        connection_id: u8,
    },
    /// A previously-online peer went offline or the relay dropped the
    /// route.
    Disconnected {
        /// Virtual-connection slot.
        connection_id: u8,
    },
    /// The relay answered a keepalive ping.
    Pong {
        /// Echoed ping identifier.
        ping_id: u64,
    },
    /// An out-of-band packet addressed to us by long-term key, not an
    /// established virtual connection.
    OobData {
        /// The sender's long-term key.
        sender_ltk: [u8; 32],
        /// Payload bytes.
        data: Vec<u8>,
    },
    /// An onion response forwarded by the relay.
    OnionResponse {
        /// Payload bytes.
        data: Vec<u8>,
    },
    /// Application data routed to one of our virtual connections.
    Data {
        /// Virtual-connection slot.
        connection_id: u8,
        /// Payload bytes.
        data: Vec<u8>,
    },
}

/// A connected, handshaken TCP relay client.
pub struct RelayClient {
    relay_ltk: [u8; 32],
    state: ConnectState,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    send_key: [u8; 32],
    recv_key: [u8; 32],
    send_nonce: [u8; 24],
    recv_nonce: [u8; 24],
    connections: Vec<ConnectionSlot>,
    priority_queue: VecDeque<Vec<u8>>,
    ordinary_queue: VecDeque<Vec<u8>>,
    pending_ping_id: Option<u64>,
    next_ping_id: u64,
    last_ping_sent: Option<Instant>,
    last_pong_received: Option<Instant>,
    onion_capable: bool,
}

impl RelayClient {
    /// Connect to a relay at `addr`, optionally through `proxy`, then
    /// perform the relay handshake as the client (initiator).
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] for connection failures,
    /// [`RelayError::HttpConnectRejected`] / [`RelayError::Socks5Rejected`]
    /// for proxy negotiation failures, and [`RelayError::HandshakeAuthFailed`]
    /// if the relay's response doesn't authenticate.
    pub async fn connect(
        addr: SocketAddr,
        proxy: Option<ProxyConfig>,
        our_ltk_secret: &PrivateKey,
        our_ltk_pub: &PublicKey,
        relay_ltk_pub: [u8; 32],
        num_client_connections: usize,
    ) -> RelayResult<Self> {
        let target = match &proxy {
            Some(ProxyConfig::Http(proxy_addr) | ProxyConfig::Socks5(proxy_addr)) => *proxy_addr,
            None => addr,
        };
        let mut stream = TcpStream::connect(target).await?;

        match proxy {
            Some(ProxyConfig::Http(_)) => http_connect(&mut stream, addr).await?,
            Some(ProxyConfig::Socks5(_)) => socks5_connect(&mut stream, addr).await?,
            None => {}
        }

        let relay_pub = PublicKey::from_bytes(relay_ltk_pub);
        let mut session_pub = [0u8; 32];
        let mut session_nonce = [0u8; 24];
        fill_random(&mut session_pub).map_err(|_| RelayError::FrameError("rng failure"))?;
        fill_random(&mut session_nonce).map_err(|_| RelayError::FrameError("rng failure"))?;

        let request = build_handshake_request(
            our_ltk_secret,
            our_ltk_pub,
            &relay_pub,
            &session_pub,
            &session_nonce,
        )?;
        stream.write_all(&request).await?;

        let mut response_buf = vec![0u8; HANDSHAKE_RESPONSE_LEN];
        stream.read_exact(&mut response_buf).await?;

        let shared = our_ltk_secret
            .exchange(&relay_pub)
            .ok_or(RelayError::HandshakeAuthFailed)?;
        let (relay_session_pub, relay_session_nonce) =
            open_handshake_response(&response_buf, shared.as_bytes())?;

        let (reader, writer) = stream.into_split();
        Ok(Self::from_parts(
            relay_ltk_pub,
            reader,
            writer,
            &session_pub,
            &relay_session_pub,
            session_nonce,
            relay_session_nonce,
            true,
            num_client_connections,
        ))
    }

    fn from_parts(
        relay_ltk: [u8; 32],
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        our_session_pub: &[u8; 32],
        peer_session_pub: &[u8; 32],
        our_session_nonce: [u8; 24],
        peer_session_nonce: [u8; 24],
        we_are_initiator: bool,
        num_client_connections: usize,
    ) -> Self {
        // The tunnel key is independent of the long-term-key-scoped
        // handshake key: it binds to the *session* public keys so a
        // compromised handshake key alone cannot read tunnel traffic
        // after the fact.
        let tunnel_secret = blake3_tunnel_seed(our_session_pub, peer_session_pub);
        let keys = SessionKeys::derive(&tunnel_secret, we_are_initiator);

        Self {
            relay_ltk,
            state: ConnectState::Unconfirmed,
            reader,
            writer,
            send_key: keys.send_key,
            recv_key: keys.recv_key,
            send_nonce: our_session_nonce,
            recv_nonce: peer_session_nonce,
            connections: (0..num_client_connections)
                .map(|_| ConnectionSlot {
                    peer_ltk: [0u8; 32],
                    status: ConnectionStatus::Unused,
                })
                .collect(),
            priority_queue: VecDeque::new(),
            ordinary_queue: VecDeque::new(),
            pending_ping_id: None,
            next_ping_id: 1,
            last_ping_sent: None,
            last_pong_received: None,
            onion_capable: false,
        }
    }

    /// Current confirmation state.
    #[must_use]
    pub fn state(&self) -> ConnectState {
        self.state
    }

    /// Whether this relay is designated to carry onion-announce egress.
    #[must_use]
    pub fn is_onion_capable(&self) -> bool {
        self.onion_capable
    }

    /// Mark whether this relay should carry onion-announce egress.
    pub fn set_onion_capable(&mut self, capable: bool) {
        self.onion_capable = capable;
    }

    /// The relay's long-term key, as given at connect time.
    #[must_use]
    pub fn relay_ltk(&self) -> [u8; 32] {
        self.relay_ltk
    }

    async fn send_frame(&mut self, plaintext: &[u8]) -> RelayResult<()> {
        let cipher = AeadCipher::new(&self.send_key);
        let ciphertext = cipher
            .encrypt(&self.send_nonce, plaintext, &[])
            .map_err(|_| RelayError::FrameError("tunnel encrypt failed"))?;
        increment_nonce(&mut self.send_nonce);

        if ciphertext.len() > MAX_FRAME_LEN {
            return Err(RelayError::FrameError("frame too large"));
        }
        let len = ciphertext.len() as u16;
        self.writer.write_all(&len.to_be_bytes()).await?;
        self.writer.write_all(&ciphertext).await?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> RelayResult<Vec<u8>> {
        let mut len_buf = [0u8; 2];
        self.reader.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut ciphertext = vec![0u8; len];
        self.reader.read_exact(&mut ciphertext).await?;

        let cipher = AeadCipher::new(&self.recv_key);
        let plaintext = cipher
            .decrypt(&self.recv_nonce, &ciphertext, &[])
            .map_err(|_| RelayError::FrameError("tunnel decrypt failed"))?;
        increment_nonce(&mut self.recv_nonce);
        Ok(plaintext)
    }

    /// Read and dispatch the next control or data packet from the
    /// relay, updating internal routing/ping state, and return it as a
    /// [`RelayEvent`] for the caller.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] on a dropped connection or
    /// [`RelayError::FrameError`] on a malformed frame.
    pub async fn poll_event(&mut self) -> RelayResult<RelayEvent> {
        loop {
            let packet = self.recv_frame().await?;
            self.state = ConnectState::Confirmed;
            if packet.is_empty() {
                return Err(RelayError::FrameError("empty tunnel packet"));
            }

            match packet[0] {
                PACKET_ROUTING_RESPONSE => {
                    if packet.len() < 34 {
                        return Err(RelayError::FrameError("short routing response"));
                    }
                    let connection_id = packet[1];
                    let peer_ltk: [u8; 32] = packet[2..34].try_into().unwrap();
                    let online = self
                        .slot_mut(connection_id)
                        .map(|slot| {
                            slot.peer_ltk = peer_ltk;
                            slot.status == ConnectionStatus::Online
                        })
                        .unwrap_or(false);
                    return Ok(RelayEvent::RoutingResponse {
                        connection_id,
                        peer_ltk,
                        online,
                    });
                }
                PACKET_CONNECT_NOTIFICATION => {
                    let connection_id = *packet.get(1).ok_or(RelayError::FrameError("short connect notification"))?;
                    if let Some(slot) = self.slot_mut(connection_id) {
                        slot.status = ConnectionStatus::Online;
                    }
                    tracing::debug!(connection_id, "relay virtual connection online");
                    return Ok(RelayEvent::Connected { connection_id });
                }
                PACKET_DISCONNECT_NOTIFICATION => {
                    let connection_id = *packet
                        .get(1)
                        .ok_or(RelayError::FrameError("short disconnect notification"))?;
                    if let Some(slot) = self.slot_mut(connection_id) {
                        slot.status = ConnectionStatus::Registered;
                    }
                    tracing::debug!(connection_id, "relay virtual connection offline");
                    return Ok(RelayEvent::Disconnected { connection_id });
                }
                PACKET_PING => {
                    if packet.len() < 9 {
                        return Err(RelayError::FrameError("short ping"));
                    }
                    let ping_id = u64::from_be_bytes(packet[1..9].try_into().unwrap());
                    let mut pong = vec![PACKET_PONG];
                    pong.extend_from_slice(&ping_id.to_be_bytes());
                    self.priority_queue.push_back(pong);
                }
                PACKET_PONG => {
                    if packet.len() < 9 {
                        return Err(RelayError::FrameError("short pong"));
                    }
                    let ping_id = u64::from_be_bytes(packet[1..9].try_into().unwrap());
                    if self.pending_ping_id == Some(ping_id) {
                        self.pending_ping_id = None;
                        self.last_pong_received = Some(Instant::now());
                    }
                    return Ok(RelayEvent::Pong { ping_id });
                }
                PACKET_OOB_RECV => {
                    if packet.len() < 33 {
                        return Err(RelayError::FrameError("short oob recv"));
                    }
                    let sender_ltk: [u8; 32] = packet[1..33].try_into().unwrap();
                    return Ok(RelayEvent::OobData {
                        sender_ltk,
                        data: packet[33..].to_vec(),
                    });
                }
                PACKET_ONION_RESPONSE => {
                    return Ok(RelayEvent::OnionResponse {
                        data: packet[1..].to_vec(),
                    });
                }
                PACKET_ROUTING_REQUEST | PACKET_OOB_SEND | PACKET_ONION_REQUEST => {
                    return Err(RelayError::FrameError("client-only packet from relay"));
                }
                id if id >= NUM_RESERVED_PACKET_IDS => {
                    let connection_id = id - NUM_RESERVED_PACKET_IDS;
                    return Ok(RelayEvent::Data {
                        connection_id,
                        data: packet[1..].to_vec(),
                    });
                }
                _ => return Err(RelayError::FrameError("unknown relay packet id")),
            }
        }
    }

    fn slot_mut(&mut self, connection_id: u8) -> Option<&mut ConnectionSlot> {
        self.connections.get_mut(connection_id as usize)
    }

    /// Reserve a virtual-connection slot and queue a routing request for
    /// `peer_ltk`. Returns the slot's connection id.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionTableFull`] if every slot is in
    /// use.
    pub fn queue_routing_request(&mut self, peer_ltk: [u8; 32]) -> RelayResult<u8> {
        let slot_index = self
            .connections
            .iter()
            .position(|s| s.status == ConnectionStatus::Unused)
            .ok_or(RelayError::ConnectionTableFull(self.connections.len()))?;
        self.connections[slot_index] = ConnectionSlot {
            peer_ltk,
            status: ConnectionStatus::Registered,
        };

        let mut packet = vec![PACKET_ROUTING_REQUEST];
        packet.extend_from_slice(&peer_ltk);
        self.priority_queue.push_back(packet);
        Ok(slot_index as u8)
    }

    /// Queue application data addressed to an established virtual
    /// connection. An ordinary write is only accepted while both send
    /// queues are empty; a relay with pending data already queued (a
    /// busy outgoing socket) rejects it rather than buffering
    /// unboundedly, mirroring the priority queue's exclusive claim on
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotConfirmed`] if the slot isn't online, or
    /// [`RelayError::WouldBlock`] if either queue already holds data.
    pub fn queue_data(&mut self, connection_id: u8, data: &[u8]) -> RelayResult<()> {
        let online = self
            .connections
            .get(connection_id as usize)
            .map(|s| s.status == ConnectionStatus::Online)
            .unwrap_or(false);
        if !online {
            return Err(RelayError::NotConfirmed);
        }
        if !self.priority_queue.is_empty() || !self.ordinary_queue.is_empty() {
            return Err(RelayError::WouldBlock);
        }
        let mut packet = vec![NUM_RESERVED_PACKET_IDS + connection_id];
        packet.extend_from_slice(data);
        self.ordinary_queue.push_back(packet);
        Ok(())
    }

    /// Queue an out-of-band packet addressed directly by long-term key,
    /// bypassing the virtual-connection table. Like [`Self::queue_data`],
    /// only accepted while both send queues are empty.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::WouldBlock`] if either queue already holds
    /// data.
    pub fn queue_oob_send(&mut self, dest_ltk: [u8; 32], data: &[u8]) -> RelayResult<()> {
        if !self.priority_queue.is_empty() || !self.ordinary_queue.is_empty() {
            return Err(RelayError::WouldBlock);
        }
        let mut packet = vec![PACKET_OOB_SEND];
        packet.extend_from_slice(&dest_ltk);
        packet.extend_from_slice(data);
        self.ordinary_queue.push_back(packet);
        Ok(())
    }

    /// Queue an onion-announce request for egress through this relay.
    pub fn queue_onion_request(&mut self, data: &[u8]) {
        let mut packet = vec![PACKET_ONION_REQUEST];
        packet.extend_from_slice(data);
        self.priority_queue.push_back(packet);
    }

    /// Queue a keepalive ping if `ping_frequency` has elapsed since the
    /// last one. Idempotent when a ping is already outstanding.
    pub fn maybe_queue_ping(&mut self, now: Instant, ping_frequency: Duration) {
        if self.pending_ping_id.is_some() {
            return;
        }
        let due = self
            .last_ping_sent
            .map(|t| now.duration_since(t) >= ping_frequency)
            .unwrap_or(true);
        if !due {
            return;
        }
        let ping_id = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(1).max(1);
        self.pending_ping_id = Some(ping_id);
        self.last_ping_sent = Some(now);

        let mut packet = vec![PACKET_PING];
        packet.extend_from_slice(&ping_id.to_be_bytes());
        self.priority_queue.push_back(packet);
    }

    /// Whether the outstanding ping (if any) has gone unanswered longer
    /// than `ping_timeout`.
    #[must_use]
    pub fn ping_timed_out(&self, now: Instant, ping_timeout: Duration) -> bool {
        let timed_out = match (self.pending_ping_id, self.last_ping_sent) {
            (Some(_), Some(sent)) => now.duration_since(sent) >= ping_timeout,
            _ => false,
        };
        if timed_out {
            tracing::warn!(relay_ltk_prefix = self.relay_ltk[0], "relay ping timed out");
        }
        timed_out
    }

    /// Drain the priority queue, then the ordinary queue, writing every
    /// queued packet to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the underlying write fails.
    pub async fn flush(&mut self) -> RelayResult<()> {
        while let Some(packet) = self.priority_queue.pop_front() {
            self.send_frame(&packet).await?;
        }
        while let Some(packet) = self.ordinary_queue.pop_front() {
            self.send_frame(&packet).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }
}

fn blake3_tunnel_seed(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    // Sorted so both peers hash the two session public keys in the same
    // order regardless of who initiated.
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = wraith_crypto::hash::TreeHasher::new();
    hasher.update_batch(&[first.as_slice(), second.as_slice()]);
    hasher.finalize()
}

async fn http_connect(stream: &mut TcpStream, target: SocketAddr) -> RelayResult<()> {
    let request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RelayError::HttpConnectRejected);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 8192 {
            return Err(RelayError::HttpConnectRejected);
        }
    }

    let status_line = buf
        .split(|&b| b == b'\n')
        .next()
        .ok_or(RelayError::HttpConnectRejected)?;
    let ok = status_line.windows(3).any(|w| w == b"200");
    if ok {
        Ok(())
    } else {
        Err(RelayError::HttpConnectRejected)
    }
}

async fn socks5_connect(stream: &mut TcpStream, target: SocketAddr) -> RelayResult<()> {
    // Method-selection: version 5, one method, no-auth.
    stream.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut method_reply = [0u8; 2];
    stream.read_exact(&mut method_reply).await?;
    if method_reply[0] != 0x05 || method_reply[1] != 0x00 {
        return Err(RelayError::Socks5Rejected("no-auth method not accepted"));
    }

    let mut request = vec![0x05, 0x01, 0x00];
    match target {
        SocketAddr::V4(addr) => {
            request.push(0x01);
            request.extend_from_slice(&addr.ip().octets());
            request.extend_from_slice(&addr.port().to_be_bytes());
        }
        SocketAddr::V6(addr) => {
            request.push(0x04);
            request.extend_from_slice(&addr.ip().octets());
            request.extend_from_slice(&addr.port().to_be_bytes());
        }
    }
    stream.write_all(&request).await?;

    let mut reply_head = [0u8; 4];
    stream.read_exact(&mut reply_head).await?;
    if reply_head[1] != 0x00 {
        return Err(RelayError::Socks5Rejected("connect request rejected"));
    }
    let bound_len = match reply_head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len_buf = [0u8; 1];
            stream.read_exact(&mut len_buf).await?;
            len_buf[0] as usize
        }
        _ => return Err(RelayError::Socks5Rejected("unknown address type")),
    };
    let mut bound_addr = vec![0u8; bound_len + 2];
    stream.read_exact(&mut bound_addr).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wraith_crypto::x25519::PrivateKey;

    #[test]
    fn test_handshake_request_response_roundtrip() {
        let client = PrivateKey::generate(&mut rand_core::OsRng);
        let relay = PrivateKey::generate(&mut rand_core::OsRng);

        let client_session_pub = [7u8; 32];
        let client_session_nonce = [8u8; 24];

        let request = build_handshake_request(
            &client,
            &client.public_key(),
            &relay.public_key(),
            &client_session_pub,
            &client_session_nonce,
        )
        .unwrap();
        assert_eq!(request.len(), HANDSHAKE_REQUEST_LEN);

        let (opened_client_ltk, shared_on_server, opened_session_pub, opened_session_nonce) =
            open_handshake_request(&request, &relay).unwrap();
        assert_eq!(opened_client_ltk.to_bytes(), client.public_key().to_bytes());
        assert_eq!(opened_session_pub, client_session_pub);
        assert_eq!(opened_session_nonce, client_session_nonce);

        let relay_session_pub = [9u8; 32];
        let relay_session_nonce = [10u8; 24];
        let response =
            build_handshake_response(&shared_on_server, &relay_session_pub, &relay_session_nonce)
                .unwrap();
        assert_eq!(response.len(), HANDSHAKE_RESPONSE_LEN);

        let shared_on_client = client.exchange(&relay.public_key()).unwrap();
        let (opened_relay_session_pub, opened_relay_session_nonce) =
            open_handshake_response(&response, shared_on_client.as_bytes()).unwrap();
        assert_eq!(opened_relay_session_pub, relay_session_pub);
        assert_eq!(opened_relay_session_nonce, relay_session_nonce);
    }

    #[test]
    fn test_handshake_request_rejects_wrong_relay_key() {
        let client = PrivateKey::generate(&mut rand_core::OsRng);
        let relay = PrivateKey::generate(&mut rand_core::OsRng);
        let impostor = PrivateKey::generate(&mut rand_core::OsRng);

        let request = build_handshake_request(
            &client,
            &client.public_key(),
            &relay.public_key(),
            &[1u8; 32],
            &[2u8; 24],
        )
        .unwrap();

        assert!(open_handshake_request(&request, &impostor).is_err());
    }

    #[test]
    fn test_nonce_increment_carries() {
        let mut nonce = [0xffu8; 24];
        nonce[23] = 0xfe;
        increment_nonce(&mut nonce);
        assert_eq!(nonce[23], 0xff);
        assert_eq!(nonce[22], 0xff);

        increment_nonce(&mut nonce);
        assert_eq!(nonce[23], 0x00);
        assert_eq!(nonce[22], 0x00);
        assert_eq!(nonce[21], 0x00);
    }

    #[test]
    fn test_tunnel_seed_symmetric_regardless_of_order() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_eq!(blake3_tunnel_seed(&a, &b), blake3_tunnel_seed(&b, &a));
    }
}
