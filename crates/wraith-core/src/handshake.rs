//! Two-message mutual authentication: cookie request/response, and the
//! crypto handshake packet that ties a fresh ephemeral key exchange to a
//! specific cookie via a SHA-512 binding hash.

use crate::cookie::{CookieEngine, COOKIE_LEN};
use crate::error::HandshakeError;
use wraith_crypto::aead::AeadCipher;
use wraith_crypto::hash::sha512_concat;
use wraith_crypto::random::fill_random;

/// `NET_PACKET_COOKIE_REQUEST`
pub const PACKET_COOKIE_REQUEST: u8 = 0x18;
/// `NET_PACKET_COOKIE_RESPONSE`
pub const PACKET_COOKIE_RESPONSE: u8 = 0x19;
/// `NET_PACKET_CRYPTO_HS`
pub const PACKET_CRYPTO_HANDSHAKE: u8 = 0x1A;

const COOKIE_REQUEST_PLAINTEXT_LEN: usize = 32 + 32 + 8; // LTK, zero-padding, request nonce
/// Wire size of a cookie request packet.
pub const COOKIE_REQUEST_LEN: usize = 1 + 32 + 24 + COOKIE_REQUEST_PLAINTEXT_LEN + 16;

const COOKIE_RESPONSE_PLAINTEXT_LEN: usize = COOKIE_LEN + 8; // cookie, echoed request nonce
/// Wire size of a cookie response packet.
pub const COOKIE_RESPONSE_LEN: usize = 1 + 24 + COOKIE_RESPONSE_PLAINTEXT_LEN + 16;

const HANDSHAKE_PLAINTEXT_LEN: usize = 24 + 32 + 64 + COOKIE_LEN; // nonce2, session_pub, sha512(cookie), fresh cookie
/// Wire size of a crypto handshake packet.
pub const HANDSHAKE_LEN: usize = 1 + COOKIE_LEN + 24 + HANDSHAKE_PLAINTEXT_LEN + 16;

/// A parsed, not-yet-verified cookie request.
pub struct CookieRequest {
    /// The requester's DHT public key.
    pub requester_dht_key: [u8; 32],
    nonce: [u8; 24],
    ciphertext: Vec<u8>,
}

impl CookieRequest {
    /// Build a cookie request from our DHT key, addressed to
    /// `peer_dht_key`, over the precomputed shared key for that pair.
    ///
    /// # Panics
    ///
    /// Panics if the OS CSPRNG fails.
    #[must_use]
    pub fn build(
        our_dht_key: &[u8; 32],
        shared_key: &[u8; 32],
        our_ltk: &[u8; 32],
        request_nonce: u64,
    ) -> [u8; COOKIE_REQUEST_LEN] {
        let mut nonce = [0u8; 24];
        fill_random(&mut nonce).expect("CSPRNG failure");

        let mut plaintext = [0u8; COOKIE_REQUEST_PLAINTEXT_LEN];
        plaintext[0..32].copy_from_slice(our_ltk);
        // [32..64] left zero (padding)
        plaintext[64..72].copy_from_slice(&request_nonce.to_be_bytes());

        let cipher = AeadCipher::new(shared_key);
        let ciphertext = cipher
            .encrypt(&nonce, &plaintext, &[])
            .expect("cookie request sealing cannot fail");

        let mut out = [0u8; COOKIE_REQUEST_LEN];
        out[0] = PACKET_COOKIE_REQUEST;
        out[1..33].copy_from_slice(our_dht_key);
        out[33..57].copy_from_slice(&nonce);
        out[57..].copy_from_slice(&ciphertext);
        out
    }

    /// Parse (but do not verify) a received cookie request.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        if data.len() != COOKIE_REQUEST_LEN || data[0] != PACKET_COOKIE_REQUEST {
            return Err(HandshakeError::Malformed {
                expected: COOKIE_REQUEST_LEN,
                actual: data.len(),
            });
        }
        let mut requester_dht_key = [0u8; 32];
        requester_dht_key.copy_from_slice(&data[1..33]);
        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(&data[33..57]);
        Ok(Self {
            requester_dht_key,
            nonce,
            ciphertext: data[57..].to_vec(),
        })
    }

    /// Verify and open, returning the requester's LTK and the echoed
    /// request nonce the responder must include in its reply.
    pub fn open(&self, shared_key: &[u8; 32]) -> Result<([u8; 32], u64), HandshakeError> {
        let cipher = AeadCipher::new(shared_key);
        let plaintext = cipher
            .decrypt(&self.nonce, &self.ciphertext, &[])
            .map_err(|_| HandshakeError::InvalidMac)?;

        let mut requester_ltk = [0u8; 32];
        requester_ltk.copy_from_slice(&plaintext[0..32]);
        let request_nonce = u64::from_be_bytes(plaintext[64..72].try_into().unwrap());
        Ok((requester_ltk, request_nonce))
    }
}

/// Build a cookie response carrying `cookie` and the echoed request
/// nonce, sealed under `shared_key`.
///
/// # Panics
///
/// Panics if the OS CSPRNG fails.
#[must_use]
pub fn build_cookie_response(
    shared_key: &[u8; 32],
    cookie: &[u8; COOKIE_LEN],
    echoed_request_nonce: u64,
) -> [u8; COOKIE_RESPONSE_LEN] {
    let mut nonce = [0u8; 24];
    fill_random(&mut nonce).expect("CSPRNG failure");

    let mut plaintext = [0u8; COOKIE_RESPONSE_PLAINTEXT_LEN];
    plaintext[0..COOKIE_LEN].copy_from_slice(cookie);
    plaintext[COOKIE_LEN..].copy_from_slice(&echoed_request_nonce.to_be_bytes());

    let cipher = AeadCipher::new(shared_key);
    let ciphertext = cipher
        .encrypt(&nonce, &plaintext, &[])
        .expect("cookie response sealing cannot fail");

    let mut out = [0u8; COOKIE_RESPONSE_LEN];
    out[0] = PACKET_COOKIE_RESPONSE;
    out[1..25].copy_from_slice(&nonce);
    out[25..].copy_from_slice(&ciphertext);
    out
}

/// Open a cookie response, returning the cookie it carries and the
/// request nonce it echoes (the caller matches this against its
/// outstanding requests and discards stale ones).
pub fn open_cookie_response(
    shared_key: &[u8; 32],
    data: &[u8],
) -> Result<([u8; COOKIE_LEN], u64), HandshakeError> {
    if data.len() != COOKIE_RESPONSE_LEN || data[0] != PACKET_COOKIE_RESPONSE {
        return Err(HandshakeError::Malformed {
            expected: COOKIE_RESPONSE_LEN,
            actual: data.len(),
        });
    }
    let nonce: [u8; 24] = data[1..25].try_into().unwrap();
    let ciphertext = &data[25..];

    let cipher = AeadCipher::new(shared_key);
    let plaintext = cipher
        .decrypt(&nonce, ciphertext, &[])
        .map_err(|_| HandshakeError::InvalidMac)?;

    let mut cookie = [0u8; COOKIE_LEN];
    cookie.copy_from_slice(&plaintext[0..COOKIE_LEN]);
    let echoed = u64::from_be_bytes(plaintext[COOKIE_LEN..].try_into().unwrap());
    Ok((cookie, echoed))
}

/// A parsed, not-yet-verified crypto handshake packet.
pub struct HandshakePacket {
    cookie: [u8; COOKIE_LEN],
    outer_nonce: [u8; 24],
    ciphertext: Vec<u8>,
}

/// The contents of a successfully verified handshake.
pub struct VerifiedHandshake {
    /// The peer's ephemeral session public key.
    pub session_pub: [u8; 32],
    /// A fresh cookie the peer issued for us, letting us reply without a
    /// round trip.
    pub fresh_cookie_for_us: [u8; COOKIE_LEN],
    /// The base nonce the peer will use for its outbound data frames.
    pub base_nonce: [u8; 24],
    /// The peer's claimed long-term key, as attested by the cookie this
    /// handshake rode in on.
    pub peer_ltk: [u8; 32],
    /// The peer's claimed DHT key, as attested by the same cookie.
    pub peer_dht_key: [u8; 32],
}

impl HandshakePacket {
    /// Build a crypto handshake packet, sealing it under the shared key
    /// precomputed from our LTK secret and the peer's claimed LTK.
    ///
    /// # Panics
    ///
    /// Panics if the OS CSPRNG fails.
    #[must_use]
    pub fn build(
        our_peer_ltk_shared_key: &[u8; 32],
        cookie_we_were_given: &[u8; COOKIE_LEN],
        our_session_pub: &[u8; 32],
        our_base_nonce: &[u8; 24],
        fresh_cookie_for_peer: &[u8; COOKIE_LEN],
    ) -> [u8; HANDSHAKE_LEN] {
        let mut outer_nonce = [0u8; 24];
        fill_random(&mut outer_nonce).expect("CSPRNG failure");

        let cookie_hash = sha512_concat(&[cookie_we_were_given]);

        let mut plaintext = [0u8; HANDSHAKE_PLAINTEXT_LEN];
        plaintext[0..24].copy_from_slice(our_base_nonce);
        plaintext[24..56].copy_from_slice(our_session_pub);
        plaintext[56..120].copy_from_slice(&cookie_hash);
        plaintext[120..].copy_from_slice(fresh_cookie_for_peer);

        let cipher = AeadCipher::new(our_peer_ltk_shared_key);
        let ciphertext = cipher
            .encrypt(&outer_nonce, &plaintext, &[])
            .expect("handshake sealing cannot fail");

        let mut out = [0u8; HANDSHAKE_LEN];
        out[0] = PACKET_CRYPTO_HANDSHAKE;
        out[1..1 + COOKIE_LEN].copy_from_slice(cookie_we_were_given);
        out[1 + COOKIE_LEN..1 + COOKIE_LEN + 24].copy_from_slice(&outer_nonce);
        out[1 + COOKIE_LEN + 24..].copy_from_slice(&ciphertext);
        out
    }

    /// Parse (but do not verify) a received handshake packet.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        if data.len() != HANDSHAKE_LEN || data[0] != PACKET_CRYPTO_HANDSHAKE {
            return Err(HandshakeError::Malformed {
                expected: HANDSHAKE_LEN,
                actual: data.len(),
            });
        }
        let mut cookie = [0u8; COOKIE_LEN];
        cookie.copy_from_slice(&data[1..1 + COOKIE_LEN]);
        let mut outer_nonce = [0u8; 24];
        outer_nonce.copy_from_slice(&data[1 + COOKIE_LEN..1 + COOKIE_LEN + 24]);
        Ok(Self {
            cookie,
            outer_nonce,
            ciphertext: data[1 + COOKIE_LEN + 24..].to_vec(),
        })
    }

    /// Verify a received handshake packet: open the outer cookie to
    /// learn the claimed peer identities, decrypt the outer AEAD with
    /// the LTK-scoped shared key, then check the inner cookie-hash
    /// binding. If `expected_ltk` is supplied, it must match the
    /// cookie's claimed LTK.
    pub fn verify(
        &self,
        cookies: &CookieEngine,
        our_ltk_secret: &wraith_crypto::x25519::PrivateKey,
        expected_ltk: Option<&[u8; 32]>,
    ) -> Result<VerifiedHandshake, HandshakeError> {
        let (peer_ltk, peer_dht_key) = cookies.open_cookie(&self.cookie)?;

        if let Some(expected) = expected_ltk {
            if expected != &peer_ltk {
                return Err(HandshakeError::PeerKeyMismatch);
            }
        }

        let shared_key = crate::keys::precompute(our_ltk_secret, &peer_ltk)
            .ok_or(HandshakeError::InvalidMac)?;

        let cipher = AeadCipher::new(&shared_key);
        let plaintext = cipher
            .decrypt(&self.outer_nonce, &self.ciphertext, &[])
            .map_err(|_| HandshakeError::InvalidMac)?;

        let expected_hash = sha512_concat(&[&self.cookie[..]]);
        let included_hash = &plaintext[56..120];
        if !wraith_crypto::constant_time::ct_eq(&expected_hash, included_hash) {
            return Err(HandshakeError::CookieHashMismatch);
        }

        let mut base_nonce = [0u8; 24];
        base_nonce.copy_from_slice(&plaintext[0..24]);
        let mut session_pub = [0u8; 32];
        session_pub.copy_from_slice(&plaintext[24..56]);
        let mut fresh_cookie_for_us = [0u8; COOKIE_LEN];
        fresh_cookie_for_us.copy_from_slice(&plaintext[120..]);

        Ok(VerifiedHandshake {
            session_pub,
            fresh_cookie_for_us,
            base_nonce,
            peer_ltk,
            peer_dht_key,
        })
    }
}
