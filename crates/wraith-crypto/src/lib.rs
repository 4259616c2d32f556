//! # WRAITH Crypto
//!
//! Cryptographic primitives shared by the cookie/handshake exchange,
//! the per-session data channel, and the TCP relay protocol.
//!
//! This crate provides:
//! - X25519 Diffie-Hellman key exchange with low-order-point rejection
//! - `XChaCha20-Poly1305` AEAD encryption
//! - BLAKE3 hashing and HKDF-style key derivation
//! - SHA-512, used to bind a handshake payload to its cookie
//! - Constant-time comparison primitives for verifying cookies and MACs
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | Hash (KDF, connection IDs) | BLAKE3 | 128-bit collision |
//! | Hash (cookie binding) | SHA-512 | 256-bit collision |
//! | KDF | HKDF-BLAKE3 | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod constant_time;
pub mod error;
pub mod hash;
pub mod random;
pub mod x25519;

pub use error::CryptoError;

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const X25519_SECRET_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 key size
pub const XCHACHA_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// BLAKE3 output size
pub const BLAKE3_OUTPUT_SIZE: usize = 32;

/// SHA-512 output size
pub const SHA512_OUTPUT_SIZE: usize = 64;

/// Session keys derived from a completed handshake.
///
/// `send_key`/`recv_key` seed the per-direction AEAD ciphers; the data
/// channel does not ratchet them, it only advances the nonce.
#[derive(zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for sending data
    pub send_key: [u8; 32],
    /// Key for receiving data
    pub recv_key: [u8; 32],
}

impl SessionKeys {
    /// Derive directional session keys from a completed handshake's raw
    /// DH output. Both peers derive the same `(send_key, recv_key)` pair
    /// swapped relative to each other, keyed off the initiator/responder
    /// role so `a.send_key == b.recv_key`.
    #[must_use]
    pub fn derive(shared_secret: &[u8; 32], we_are_initiator: bool) -> Self {
        let prk = hash::hkdf_extract(b"wraith-session-keys", shared_secret);
        let mut initiator_to_responder = [0u8; 32];
        let mut responder_to_initiator = [0u8; 32];
        hash::hkdf_expand(&prk, b"wraith-i2r", &mut initiator_to_responder);
        hash::hkdf_expand(&prk, b"wraith-r2i", &mut responder_to_initiator);

        if we_are_initiator {
            Self {
                send_key: initiator_to_responder,
                recv_key: responder_to_initiator,
            }
        } else {
            Self {
                send_key: responder_to_initiator,
                recv_key: initiator_to_responder,
            }
        }
    }

    /// Derive a short connection identifier from the send key, stable
    /// for the lifetime of the session.
    #[must_use]
    pub fn derive_connection_id(&self) -> [u8; 8] {
        let hash = blake3::hash(&self.send_key);
        let mut cid = [0u8; 8];
        cid.copy_from_slice(&hash.as_bytes()[..8]);
        cid
    }
}
