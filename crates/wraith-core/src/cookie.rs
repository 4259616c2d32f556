//! Cookie engine: short-lived, symmetrically-encrypted authorization
//! tokens binding a peer's long-term key and DHT key to a narrow time
//! window.
//!
//! A cookie is opaque to the peer it is issued to; it exists so the
//! handshake can prove "I am replying to a request I actually received
//! recently" without the responder keeping per-requester state.

use crate::error::CookieError;
use std::time::{SystemTime, UNIX_EPOCH};
use wraith_crypto::aead::AeadCipher;
use wraith_crypto::random::fill_random;

/// Plaintext cookie contents before sealing: issue time, peer LTK, peer
/// DHT key.
const COOKIE_PLAINTEXT_LEN: usize = 8 + 32 + 32;

/// Sealed cookie wire size: 24 B nonce + 72 B plaintext + 16 B MAC.
pub const COOKIE_LEN: usize = 24 + COOKIE_PLAINTEXT_LEN + 16;

/// Issues and opens cookies under a single process-local symmetric
/// secret. One instance per process; the secret never leaves it.
pub struct CookieEngine {
    cipher: AeadCipher,
    validity_window: std::time::Duration,
}

impl CookieEngine {
    /// Create a cookie engine with a freshly generated secret.
    ///
    /// # Panics
    ///
    /// Panics if the OS CSPRNG fails to provide the secret; a broken
    /// system RNG is not a recoverable condition.
    #[must_use]
    pub fn new(validity_window: std::time::Duration) -> Self {
        let mut secret = [0u8; 32];
        fill_random(&mut secret).expect("CSPRNG failure");
        Self {
            cipher: AeadCipher::new(&secret),
            validity_window,
        }
    }

    /// Seal a cookie binding `peer_ltk`/`peer_dht_key` to the current
    /// time. Always succeeds.
    ///
    /// # Panics
    ///
    /// Panics if the OS CSPRNG fails to provide the nonce.
    #[must_use]
    pub fn issue_cookie(&self, peer_ltk: &[u8; 32], peer_dht_key: &[u8; 32]) -> [u8; COOKIE_LEN] {
        self.issue_cookie_at(peer_ltk, peer_dht_key, now_unix())
    }

    fn issue_cookie_at(
        &self,
        peer_ltk: &[u8; 32],
        peer_dht_key: &[u8; 32],
        issue_time: u64,
    ) -> [u8; COOKIE_LEN] {
        let mut nonce = [0u8; 24];
        fill_random(&mut nonce).expect("CSPRNG failure");

        let issue_time = issue_time.to_be_bytes();
        let mut plaintext = [0u8; COOKIE_PLAINTEXT_LEN];
        plaintext[0..8].copy_from_slice(&issue_time);
        plaintext[8..40].copy_from_slice(peer_ltk);
        plaintext[40..72].copy_from_slice(peer_dht_key);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, &plaintext, &[])
            .expect("cookie sealing cannot fail");

        let mut out = [0u8; COOKIE_LEN];
        out[0..24].copy_from_slice(&nonce);
        out[24..].copy_from_slice(&ciphertext);
        out
    }

    /// Open a cookie, returning the peer LTK and DHT key it binds.
    ///
    /// Fails if the MAC is invalid, the embedded timestamp is older than
    /// the validity window, or lies in the future.
    pub fn open_cookie(&self, cookie: &[u8]) -> Result<([u8; 32], [u8; 32]), CookieError> {
        self.open_cookie_at(cookie, now_unix())
    }

    fn open_cookie_at(&self, cookie: &[u8], now: u64) -> Result<([u8; 32], [u8; 32]), CookieError> {
        if cookie.len() != COOKIE_LEN {
            return Err(CookieError::Malformed {
                expected: COOKIE_LEN,
                actual: cookie.len(),
            });
        }

        let nonce: [u8; 24] = cookie[0..24].try_into().expect("slice is 24 bytes");
        let ciphertext = &cookie[24..];

        let plaintext = self
            .cipher
            .decrypt(&nonce, ciphertext, &[])
            .map_err(|_| CookieError::InvalidMac)?;

        let issue_time = u64::from_be_bytes(plaintext[0..8].try_into().unwrap());

        if issue_time > now {
            return Err(CookieError::NotYetValid);
        }
        if now - issue_time > self.validity_window.as_secs() {
            return Err(CookieError::Expired);
        }

        let mut peer_ltk = [0u8; 32];
        let mut peer_dht_key = [0u8; 32];
        peer_ltk.copy_from_slice(&plaintext[8..40]);
        peer_dht_key.copy_from_slice(&plaintext[40..72]);

        Ok((peer_ltk, peer_dht_key))
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}
