//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid nonce length
    #[error("invalid nonce length")]
    InvalidNonceLength,

    /// Diffie-Hellman exchange produced the all-zero shared secret
    /// (peer public key is a low-order point).
    #[error("key exchange rejected: low-order point")]
    LowOrderPoint,

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Nonce counter would wrap or has exceeded its window; the session
    /// must be torn down and re-established rather than continue.
    #[error("nonce counter exhausted, rekey required")]
    NonceOverflow,

    /// A received nonce fell outside the acceptable reconstruction
    /// window for the current direction of a session.
    #[error("nonce {received} outside acceptable window around {expected}")]
    NonceOutOfWindow {
        /// Low 16 bits carried in the frame.
        received: u16,
        /// Low 16 bits of the expected next nonce.
        expected: u16,
    },
}

impl CryptoError {
    /// Whether retrying the same operation with fresh inputs could
    /// plausibly succeed (e.g. a replay-window rejection that will
    /// clear itself once in-order packets resume).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, CryptoError::NonceOutOfWindow { .. })
    }

    /// Whether the error reflects a fatal condition for the keys or
    /// session involved; the caller must not simply retry.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CryptoError::DecryptionFailed
                | CryptoError::LowOrderPoint
                | CryptoError::NonceOverflow
        )
    }
}
