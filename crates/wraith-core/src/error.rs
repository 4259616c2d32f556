//! Error types for the WRAITH session protocol.
//!
//! Each per-subsystem enum is tagged, in its variant docs, with which of
//! the four taxonomy buckets it belongs to: **input-invalid** (drop
//! silently, never log above `debug!`), **capacity** (reject the write,
//! caller retries), **timeout** (transition to terminal, notify via the
//! status callback), **logic** (programmer error, surfaced as `Err`,
//! logged at `error!`, never a panic).

use thiserror::Error;

/// Umbrella error for the session protocol's public API.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame parsing/encoding error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Cookie engine error
    #[error("cookie error: {0}")]
    Cookie(#[from] CookieError),

    /// Handshake engine error
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Session-lifecycle error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Cryptographic primitive error
    #[error("crypto error: {0}")]
    Crypto(#[from] wraith_crypto::CryptoError),

    /// Relay/transport error
    #[error("transport error: {0}")]
    Transport(#[from] wraith_transport::RelayError),
}

/// Frame-level errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// input-invalid: too few bytes to contain a header.
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// input-invalid: declared padding does not fit the remaining bytes.
    #[error("invalid padding")]
    InvalidPadding,

    /// input-invalid: payload is empty (no packet-id byte present).
    #[error("empty payload")]
    EmptyPayload,

    /// capacity: frame would exceed MAX_CRYPTO_PACKET_SIZE.
    #[error("payload length exceeds packet size")]
    PayloadOverflow,
}

/// Cookie-engine errors. `open_cookie` is the only fallible operation;
/// `issue_cookie` always succeeds.
#[derive(Debug, Error)]
pub enum CookieError {
    /// input-invalid: AEAD authentication failed.
    #[error("cookie authentication failed")]
    InvalidMac,

    /// input-invalid: cookie is older than the 15 s validity window.
    #[error("cookie expired")]
    Expired,

    /// input-invalid: cookie's issue time is in the future.
    #[error("cookie issued in the future")]
    NotYetValid,

    /// input-invalid: cookie is the wrong length to even attempt opening.
    #[error("malformed cookie: expected {expected} bytes, got {actual}")]
    Malformed {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

/// Handshake-engine errors.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// input-invalid: wrapped cookie error.
    #[error("handshake cookie invalid: {0}")]
    Cookie(#[from] CookieError),

    /// input-invalid: outer AEAD (LTK-scoped) failed to authenticate.
    #[error("handshake authentication failed")]
    InvalidMac,

    /// input-invalid: sha512(cookie) does not match the included hash —
    /// the handshake was not produced for this cookie.
    #[error("cookie hash binding mismatch")]
    CookieHashMismatch,

    /// input-invalid: the handshake claims an LTK different from the one
    /// the caller expected.
    #[error("peer long-term key mismatch")]
    PeerKeyMismatch,

    /// input-invalid: packet is the wrong length for a handshake.
    #[error("malformed handshake: expected {expected} bytes, got {actual}")]
    Malformed {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// timeout: no peer handshake arrived before MAX_NUM_SENDPACKET_TRIES
    /// retries elapsed.
    #[error("handshake retries exhausted")]
    RetriesExhausted,
}

/// Session-lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// logic: operation not valid in the session's current state.
    #[error("invalid state for operation: currently {0:?}")]
    InvalidState(crate::session::SessionState),

    /// capacity: send buffer has no free slot (ring is full).
    #[error("send buffer full")]
    SendBufferFull,

    /// capacity: congestion controller has no send token left this
    /// period; max speed reached for this session.
    #[error("congestion limited, no send token available")]
    CongestionLimited,

    /// logic: caller referenced a session that no longer exists.
    #[error("unknown session")]
    UnknownSession,

    /// timeout: handshake/keepalive retries exhausted; session killed.
    #[error("session timed out")]
    Timeout,

    /// input-invalid: received nonce fell outside the acceptable window.
    #[error("nonce outside window")]
    NonceOutOfWindow,

    /// logic: peer's DHT key changed; per policy the session is killed
    /// rather than mutated in place.
    #[error("peer DHT key changed, session killed")]
    DhtKeyChanged,

    /// input-invalid: wrapped frame error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl SessionError {
    /// Whether this error represents a condition the caller should
    /// simply retry (capacity pressure that self-resolves).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::SendBufferFull | SessionError::CongestionLimited
        )
    }

    /// Whether this error means the session is no longer usable and
    /// must be re-established by the caller.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout | SessionError::DhtKeyChanged | SessionError::UnknownSession
        )
    }
}
