//! Identity keys: the long-term identity key (LTK), the DHT key, and the
//! per-connection ephemeral session keypair.
//!
//! The session treats the LTK and DHT key as distinct abstract
//! identifiers; the two are never assumed equal even when an embedder
//! happens to reuse one key for both roles.

use wraith_crypto::x25519::{PrivateKey, PublicKey};

/// A peer's long-term identity public key, 32 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ltk(pub [u8; 32]);

impl Ltk {
    /// View as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<PublicKey> for Ltk {
    fn from(pk: PublicKey) -> Self {
        Self(pk.to_bytes())
    }
}

/// A peer's DHT (peer-locator) public key, 32 bytes. Long-term for the
/// process, but never assumed equal to the LTK.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DhtPublicKey(pub [u8; 32]);

impl DhtPublicKey {
    /// View as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<PublicKey> for DhtPublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(pk.to_bytes())
    }
}

/// This process's long-term identity keypair. Loaded by the embedder at
/// startup (`load_secret_key`), generated fresh (`new_keys`), or
/// persisted (`save_keys`); the core never reads it from disk itself.
pub struct LongTermKeypair {
    secret: PrivateKey,
    public: Ltk,
}

impl LongTermKeypair {
    /// Generate a fresh long-term keypair from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let secret = PrivateKey::generate(&mut rand_core::OsRng);
        let public = Ltk::from(secret.public_key());
        Self { secret, public }
    }

    /// Load a keypair from a previously saved 32-byte secret.
    #[must_use]
    pub fn load_secret_key(secret_bytes: [u8; 32]) -> Self {
        let secret = PrivateKey::from_bytes(secret_bytes);
        let public = Ltk::from(secret.public_key());
        Self { secret, public }
    }

    /// Export the raw secret key bytes for persistence by the embedder.
    #[must_use]
    pub fn save_keys(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// This keypair's public half.
    #[must_use]
    pub fn public(&self) -> Ltk {
        self.public
    }

    /// Access the secret half for a DH exchange.
    pub(crate) fn secret(&self) -> &PrivateKey {
        &self.secret
    }
}

/// A fresh ephemeral keypair generated per connection attempt. The
/// private half is zeroed as soon as the shared secret is derived
/// (`PrivateKey` is `ZeroizeOnDrop`; dropping `into_shared_secret`'s
/// argument accomplishes this).
pub struct SessionKeypair {
    secret: PrivateKey,
    public: [u8; 32],
}

impl SessionKeypair {
    /// Generate a fresh session keypair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = PrivateKey::generate(&mut rand_core::OsRng);
        let public = secret.public_key().to_bytes();
        Self { secret, public }
    }

    /// This keypair's public half, sent to the peer in the handshake.
    #[must_use]
    pub fn public(&self) -> [u8; 32] {
        self.public
    }

    /// Perform the DH exchange against the peer's session public key,
    /// consuming `self` so the ephemeral secret cannot be reused.
    ///
    /// Returns `None` if the peer's key is a low-order point.
    #[must_use]
    pub fn into_shared_secret(self, peer_public: &[u8; 32]) -> Option<[u8; 32]> {
        let peer = PublicKey::from_bytes(*peer_public);
        self.secret
            .exchange(&peer)
            .map(|shared| *shared.as_bytes())
    }
}

/// Precompute the shared secret for a long-term-key-scoped exchange
/// (used by the cookie-request, handshake outer AEAD, and relay
/// handshake — all of which key off LTK/DHT pairs rather than ephemeral
/// session keys).
#[must_use]
pub fn precompute(our_secret: &PrivateKey, peer_public: &[u8; 32]) -> Option<[u8; 32]> {
    let peer = PublicKey::from_bytes(*peer_public);
    our_secret.exchange(&peer).map(|shared| *shared.as_bytes())
}

pub use LongTermKeypair as DhtKeypair;

impl LongTermKeypair {
    /// Precompute a shared secret with a peer's public key using this
    /// keypair's secret half.
    #[must_use]
    pub fn precompute_with(&self, peer_public: &[u8; 32]) -> Option<[u8; 32]> {
        precompute(self.secret(), peer_public)
    }
}
