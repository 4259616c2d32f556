//! 24-byte nonce arithmetic for the per-direction AEAD stream.
//!
//! Each direction of a session has a base nonce exchanged in the
//! handshake and an incrementing counter. Outgoing frames always
//! increment the counter by one after use; incoming frames carry only
//! the low 16 bits explicitly and the receiver reconstructs the full
//! nonce from the signed delta against its expected value.

/// Half of the 16-bit window; a reconstructed nonce whose delta exceeds
/// this magnitude is treated as out-of-window and the frame is dropped.
pub const DATA_NUM_THRESHOLD: i32 = 21_845;

/// A 24-byte nonce, mutated only through `increment_by` so that "exactly
/// one increment per emitted frame" cannot be accidentally skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; 24]);

impl Nonce {
    /// Wrap a raw 24-byte nonce (e.g. one exchanged as a handshake base
    /// nonce).
    #[must_use]
    pub fn from_bytes(bytes: [u8; 24]) -> Self {
        Self(bytes)
    }

    /// The raw bytes, for use as an AEAD nonce.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 24] {
        &self.0
    }

    /// The low 16 bits, carried explicitly in outgoing frames so the
    /// peer can reconstruct the full nonce.
    #[must_use]
    pub fn low_u16(&self) -> u16 {
        u16::from_be_bytes([self.0[22], self.0[23]])
    }

    /// Advance the nonce by `delta`, treating the full 24 bytes as one
    /// big-endian counter. Takes `&mut self` so a caller cannot forget
    /// to apply the post-send increment.
    pub fn increment_by(&mut self, delta: u16) {
        let mut carry = u32::from(delta);
        for byte in self.0.iter_mut().rev() {
            if carry == 0 {
                break;
            }
            let sum = u32::from(*byte) + (carry & 0xFF);
            *byte = (sum & 0xFF) as u8;
            carry = (sum >> 8) + (carry >> 8);
        }
    }

    /// Overwrite only the low 16 bits, leaving the high-order counter
    /// bytes untouched. Used to splice a peer-carried low-16-bits value
    /// onto our locally reconstructed high bits.
    pub fn set_low_u16(&mut self, low: u16) {
        let bytes = low.to_be_bytes();
        self.0[22] = bytes[0];
        self.0[23] = bytes[1];
    }

    /// Reconstruct the nonce an incoming frame actually used, given only
    /// the low 16 bits it carried and our current expectation for this
    /// direction. Returns `None` if the signed delta falls outside the
    /// acceptable window (`±DATA_NUM_THRESHOLD`), in which case the
    /// frame must be dropped without attempting AEAD.
    ///
    /// When the delta exceeds half the window (i.e. the peer has moved
    /// meaningfully ahead), the caller should advance its own `expected`
    /// nonce past the reconstructed value so the window keeps tracking
    /// the peer's actual position.
    #[must_use]
    pub fn reconstruct(expected: &Nonce, received_low: u16) -> Option<Nonce> {
        let expected_low = expected.low_u16();
        let delta = i32::from(received_low) - i32::from(expected_low);
        // Fold the delta into the shortest signed representation on the
        // 16-bit ring (e.g. received=1, expected=65535 should read as +2,
        // not -65534).
        let wrapped = if delta > i32::from(u16::MAX) / 2 {
            delta - (i32::from(u16::MAX) + 1)
        } else if delta < -(i32::from(u16::MAX) / 2) {
            delta + (i32::from(u16::MAX) + 1)
        } else {
            delta
        };

        if wrapped.unsigned_abs() > DATA_NUM_THRESHOLD as u32 {
            return None;
        }

        let mut candidate = *expected;
        if wrapped >= 0 {
            candidate.increment_by(wrapped as u16);
        } else {
            // Rebuild from the low bits directly; decrementing the full
            // 24-byte counter isn't needed since out-of-order frames
            // within the window only ever address recently-issued
            // nonces whose high-order bytes match `expected`'s.
            candidate.set_low_u16(received_low);
        }
        Some(candidate)
    }
}
