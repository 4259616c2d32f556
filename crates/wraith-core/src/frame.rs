//! Data-frame wire format for the sliding-window reliable layer.
//!
//! Plaintext layout (this is what sits inside the per-direction AEAD,
//! not the wire bytes of the outer packet):
//!
//! ```text
//! buffer_start  : u32 (big-endian)  — sender's recv_buffer.start
//! packet_number : u32 (big-endian)  — this frame's slot
//! padding       : 0..CRYPTO_MAX_PADDING bytes of 0x00
//! payload       : >= 1 byte, first byte is a packet-id
//! ```

use crate::error::FrameError;

/// Padding / no-op packet-id.
pub const PACKET_ID_PADDING: u8 = 0;
/// Request-packet packet-id (gap encoding for retransmission).
pub const PACKET_ID_REQUEST: u8 = 1;
/// Session-termination packet-id.
pub const PACKET_ID_KILL: u8 = 2;
/// First packet-id reserved for lossless application data.
pub const CRYPTO_RESERVED_PACKETS: u8 = 16;
/// First packet-id in the lossy application range.
pub const PACKET_ID_LOSSY_RANGE_START: u8 = 192;

/// `NET_PACKET_CRYPTO_DATA`
pub const PACKET_CRYPTO_DATA: u8 = 0x1B;

const FRAME_META_LEN: usize = 4 + 4; // buffer_start, packet_number

/// Whether a packet-id belongs to the lossy application range.
#[must_use]
pub fn is_lossy(packet_id: u8) -> bool {
    packet_id >= PACKET_ID_LOSSY_RANGE_START
}

/// Whether a packet-id belongs to the lossless application range.
#[must_use]
pub fn is_lossless_application(packet_id: u8) -> bool {
    (CRYPTO_RESERVED_PACKETS..PACKET_ID_LOSSY_RANGE_START).contains(&packet_id)
}

/// A parsed data-frame plaintext (zero-copy view into a decrypted
/// buffer).
#[derive(Debug)]
pub struct Frame<'a> {
    buffer_start: u32,
    packet_number: u32,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse frame plaintext, stripping padding.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::TooShort` if `data` cannot hold the fixed
    /// header plus at least one payload byte, and
    /// `FrameError::EmptyPayload` if every remaining byte decodes as
    /// padding.
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_META_LEN + 1 {
            return Err(FrameError::TooShort {
                expected: FRAME_META_LEN + 1,
                actual: data.len(),
            });
        }

        let buffer_start = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let packet_number = u32::from_be_bytes(data[4..8].try_into().unwrap());

        let rest = &data[FRAME_META_LEN..];
        let first_nonzero = rest.iter().position(|&b| b != PACKET_ID_PADDING);
        let payload = match first_nonzero {
            Some(offset) => &rest[offset..],
            None => return Err(FrameError::EmptyPayload),
        };

        Ok(Self {
            buffer_start,
            packet_number,
            payload,
        })
    }

    /// The sender's `recv_buffer.start` at the time this frame was sent;
    /// acknowledges every slot below it in our send buffer.
    #[must_use]
    pub fn buffer_start(&self) -> u32 {
        self.buffer_start
    }

    /// This frame's slot in the sender's send buffer.
    #[must_use]
    pub fn packet_number(&self) -> u32 {
        self.packet_number
    }

    /// The payload, including its leading packet-id byte.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    /// The leading packet-id byte.
    #[must_use]
    pub fn packet_id(&self) -> u8 {
        self.payload[0]
    }
}

/// Encode frame plaintext: header, payload, then padding to align the
/// total length to an 8-byte boundary relative to
/// `max_crypto_data_size`.
///
/// Padding length is `(max_crypto_data_size - payload_len) mod 8`,
/// which mildly obscures payload sizes rather than padding to a fixed
/// size.
#[must_use]
pub fn encode(
    buffer_start: u32,
    packet_number: u32,
    payload: &[u8],
    max_crypto_data_size: usize,
) -> Vec<u8> {
    let padding_len = max_crypto_data_size.saturating_sub(payload.len()) % 8;

    let mut out = Vec::with_capacity(FRAME_META_LEN + padding_len + payload.len());
    out.extend_from_slice(&buffer_start.to_be_bytes());
    out.extend_from_slice(&packet_number.to_be_bytes());
    out.extend(std::iter::repeat(PACKET_ID_PADDING).take(padding_len));
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_parse_roundtrip() {
        let payload = [20u8, b'h', b'i'];
        let encoded = encode(5, 10, &payload, 64);
        let parsed = Frame::parse(&encoded).unwrap();

        assert_eq!(parsed.buffer_start(), 5);
        assert_eq!(parsed.packet_number(), 10);
        assert_eq!(parsed.payload(), &payload);
        assert_eq!(parsed.packet_id(), 20);
    }

    #[test]
    fn test_padding_is_stripped() {
        let payload = [PACKET_ID_KILL];
        let encoded = encode(0, 0, &payload, 64);
        assert!(encoded.len() > FRAME_META_LEN + 1);

        let parsed = Frame::parse(&encoded).unwrap();
        assert_eq!(parsed.payload(), &payload);
    }

    #[test]
    fn test_too_short_rejected() {
        assert!(matches!(
            Frame::parse(&[0u8; 4]),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn test_all_padding_rejected() {
        let data = [0u8; 16];
        assert!(matches!(
            Frame::parse(&data),
            Err(FrameError::EmptyPayload)
        ));
    }

    #[test]
    fn test_lossy_range() {
        assert!(!is_lossy(191));
        assert!(is_lossy(192));
        assert!(is_lossy(254));
    }

    #[test]
    fn test_lossless_application_range() {
        assert!(!is_lossless_application(15));
        assert!(is_lossless_application(16));
        assert!(is_lossless_application(191));
        assert!(!is_lossless_application(192));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_parse_doesnt_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
                let _ = Frame::parse(&data);
            }

            #[test]
            fn prop_roundtrip_preserves_fields(
                buffer_start in any::<u32>(),
                packet_number in any::<u32>(),
                payload_id in 1u8..=255,
                payload_rest in prop::collection::vec(any::<u8>(), 0..64),
            ) {
                let mut payload = vec![payload_id];
                payload.extend(payload_rest);

                let encoded = encode(buffer_start, packet_number, &payload, 1400);
                let parsed = Frame::parse(&encoded).unwrap();

                prop_assert_eq!(parsed.buffer_start(), buffer_start);
                prop_assert_eq!(parsed.packet_number(), packet_number);
                prop_assert_eq!(parsed.payload(), payload.as_slice());
            }
        }
    }
}
