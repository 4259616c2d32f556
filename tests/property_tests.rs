//! Property-based tests exercising cross-module invariants across a
//! large input space — the individual modules' own unit-level proptest
//! coverage lives beside them in `crates/wraith-core/src`.

use proptest::prelude::*;
use wraith_core::cookie::CookieEngine;
use wraith_core::frame::{self, Frame};
use wraith_core::nonce::Nonce;
use wraith_core::sliding_window::{RecvBuffer, SendBuffer};
use std::time::Duration;

proptest! {
    /// A frame encoded then parsed always reports the same
    /// `buffer_start`/`packet_number`/payload, regardless of payload
    /// length or padding target.
    #[test]
    fn frame_encode_parse_roundtrip(
        buffer_start in any::<u32>(),
        packet_number in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 1..200),
        max_size in 200usize..1500,
    ) {
        let mut payload = payload;
        payload[0] = payload[0].max(1); // avoid an all-padding payload
        let encoded = frame::encode(buffer_start, packet_number, &payload, max_size);
        let parsed = Frame::parse(&encoded).unwrap();

        prop_assert_eq!(parsed.buffer_start(), buffer_start);
        prop_assert_eq!(parsed.packet_number(), packet_number);
        prop_assert_eq!(parsed.payload(), &payload[..]);
    }

    /// A cookie issued by one engine instance always opens back to the
    /// same peer identity, for any 32-byte key pair.
    #[test]
    fn cookie_roundtrip_any_keys(ltk in prop::array::uniform32(any::<u8>()), dht in prop::array::uniform32(any::<u8>())) {
        let engine = CookieEngine::new(Duration::from_secs(15));
        let cookie = engine.issue_cookie(&ltk, &dht);
        let (opened_ltk, opened_dht) = engine.open_cookie(&cookie).unwrap();
        prop_assert_eq!(opened_ltk, ltk);
        prop_assert_eq!(opened_dht, dht);
    }

    /// Nonce reconstruction recovers any low-16-bit value that lies
    /// within the acceptance window of an arbitrary expected nonce.
    #[test]
    fn nonce_reconstruct_within_window(
        base in prop::array::uniform24(any::<u8>()),
        delta in -300i32..300,
    ) {
        let mut expected = Nonce::from_bytes(base);
        if delta < 0 {
            expected.increment_by((-delta) as u16);
        }
        let mut target = Nonce::from_bytes(base);
        if delta > 0 {
            target.increment_by(delta as u16);
        }
        let reconstructed = Nonce::reconstruct(&expected, target.low_u16());
        prop_assert!(reconstructed.is_some());
    }

    /// However many lossless frames arrive, in whatever order, the
    /// receive buffer only ever delivers a strictly contiguous,
    /// gap-free prefix — it never reorders or skips.
    #[test]
    fn recv_buffer_delivers_contiguous_prefix_any_order(count in 1u32..64) {
        use rand::seq::SliceRandom;
        let mut rng = rand::thread_rng();
        let mut order: Vec<u32> = (0..count).collect();
        order.shuffle(&mut rng);

        let mut recv = RecvBuffer::new(128);
        let mut delivered = Vec::new();
        for &n in &order {
            let payload = n.to_be_bytes().to_vec();
            delivered.extend(recv.insert_and_drain(n, payload));
        }

        for (i, payload) in delivered.iter().enumerate() {
            prop_assert_eq!(payload, &(i as u32).to_be_bytes().to_vec());
        }
    }

    /// Freeing any occupied send-buffer slot never moves `start`, and
    /// always makes that exact slot report empty afterward.
    #[test]
    fn send_buffer_free_never_moves_start(
        count in 1usize..32,
        free_index in 0usize..32,
    ) {
        let mut buf = SendBuffer::new(64);
        let mut numbers = Vec::new();
        for i in 0..count {
            numbers.push(buf.enqueue(vec![i as u8]).unwrap());
        }
        let target = numbers[free_index % numbers.len()];
        let start_before = buf.start();

        buf.free(target);

        prop_assert_eq!(buf.start(), start_before);
        prop_assert!(buf.get(target).is_none());
    }
}
