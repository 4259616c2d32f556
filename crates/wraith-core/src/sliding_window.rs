//! The per-direction sliding-window reliable layer: fixed-size ring
//! buffers for send and receive, request-packet gap encoding, and RTT
//! sampling.

use crate::frame::PACKET_ID_REQUEST;
use std::time::Instant;

/// One slot in the send buffer: payload plus the time it was last sent.
#[derive(Clone)]
struct SendSlot {
    sent_at: Option<Instant>,
    payload: Vec<u8>,
}

/// Send-side ring buffer. `start..end` is the live window; slots outside
/// it are logically empty.
pub struct SendBuffer {
    ring_size: u32,
    start: u32,
    end: u32,
    slots: Vec<Option<SendSlot>>,
}

impl SendBuffer {
    /// Create an empty send buffer with the given ring size (must be a
    /// power of two to match the packet-number modulus).
    #[must_use]
    pub fn new(ring_size: u32) -> Self {
        Self {
            ring_size,
            start: 0,
            end: 0,
            slots: vec![None; ring_size as usize],
        }
    }

    fn index(&self, packet_number: u32) -> usize {
        (packet_number % self.ring_size) as usize
    }

    /// Number of slots currently occupied.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.end.wrapping_sub(self.start)
    }

    /// Whether the buffer has no room for another enqueue.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.ring_size
    }

    /// Enqueue a new payload at `end`, returning its packet number.
    /// Fails (returns `None`) if the ring is full.
    pub fn enqueue(&mut self, payload: Vec<u8>) -> Option<u32> {
        if self.is_full() {
            return None;
        }
        let number = self.end;
        let idx = self.index(number);
        self.slots[idx] = Some(SendSlot {
            sent_at: None,
            payload,
        });
        self.end = self.end.wrapping_add(1);
        Some(number)
    }

    /// Mark a slot as sent at `now`.
    pub fn mark_sent(&mut self, packet_number: u32, now: Instant) {
        let idx = self.index(packet_number);
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.sent_at = Some(now);
        }
    }

    /// The payload and send-time for a slot, if still occupied.
    #[must_use]
    pub fn get(&self, packet_number: u32) -> Option<(&[u8], Option<Instant>)> {
        let idx = self.index(packet_number);
        self.slots[idx]
            .as_ref()
            .map(|s| (s.payload.as_slice(), s.sent_at))
    }

    /// Clear `sent_at` on a slot so the next pass retransmits it. Only
    /// has an effect if the slot was last sent before `older_than`.
    pub fn mark_for_resend(&mut self, packet_number: u32, now: Instant, rtt_threshold: std::time::Duration) {
        let idx = self.index(packet_number);
        if let Some(slot) = self.slots[idx].as_mut() {
            if let Some(sent_at) = slot.sent_at {
                if now.duration_since(sent_at) >= rtt_threshold {
                    slot.sent_at = None;
                }
            }
        }
    }

    /// Free every slot below `buffer_start` (the peer has acked them),
    /// returning the RTT sample taken from the oldest freed slot's
    /// `sent_at`, if any were sent.
    pub fn clear_until(&mut self, buffer_start: u32, now: Instant) -> Option<std::time::Duration> {
        let mut rtt_sample = None;
        while self.start != buffer_start && self.start != self.end {
            let idx = self.index(self.start);
            if let Some(slot) = self.slots[idx].take() {
                if let Some(sent_at) = slot.sent_at {
                    let elapsed = now.duration_since(sent_at);
                    rtt_sample = Some(match rtt_sample {
                        Some(existing) => std::cmp::min(existing, elapsed),
                        None => elapsed,
                    });
                }
            }
            self.start = self.start.wrapping_add(1);
        }
        rtt_sample
    }

    /// Free a single slot outright, regardless of its position relative
    /// to `start` — used when a peer's request packet reports a slot as
    /// present on their end even though it hasn't been acked via
    /// `clear_until` yet (out-of-order ack).
    pub fn free(&mut self, packet_number: u32) {
        if packet_number.wrapping_sub(self.start) >= self.ring_size {
            return;
        }
        let idx = self.index(packet_number);
        self.slots[idx] = None;
    }

    /// Iterate over occupied slot numbers within `start..end`, in order.
    pub fn occupied_slots(&self) -> impl Iterator<Item = u32> + '_ {
        let start = self.start;
        let end = self.end;
        (start..end).filter(move |&n| self.slots[self.index(n)].is_some())
    }

    /// Lower bound of the live window.
    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Upper bound (exclusive) of the live window.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.end
    }
}

/// One slot in the receive buffer.
#[derive(Clone)]
struct RecvSlot {
    payload: Vec<u8>,
}

/// Receive-side ring buffer.
pub struct RecvBuffer {
    ring_size: u32,
    start: u32,
    end: u32,
    slots: Vec<Option<RecvSlot>>,
}

impl RecvBuffer {
    /// Create an empty receive buffer with the given ring size.
    #[must_use]
    pub fn new(ring_size: u32) -> Self {
        Self {
            ring_size,
            start: 0,
            end: 0,
            slots: vec![None; ring_size as usize],
        }
    }

    fn index(&self, packet_number: u32) -> usize {
        (packet_number % self.ring_size) as usize
    }

    /// Lower bound: lowest packet number not yet delivered.
    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Upper bound hint: highest packet number observed plus one. Lossy
    /// frames only ever advance this as a hint for the request encoder,
    /// never as a commitment to deliver them reliably.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Record a lossy frame's packet number as advancing `end` without
    /// occupying a slot.
    pub fn observe_lossy(&mut self, packet_number: u32) {
        let candidate = packet_number.wrapping_add(1);
        if candidate.wrapping_sub(self.start) > self.end.wrapping_sub(self.start) {
            self.end = candidate;
        }
    }

    /// Insert a lossless frame's payload into its slot (no-op if already
    /// occupied or outside the window), then deliver every now-contiguous
    /// prefix starting at `start`, returning the delivered payloads in
    /// order and advancing `start` past them.
    pub fn insert_and_drain(&mut self, packet_number: u32, payload: Vec<u8>) -> Vec<Vec<u8>> {
        if packet_number.wrapping_sub(self.start) >= self.ring_size {
            return Vec::new();
        }
        let idx = self.index(packet_number);
        if self.slots[idx].is_none() {
            self.slots[idx] = Some(RecvSlot { payload });
        }
        if packet_number.wrapping_add(1).wrapping_sub(self.start) > self.end.wrapping_sub(self.start)
        {
            self.end = packet_number.wrapping_add(1);
        }

        let mut delivered = Vec::new();
        loop {
            let idx = self.index(self.start);
            match self.slots[idx].take() {
                Some(slot) => {
                    delivered.push(slot.payload);
                    self.start = self.start.wrapping_add(1);
                }
                None => break,
            }
        }
        delivered
    }

    /// Encode a request packet's payload describing every slot missing
    /// between `start` and `end` as a run-length list of 1-byte skip
    /// counts. Value `n` means "the next `n-1` slots present, the nth
    /// missing"; a literal `0` means "add 255 and continue" (for gaps
    /// wider than 255).
    #[must_use]
    pub fn build_request_payload(&self) -> Vec<u8> {
        let mut out = vec![PACKET_ID_REQUEST];
        let mut run = 0u32;
        for offset in 0..self.end.wrapping_sub(self.start) {
            let number = self.start.wrapping_add(offset);
            let missing = self.slots[self.index(number)].is_none();
            run += 1;
            if missing {
                while run >= 255 {
                    out.push(0);
                    run -= 255;
                }
                out.push(run as u8);
                run = 0;
            }
        }
        out
    }

    /// Missing slot numbers relative to `start`, decoded from a peer's
    /// request-packet payload (including the leading packet-id byte).
    #[must_use]
    pub fn decode_request(start: u32, payload: &[u8]) -> Vec<u32> {
        let mut missing = Vec::new();
        let mut offset: u32 = 0;
        for &byte in &payload[1..] {
            if byte == 0 {
                offset += 255;
                continue;
            }
            offset += u32::from(byte);
            missing.push(start.wrapping_add(offset - 1));
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_buffer_enqueue_and_full() {
        let mut buf = SendBuffer::new(4);
        assert_eq!(buf.enqueue(vec![1]).unwrap(), 0);
        assert_eq!(buf.enqueue(vec![2]).unwrap(), 1);
        assert_eq!(buf.enqueue(vec![3]).unwrap(), 2);
        assert_eq!(buf.enqueue(vec![4]).unwrap(), 3);
        assert!(buf.is_full());
        assert!(buf.enqueue(vec![5]).is_none());
    }

    #[test]
    fn test_send_buffer_clear_until_gives_rtt() {
        let mut buf = SendBuffer::new(8);
        let n = buf.enqueue(vec![1]).unwrap();
        let t0 = Instant::now();
        buf.mark_sent(n, t0);

        let t1 = t0 + std::time::Duration::from_millis(50);
        let rtt = buf.clear_until(n + 1, t1);
        assert!(rtt.is_some());
        assert_eq!(buf.start(), n + 1);
    }

    #[test]
    fn test_free_clears_slot_without_moving_start() {
        let mut buf = SendBuffer::new(8);
        let a = buf.enqueue(vec![1]).unwrap();
        let b = buf.enqueue(vec![2]).unwrap();
        buf.free(b);
        assert_eq!(buf.start(), 0);
        assert!(buf.get(b).is_none());
        assert!(buf.get(a).is_some());
    }

    #[test]
    fn test_recv_buffer_in_order_delivery() {
        let mut recv = RecvBuffer::new(8);
        let delivered = recv.insert_and_drain(0, vec![16, b'a']);
        assert_eq!(delivered, vec![vec![16, b'a']]);
        assert_eq!(recv.start(), 1);
    }

    #[test]
    fn test_recv_buffer_out_of_order_then_fill_gap() {
        let mut recv = RecvBuffer::new(8);
        assert!(recv.insert_and_drain(1, vec![16, b'b']).is_empty());
        assert_eq!(recv.start(), 0);

        let delivered = recv.insert_and_drain(0, vec![16, b'a']);
        assert_eq!(delivered, vec![vec![16, b'a'], vec![16, b'b']]);
        assert_eq!(recv.start(), 2);
    }

    #[test]
    fn test_recv_buffer_lossy_advances_end_only() {
        let mut recv = RecvBuffer::new(8);
        recv.observe_lossy(5);
        assert_eq!(recv.end(), 6);
        assert_eq!(recv.start(), 0);
    }

    #[test]
    fn test_request_round_trip_exact_missing_set() {
        // Testable property 5: start=100, end=110, slots {101,104,106} missing.
        let mut recv = RecvBuffer::new(256);
        recv.start = 100;
        recv.end = 110;
        for n in 100..110u32 {
            if ![101u32, 104, 106].contains(&n) {
                let idx = recv.index(n);
                recv.slots[idx] = Some(RecvSlot { payload: vec![16] });
            }
        }

        let payload = recv.build_request_payload();
        let missing = RecvBuffer::decode_request(recv.start(), &payload);

        assert_eq!(missing, vec![101, 104, 106]);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        proptest! {
            #[test]
            fn prop_request_roundtrip(
                missing in prop::collection::btree_set(0u32..64, 0..20)
            ) {
                let mut recv = RecvBuffer::new(256);
                recv.start = 0;
                recv.end = 64;
                for n in 0..64u32 {
                    if !missing.contains(&n) {
                        let idx = recv.index(n);
                        recv.slots[idx] = Some(RecvSlot { payload: vec![16] });
                    }
                }

                let payload = recv.build_request_payload();
                let decoded: BTreeSet<u32> = RecvBuffer::decode_request(0, &payload).into_iter().collect();
                prop_assert_eq!(decoded, missing);
            }
        }
    }
}
