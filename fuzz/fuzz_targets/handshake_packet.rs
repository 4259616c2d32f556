//! Fuzz target for crypto-handshake-packet parsing
//!
//! Tests that arbitrary bytes never panic the parser of the second
//! untrusted packet a peer sends us, before any keys are verified.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wraith_core::handshake::HandshakePacket;

fuzz_target!(|data: &[u8]| {
    let _ = HandshakePacket::parse(data);
});
