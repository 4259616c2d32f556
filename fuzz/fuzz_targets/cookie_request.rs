//! Fuzz target for cookie-request-packet parsing
//!
//! Tests that arbitrary bytes never panic the untrusted-input parser of
//! the first packet a peer ever sends us.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wraith_core::handshake::CookieRequest;

fuzz_target!(|data: &[u8]| {
    let _ = CookieRequest::parse(data);
});
