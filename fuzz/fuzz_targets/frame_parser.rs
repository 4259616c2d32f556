//! Fuzz target for frame parsing
//!
//! Tests that the frame parser correctly handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wraith_core::frame::Frame;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::parse(data);
});
