//! Fuzz target for cryptographic operations
//!
//! Tests that the AEAD encrypt/decrypt operations correctly handle arbitrary input.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wraith_crypto::aead::AeadCipher;

#[derive(Debug, Arbitrary)]
struct CryptoInput {
    key: [u8; 32],
    nonce: [u8; 24],
    plaintext: Vec<u8>,
    aad: Vec<u8>,
}

fuzz_target!(|input: CryptoInput| {
    let cipher = AeadCipher::new(&input.key);

    if let Ok(ciphertext) = cipher.encrypt(&input.nonce, &input.plaintext, &input.aad) {
        let _ = cipher.decrypt(&input.nonce, &ciphertext, &input.aad);
    }

    let _ = cipher.decrypt(&input.nonce, &input.plaintext, &input.aad);
});
