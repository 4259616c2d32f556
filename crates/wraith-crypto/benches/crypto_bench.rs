//! Performance benchmarks for wraith-crypto.
//!
//! Run with: `cargo bench -p wraith-crypto`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand_core::OsRng;
use wraith_crypto::aead::AeadCipher;
use wraith_crypto::hash::{Kdf, hash, hkdf_expand, hkdf_extract};
use wraith_crypto::x25519::PrivateKey;

fn bench_aead_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("aead_encrypt");
    let sizes = [64, 256, 1024, 4096, 16384, 65536];

    for size in sizes {
        let cipher = AeadCipher::new(&[0x42u8; 32]);
        let nonce = [0u8; 24];
        let aad = b"additional data";
        let plaintext = vec![0xAA; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| cipher.encrypt(black_box(&nonce), black_box(&plaintext), black_box(aad)))
        });
    }

    group.finish();
}

fn bench_aead_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("aead_decrypt");
    let sizes = [64, 256, 1024, 4096, 16384, 65536];

    for size in sizes {
        let cipher = AeadCipher::new(&[0x42u8; 32]);
        let nonce = [0u8; 24];
        let aad = b"additional data";
        let plaintext = vec![0xAA; size];
        let ciphertext = cipher.encrypt(&nonce, &plaintext, aad).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| cipher.decrypt(black_box(&nonce), black_box(&ciphertext), black_box(aad)))
        });
    }

    group.finish();
}

fn bench_aead_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("aead_roundtrip");
    // Typical MTU-sized payloads.
    let sizes = [1200, 1400, 4096];

    for size in sizes {
        let cipher = AeadCipher::new(&[0x42u8; 32]);
        let nonce = [0u8; 24];
        let aad = b"wraith-frame-aad";
        let plaintext = vec![0xBB; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let ct = cipher
                    .encrypt(black_box(&nonce), black_box(&plaintext), black_box(aad))
                    .unwrap();
                cipher.decrypt(black_box(&nonce), black_box(&ct), black_box(aad))
            })
        });
    }

    group.finish();
}

fn bench_x25519_keygen(c: &mut Criterion) {
    c.bench_function("x25519_keygen", |b| {
        b.iter(|| PrivateKey::generate(&mut OsRng))
    });
}

fn bench_x25519_exchange(c: &mut Criterion) {
    let alice_private = PrivateKey::generate(&mut OsRng);
    let bob_private = PrivateKey::generate(&mut OsRng);
    let bob_public = bob_private.public_key();

    c.bench_function("x25519_exchange", |b| {
        b.iter(|| alice_private.exchange(black_box(&bob_public)))
    });
}

fn bench_blake3_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("blake3_hash");
    let sizes = [32, 256, 1024, 4096, 65536];

    for size in sizes {
        let data = vec![0xCC; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| hash(black_box(&data)))
        });
    }

    group.finish();
}

fn bench_hkdf(c: &mut Criterion) {
    let ikm = [0x42u8; 32];
    let salt = [0xABu8; 32];
    let info = b"wraith-key-derivation";

    c.bench_function("hkdf_extract", |b| {
        b.iter(|| hkdf_extract(black_box(&salt), black_box(&ikm)))
    });

    let prk = hkdf_extract(&salt, &ikm);
    let mut output = [0u8; 32];
    c.bench_function("hkdf_expand", |b| {
        b.iter(|| hkdf_expand(black_box(&prk), black_box(info), &mut output))
    });
}

fn bench_kdf(c: &mut Criterion) {
    let ikm = [0x42u8; 32];
    let kdf = Kdf::new("wraith-benchmark-context");

    c.bench_function("kdf_derive_key", |b| {
        b.iter(|| kdf.derive_key(black_box(&ikm)))
    });
}

fn bench_constant_time_ops(c: &mut Criterion) {
    use wraith_crypto::constant_time::{ct_eq, ct_select};

    let a = [0x42u8; 32];
    let b = [0x42u8; 32];
    let c_arr = [0xABu8; 32];

    c.bench_function("ct_eq_32_bytes_equal", |b_iter| {
        b_iter.iter(|| ct_eq(black_box(&a), black_box(&b)))
    });

    c.bench_function("ct_eq_32_bytes_unequal", |b_iter| {
        b_iter.iter(|| ct_eq(black_box(&a), black_box(&c_arr)))
    });

    let x = [0x11u8; 8];
    let y = [0x22u8; 8];

    c.bench_function("ct_select_8_bytes", |b_iter| {
        b_iter.iter(|| {
            let mut result = [0u8; 8];
            ct_select(black_box(true), black_box(&x), black_box(&y), &mut result);
            result
        })
    });
}

criterion_group!(
    aead_benches,
    bench_aead_encrypt,
    bench_aead_decrypt,
    bench_aead_roundtrip,
);

criterion_group!(x25519_benches, bench_x25519_keygen, bench_x25519_exchange);

criterion_group!(blake3_benches, bench_blake3_hash, bench_hkdf, bench_kdf);

criterion_group!(constant_time_benches, bench_constant_time_ops);

criterion_main!(
    aead_benches,
    x25519_benches,
    blake3_benches,
    constant_time_benches,
);
