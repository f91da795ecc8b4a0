//! Benchmarks for the message codec and signature checks
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use utxochat::crypto::{p2pkh_payload, sign_ecdsa, sign_schnorr, OwnerKey};
use utxochat::message::{Message, MAX_PAYLOAD_SIZE, SIGNATURE_SIZE};
use utxochat::Outpoint;

fn create_message(len: usize) -> Message {
    let payload = (0..len).map(|i| (i % 251) as u8).collect();
    Message::new(Outpoint::new([0x42; 32], 1), [0x17; SIGNATURE_SIZE], payload).unwrap()
}

fn bench_encode_decode(c: &mut Criterion) {
    for (name, len) in [("small", 140), ("max", MAX_PAYLOAD_SIZE)] {
        let message = create_message(len);
        let encoded = message.encode();

        c.bench_function(&format!("encode_{}_message", name), |b| {
            b.iter(|| black_box(&message).encode())
        });
        c.bench_function(&format!("decode_{}_message", name), |b| {
            b.iter(|| Message::decode(black_box(&encoded)).unwrap())
        });
    }
}

fn bench_signature_verification(c: &mut Criterion) {
    let secret = SecretKey::from_slice(&[0x33; 32]).unwrap();
    let public = PublicKey::from_secret_key(&Secp256k1::new(), &secret);
    let (xonly, _) = public.x_only_public_key();

    let payload = p2pkh_payload(&public, b"benchmark payload");
    let ecdsa_sig = sign_ecdsa(&secret, &payload);
    c.bench_function("verify_ecdsa_ownership", |b| {
        b.iter(|| assert!(OwnerKey::Ecdsa(public).verify(black_box(&payload), &ecdsa_sig)))
    });

    let schnorr_sig = sign_schnorr(&secret, b"benchmark payload");
    c.bench_function("verify_schnorr_ownership", |b| {
        b.iter(|| {
            assert!(OwnerKey::Schnorr(xonly).verify(black_box(b"benchmark payload"), &schnorr_sig))
        })
    });
}

criterion_group!(benches, bench_encode_decode, bench_signature_verification);
criterion_main!(benches);
