//! Bitcoin-compatible hashing and the signature schemes used for ownership
//! proofs.
//!
//! Payloads are never signed directly. Both schemes sign the BIP-340 style
//! tagged hash `SHA256(SHA256(tag) || SHA256(tag) || payload)` with the
//! BIP-322 message tag.

use secp256k1::{ecdsa, schnorr, Keypair, Message, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};

/// Domain tag for signed chat payloads.
pub const SIGNED_MESSAGE_TAG: &[u8] = b"BIP0322-signed-message";

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    use ripemd::{Digest, Ripemd160};
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// RIPEMD160(SHA256(data)), the hash committed to by P2PKH scripts.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

pub fn tagged_hash(tag: &[u8], data: &[u8]) -> [u8; 32] {
    let tag_hash = sha256(tag);
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    hasher.update(data);
    hasher.finalize().into()
}

/// Digest that a message signature commits to.
pub fn message_digest(payload: &[u8]) -> [u8; 32] {
    tagged_hash(SIGNED_MESSAGE_TAG, payload)
}

/// Public key claimed to own a UTXO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKey {
    /// Full key, proves P2PKH outputs with a compact ECDSA signature.
    Ecdsa(PublicKey),
    /// BIP-340 key, proves Taproot key-path outputs with a Schnorr signature.
    Schnorr(XOnlyPublicKey),
}

impl OwnerKey {
    pub fn verify(&self, payload: &[u8], signature: &[u8; 64]) -> bool {
        let secp = Secp256k1::verification_only();
        let digest = Message::from_digest(message_digest(payload));
        match self {
            OwnerKey::Ecdsa(key) => match ecdsa::Signature::from_compact(signature) {
                Ok(sig) => secp.verify_ecdsa(&digest, &sig, key).is_ok(),
                Err(_) => false,
            },
            OwnerKey::Schnorr(key) => match schnorr::Signature::from_slice(signature) {
                Ok(sig) => secp.verify_schnorr(&sig, &digest, key).is_ok(),
                Err(_) => false,
            },
        }
    }
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerKey::Ecdsa(key) => write!(f, "ecdsa:{}", hex::encode(key.serialize())),
            OwnerKey::Schnorr(key) => write!(f, "schnorr:{}", hex::encode(key.serialize())),
        }
    }
}

/// Compact ECDSA signature over the tagged digest of `payload`.
pub fn sign_ecdsa(secret: &SecretKey, payload: &[u8]) -> [u8; 64] {
    let secp = Secp256k1::signing_only();
    let digest = Message::from_digest(message_digest(payload));
    secp.sign_ecdsa(&digest, secret).serialize_compact()
}

/// BIP-340 Schnorr signature over the tagged digest of `payload`.
pub fn sign_schnorr(secret: &SecretKey, payload: &[u8]) -> [u8; 64] {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, secret);
    let digest = Message::from_digest(message_digest(payload));
    secp.sign_schnorr_no_aux_rand(&digest, &keypair).serialize()
}

/// Size of the compressed public key that prefixes P2PKH payloads.
pub const OWNER_KEY_SIZE: usize = 33;

/// P2PKH outputs commit only to a key hash, so the signer's compressed key
/// travels as the first bytes of the payload.
pub fn p2pkh_payload(key: &PublicKey, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(OWNER_KEY_SIZE + body.len());
    payload.extend_from_slice(&key.serialize());
    payload.extend_from_slice(body);
    payload
}

/// Reads the compressed key prefix written by [`p2pkh_payload`].
pub fn payload_owner_key(payload: &[u8]) -> Option<PublicKey> {
    let prefix = payload.get(..OWNER_KEY_SIZE)?;
    PublicKey::from_slice(prefix).ok()
}

/// Locking script for a P2PKH output paying to `key`.
pub fn p2pkh_script(key: &PublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&hash160(&key.serialize()));
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

/// Locking script for a Taproot output whose output key is `key`.
pub fn taproot_script(key: &XOnlyPublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(34);
    script.extend_from_slice(&[0x51, 0x20]);
    script.extend_from_slice(&key.serialize());
    script
}
