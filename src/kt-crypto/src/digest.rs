//! Hashing and key fingerprints.

use sha2::{Digest, Sha256};

use crate::types::Hash;

/// Length in bytes of a key fingerprint.
pub const FINGERPRINT_LEN: usize = 20;

/// SHA-256 of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// SHA-256 over several byte strings.
#[must_use]
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Short key fingerprint: hex of the first 20 bytes of SHA-256(key).
#[must_use]
pub fn key_fingerprint(public_key: &[u8]) -> String {
    hex::encode(&sha256(public_key)[..FINGERPRINT_LEN])
}

/// Full SHA-256 key fingerprint, hex.
#[must_use]
pub fn sha256_fingerprint(public_key: &[u8]) -> String {
    hex::encode(sha256(public_key))
}
