//! # kt-crypto
//!
//! Cryptographic primitives for key transparency auditing.
//!
//! - **Detached signatures**: Ed25519 signatures that bind their own creation
//!   time, used for signed key lists and self-signed checkpoints
//! - **Fingerprints**: short and full SHA-256 key fingerprints
//! - **Sparse Merkle proofs**: inclusion and absence proofs over a 256-level
//!   tree keyed by label hash
//!
//! ## Signature Binding
//!
//! The creation time is part of the signed payload:
//!
//! ```text
//! signed_payload = created_at_be || data
//! ```
//!
//! so a directory cannot replay an old signature with a fresher timestamp.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod digest;
mod ed25519;
mod error;
pub mod merkle;
mod signature;
mod types;

pub use digest::{key_fingerprint, sha256, sha256_concat, sha256_fingerprint, FINGERPRINT_LEN};
pub use ed25519::{Ed25519Signer, Ed25519Verifier};
pub use error::CryptoError;
pub use merkle::{SparseMerkleTree, TREE_DEPTH};
pub use signature::{DetachedSigner, DetachedVerifier};
pub use types::{DetachedSignature, Hash, SIGNATURE_LEN};

/// Constant-time byte comparison.
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Returns `true` if the slices are equal, `false` otherwise.
///
/// # Security
///
/// This function MUST be used for all cryptographic comparisons
/// (signatures, root hashes, chain hashes).
///
/// The length check still returns early, but length is typically not secret.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Decode a hex string into a 32-byte hash.
///
/// # Errors
///
/// Returns error if the input is not hex or not 32 bytes.
pub fn decode_hash(encoded: &str) -> Result<Hash, CryptoError> {
    let bytes = hex::decode(encoded)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::invalid_proof(format!("hash must be 32 bytes, got {}", bytes.len())))
}
