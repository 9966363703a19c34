//! Signing traits for timestamped detached signatures.
//!
//! Directory records and checkpoints are signed with the signature creation
//! time bound into the signed bytes:
//!
//! ```text
//! signed_payload = created_at_be || data
//! ```
//!
//! Verifiers return the creation time so callers can reason about freshness.

use crate::error::CryptoError;
use crate::types::DetachedSignature;

/// Creates detached signatures.
pub trait DetachedSigner: Send + Sync {
    /// Get the public key.
    fn public_key(&self) -> Vec<u8>;

    /// Sign data, binding the given creation time into the signature.
    fn sign_at(&self, data: &[u8], created_at: i64) -> Result<DetachedSignature, CryptoError>;
}

/// Verifies detached signatures.
pub trait DetachedVerifier: Send + Sync {
    /// Verify a signature against a public key.
    ///
    /// Returns `Ok(false)` when the signature is well-formed but does not
    /// match, and an error when the key or signature is malformed.
    fn verify(
        &self,
        public_key: &[u8],
        data: &[u8],
        signature: &DetachedSignature,
    ) -> Result<bool, CryptoError>;

    /// Verify against a key ring, returning the creation time on the first
    /// key that validates the signature.
    ///
    /// Malformed keys are skipped.
    fn verify_any(
        &self,
        public_keys: &[Vec<u8>],
        data: &[u8],
        signature: &DetachedSignature,
    ) -> Result<i64, CryptoError> {
        for key in public_keys {
            if let Ok(true) = self.verify(key, data, signature) {
                return Ok(signature.created_at);
            }
        }
        Err(CryptoError::VerificationFailed)
    }
}
