//! Ed25519 signature operations.
//!
//! Used for key list signatures, checkpoint signatures and epoch certificates
//! in software deployments.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use crate::error::CryptoError;
use crate::signature::{DetachedSigner, DetachedVerifier};
use crate::types::{DetachedSignature, SIGNATURE_LEN};

/// Ed25519 signer.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Create a new signer with a random key.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create a signer from seed bytes (32 bytes).
    ///
    /// # Errors
    ///
    /// Returns error if the seed is not exactly 32 bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let seed_array: [u8; 32] = seed.try_into().map_err(|_| {
            CryptoError::invalid_private_key(format!(
                "Ed25519 seed must be 32 bytes, got {}",
                seed.len()
            ))
        })?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed_array),
        })
    }

    /// Get the verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hex encoding of the verifying key.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign raw bytes without a timestamp prefix.
    #[must_use]
    pub fn sign_raw(&self, data: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(data).to_bytes()
    }
}

impl DetachedSigner for Ed25519Signer {
    fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    fn sign_at(&self, data: &[u8], created_at: i64) -> Result<DetachedSignature, CryptoError> {
        let message = DetachedSignature::signed_message(created_at, data);
        Ok(DetachedSignature {
            created_at,
            signature: self.sign_raw(&message),
        })
    }
}

/// Ed25519 verifier.
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    /// Create a new verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Verify a raw signature (no timestamp prefix).
    ///
    /// # Errors
    ///
    /// Returns error if the key or signature is malformed.
    pub fn verify_raw(
        &self,
        public_key: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError> {
        let pk_bytes: [u8; 32] = public_key.try_into().map_err(|_| {
            CryptoError::invalid_public_key(format!(
                "Ed25519 public key must be 32 bytes, got {}",
                public_key.len()
            ))
        })?;
        let vk = VerifyingKey::from_bytes(&pk_bytes)
            .map_err(|e| CryptoError::invalid_public_key(e.to_string()))?;

        let sig_bytes: [u8; SIGNATURE_LEN] = signature.try_into().map_err(|_| {
            CryptoError::invalid_signature(format!(
                "Ed25519 signature must be {SIGNATURE_LEN} bytes, got {}",
                signature.len()
            ))
        })?;
        let sig = Signature::from_bytes(&sig_bytes);

        Ok(vk.verify(data, &sig).is_ok())
    }
}

impl Default for Ed25519Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DetachedVerifier for Ed25519Verifier {
    fn verify(
        &self,
        public_key: &[u8],
        data: &[u8],
        signature: &DetachedSignature,
    ) -> Result<bool, CryptoError> {
        let message = DetachedSignature::signed_message(signature.created_at, data);
        self.verify_raw(public_key, &message, &signature.signature)
    }
}
