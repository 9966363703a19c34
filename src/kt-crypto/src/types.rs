//! Wire types shared by the signing and proof primitives.

use crate::error::CryptoError;

/// A SHA-256 digest.
pub type Hash = [u8; 32];

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// A detached signature that commits to its own creation time.
///
/// Encoded as hex of `created_at (8 bytes, big-endian) || signature (64 bytes)`.
/// The signature covers `created_at || data`, so the timestamp cannot be
/// altered without invalidating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedSignature {
    /// Signature creation time, unix seconds.
    pub created_at: i64,
    /// Raw signature bytes.
    pub signature: [u8; SIGNATURE_LEN],
}

impl DetachedSignature {
    /// Encoded length in bytes (before hex).
    pub const ENCODED_LEN: usize = 8 + SIGNATURE_LEN;

    /// Bytes actually covered by the signature.
    #[must_use]
    pub fn signed_message(created_at: i64, data: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(8 + data.len());
        message.extend_from_slice(&created_at.to_be_bytes());
        message.extend_from_slice(data);
        message
    }

    /// Encode as a hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(Self::ENCODED_LEN);
        bytes.extend_from_slice(&self.created_at.to_be_bytes());
        bytes.extend_from_slice(&self.signature);
        hex::encode(bytes)
    }

    /// Decode from a hex string.
    ///
    /// # Errors
    ///
    /// Returns error if the input is not hex or has the wrong length.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(encoded.trim())?;
        if bytes.len() != Self::ENCODED_LEN {
            return Err(CryptoError::invalid_signature(format!(
                "detached signature must be {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            )));
        }

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[..8]);
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&bytes[8..]);

        Ok(Self {
            created_at: i64::from_be_bytes(ts),
            signature,
        })
    }
}
