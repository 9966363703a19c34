//! Cryptographic capability consumed by the engine.
//!
//! The engine treats signatures, fingerprints and Merkle proofs as opaque
//! checks behind [`KtCrypto`]. [`SoftwareKtCrypto`] implements them with
//! Ed25519 and the sparse Merkle tree from `kt-crypto`.

use kt_crypto::merkle::{leaf_hash, leaf_index, verify_proof};
use kt_crypto::{
    constant_time_eq, decode_hash, key_fingerprint, sha256_concat, sha256_fingerprint,
    DetachedSignature, DetachedVerifier, Ed25519Signer, Ed25519Verifier, Hash,
};
use tracing::debug;

use crate::error::KtError;
use crate::types::{Epoch, EpochCertificate, EpochId, Proof, Revision};

/// The value a proof is expected to commit to.
#[derive(Debug, Clone, Copy)]
pub struct MerkleLeaf<'a> {
    /// Canonical label (normalized email or `@domain`).
    pub label: &'a str,
    /// Entry revision.
    pub revision: Option<Revision>,
    /// Leaf value; `None` for absence.
    pub value: Option<&'a str>,
}

/// Signature, fingerprint and proof checks.
pub trait KtCrypto: Send + Sync {
    /// Verify a detached signature against a key ring.
    ///
    /// Returns the signature creation time; fails if no key validates it.
    fn verify_detached(&self, public_keys: &[String], data: &str, signature: &str) -> Result<i64, KtError>;

    /// Short fingerprint of a key, as listed in SKL metadata.
    fn fingerprint(&self, public_key: &str) -> Result<String, KtError>;

    /// SHA-256 fingerprints of a key, as listed in SKL metadata.
    fn sha256_fingerprints(&self, public_key: &str) -> Result<Vec<String>, KtError>;

    /// Check that `proof` commits `leaf` under `root_hash`.
    fn verify_merkle_proof(&self, leaf: &MerkleLeaf<'_>, proof: &Proof, root_hash: &str) -> Result<(), KtError>;

    /// Check the epoch certificate, returning its trusted timestamp.
    fn verify_epoch_certificate(&self, epoch: &Epoch) -> Result<i64, KtError>;
}

/// Software implementation over `kt-crypto`.
pub struct SoftwareKtCrypto {
    verifier: Ed25519Verifier,
    log_key: Option<Vec<u8>>,
}

impl SoftwareKtCrypto {
    /// Create a verifier trusting epochs certified by `log_key` (hex).
    pub fn new(log_key: &str) -> Result<Self, KtError> {
        Ok(Self {
            verifier: Ed25519Verifier::new(),
            log_key: Some(hex::decode(log_key).map_err(kt_crypto::CryptoError::from)?),
        })
    }

    /// Create a verifier with no log key. Every epoch certificate fails.
    pub fn without_log_key() -> Self {
        Self {
            verifier: Ed25519Verifier::new(),
            log_key: None,
        }
    }
}

impl KtCrypto for SoftwareKtCrypto {
    fn verify_detached(&self, public_keys: &[String], data: &str, signature: &str) -> Result<i64, KtError> {
        let signature = DetachedSignature::from_hex(signature)?;
        let ring: Vec<Vec<u8>> = public_keys
            .iter()
            .filter_map(|key| match hex::decode(key) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!(error = %e, "Skipping undecodable key");
                    None
                }
            })
            .collect();

        self.verifier
            .verify_any(&ring, data.as_bytes(), &signature)
            .map_err(|_| KtError::verification("signature does not match any key"))
    }

    fn fingerprint(&self, public_key: &str) -> Result<String, KtError> {
        let bytes = hex::decode(public_key).map_err(kt_crypto::CryptoError::from)?;
        Ok(key_fingerprint(&bytes))
    }

    fn sha256_fingerprints(&self, public_key: &str) -> Result<Vec<String>, KtError> {
        let bytes = hex::decode(public_key).map_err(kt_crypto::CryptoError::from)?;
        Ok(vec![sha256_fingerprint(&bytes)])
    }

    fn verify_merkle_proof(&self, leaf: &MerkleLeaf<'_>, proof: &Proof, root_hash: &str) -> Result<(), KtError> {
        let index = leaf_index(leaf.label.as_bytes());
        let leaf_value = leaf
            .value
            .map(|value| leaf_hash(&index, leaf.revision.unwrap_or_default(), value.as_bytes()));
        let siblings = proof
            .neighbors
            .iter()
            .map(|n| n.as_deref().map(decode_hash).transpose())
            .collect::<Result<Vec<Option<Hash>>, _>>()?;
        let root = decode_hash(root_hash)?;

        if verify_proof(&index, leaf_value, &siblings, &root)? {
            Ok(())
        } else {
            Err(KtError::verification("Merkle proof does not match the tree hash"))
        }
    }

    fn verify_epoch_certificate(&self, epoch: &Epoch) -> Result<i64, KtError> {
        let log_key = self.log_key.as_deref().ok_or_else(|| KtError::ConfigError {
            message: "no log key configured".into(),
        })?;

        let tree_hash = decode_hash(&epoch.tree_hash)?;
        let chain_hash = decode_hash(&epoch.certificate.chain_hash)?;
        let previous = decode_hash(&epoch.certificate.previous_chain_hash)?;
        if !constant_time_eq(&sha256_concat(&[&previous, &tree_hash]), &chain_hash) {
            return Err(KtError::verification("epoch chain hash does not link to its tree hash"));
        }

        let message = certificate_message(epoch.epoch_id, &tree_hash, &chain_hash, epoch.certificate.issued_at);
        let signature = hex::decode(&epoch.certificate.signature).map_err(kt_crypto::CryptoError::from)?;
        if self.verifier.verify_raw(log_key, &message, &signature)? {
            Ok(epoch.certificate.issued_at)
        } else {
            Err(KtError::verification("epoch certificate signature is invalid"))
        }
    }
}

fn certificate_message(epoch_id: EpochId, tree_hash: &Hash, chain_hash: &Hash, issued_at: i64) -> Vec<u8> {
    let mut message = Vec::with_capacity(8 + 32 + 32 + 8);
    message.extend_from_slice(&epoch_id.to_be_bytes());
    message.extend_from_slice(tree_hash);
    message.extend_from_slice(chain_hash);
    message.extend_from_slice(&issued_at.to_be_bytes());
    message
}

/// Produce a certified epoch with a log signing key.
///
/// This is the log side of [`SoftwareKtCrypto::verify_epoch_certificate`],
/// for staging directories and tests.
pub fn certify_epoch(
    log_signer: &Ed25519Signer,
    epoch_id: EpochId,
    tree_hash: Hash,
    previous_chain_hash: Hash,
    issued_at: i64,
) -> Epoch {
    let chain_hash = sha256_concat(&[&previous_chain_hash, &tree_hash]);
    let message = certificate_message(epoch_id, &tree_hash, &chain_hash, issued_at);
    Epoch {
        epoch_id,
        tree_hash: hex::encode(tree_hash),
        certificate: EpochCertificate {
            chain_hash: hex::encode(chain_hash),
            previous_chain_hash: hex::encode(previous_chain_hash),
            issued_at,
            signature: hex::encode(log_signer.sign_raw(&message)),
        },
    }
}
