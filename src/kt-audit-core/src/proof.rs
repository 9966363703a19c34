//! Epoch and proof verification.
//!
//! ## Security Properties
//!
//! - **No silent acceptance**: a proof missing its revision or token, or whose
//!   leaf does not hash to the epoch root, always fails
//! - **Trusted time**: every verified state carries the certificate time of
//!   the epoch it was proven in, which callers bound with freshness checks
//! - **Catch-all routing**: of an address and its domain catch-all entry,
//!   exactly one may carry the keys; the other must be proven absent

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::config::{EpochVerificationMode, KtConfig};
use crate::context::KtContext;
use crate::crypto::{KtCrypto, MerkleLeaf};
use crate::email::{catch_all_email, normalize_email};
use crate::error::{ensure, KtError};
use crate::repository::KeyTransparencyRepository;
use crate::types::{
    Epoch, Proof, ProofPair, ProofType, SignedKeyList, SklContent, UserId, VerifiedState,
};

/// Hex characters holding the timestamp at the start of an obsolescence token.
const TOKEN_TIMESTAMP_HEX_LEN: usize = 16;

/// Authenticates epochs.
pub struct EpochVerifier {
    crypto: Arc<dyn KtCrypto>,
    config: Arc<KtConfig>,
}

impl EpochVerifier {
    /// Create an epoch verifier.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            crypto: Arc::clone(&ctx.crypto),
            config: Arc::clone(&ctx.config),
        }
    }

    /// Verify the epoch certificate, returning its trusted timestamp.
    ///
    /// In permissive mode an unverifiable certificate yields `0`.
    pub fn verify(&self, epoch: &Epoch) -> Result<i64, KtError> {
        match self.crypto.verify_epoch_certificate(epoch) {
            Ok(not_before) => Ok(not_before),
            Err(e) => match self.config.epoch_verification {
                EpochVerificationMode::Strict => {
                    warn!(epoch_id = epoch.epoch_id, error = %e, "Epoch certificate rejected");
                    Err(e)
                }
                EpochVerificationMode::Permissive => {
                    warn!(
                        epoch_id = epoch.epoch_id,
                        error = %e,
                        "Epoch certificate unverifiable, continuing without trusted time"
                    );
                    Ok(0)
                }
            },
        }
    }
}

/// Verifies proofs against epochs.
pub struct ProofVerifier {
    crypto: Arc<dyn KtCrypto>,
    epochs: EpochVerifier,
}

impl ProofVerifier {
    /// Create a proof verifier.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            crypto: Arc::clone(&ctx.crypto),
            epochs: EpochVerifier::new(ctx),
        }
    }

    /// Verify `proofs` for `email` in `epoch`.
    ///
    /// `skl` is the entry the proof is expected to commit to; it is required
    /// for existence proofs and ignored otherwise.
    #[instrument(level = "debug", skip(self, skl, epoch, proofs), fields(epoch_id = epoch.epoch_id))]
    pub fn verify_proof_in_epoch(
        &self,
        email: &str,
        skl: Option<&SignedKeyList>,
        epoch: &Epoch,
        proofs: &ProofPair,
    ) -> Result<VerifiedState, KtError> {
        let not_before = self.epochs.verify(epoch)?;
        let label = normalize_email(email);

        let Some(catch_all) = &proofs.catch_all_proof else {
            return self.verify_single(&label, skl, &proofs.proof, epoch, not_before);
        };
        let domain = catch_all_email(email);

        if proofs.proof.proof_type == ProofType::Absence {
            // The address has no entry of its own; the domain entry serves it.
            self.verify_single(&label, None, &proofs.proof, epoch, not_before)?;
            self.verify_single(&domain, skl, catch_all, epoch, not_before)
        } else {
            ensure(
                catch_all.proof_type == ProofType::Absence,
                "address with its own entry is also covered by a catch-all entry",
            )?;
            self.verify_single(&domain, None, catch_all, epoch, not_before)?;
            self.verify_single(&label, skl, &proofs.proof, epoch, not_before)
        }
    }

    fn verify_single(
        &self,
        label: &str,
        skl: Option<&SignedKeyList>,
        proof: &Proof,
        epoch: &Epoch,
        not_before: i64,
    ) -> Result<VerifiedState, KtError> {
        match proof.proof_type {
            ProofType::Absence => {
                let leaf = MerkleLeaf {
                    label,
                    revision: None,
                    value: None,
                };
                self.crypto.verify_merkle_proof(&leaf, proof, &epoch.tree_hash)?;
                Ok(VerifiedState::Absent(not_before))
            }
            ProofType::Existence => {
                let data = skl
                    .and_then(SignedKeyList::data)
                    .ok_or_else(|| KtError::verification("existence proof without SKL data"))?;
                let revision = proof
                    .revision
                    .ok_or_else(|| KtError::verification("existence proof without revision"))?;
                let leaf = MerkleLeaf {
                    label,
                    revision: Some(revision),
                    value: Some(data),
                };
                self.crypto.verify_merkle_proof(&leaf, proof, &epoch.tree_hash)?;
                debug!(revision, "Existence proof verified");
                Ok(VerifiedState::Existent(not_before))
            }
            ProofType::Obsolescence => {
                let token = proof
                    .obsolescence_token
                    .as_deref()
                    .ok_or_else(|| KtError::verification("obsolescence proof without token"))?;
                ensure(is_hex(token), "obsolescence token is not hex")?;
                let revision = proof
                    .revision
                    .ok_or_else(|| KtError::verification("obsolescence proof without revision"))?;
                let leaf = MerkleLeaf {
                    label,
                    revision: Some(revision),
                    value: Some(token),
                };
                self.crypto.verify_merkle_proof(&leaf, proof, &epoch.tree_hash)?;
                debug!(revision, "Obsolescence proof verified");
                Ok(VerifiedState::Obsolete(not_before))
            }
        }
    }
}

/// Fail unless `state` is the inclusion state `skl` calls for: existence for
/// a key list, obsolescence for an obsolescence marker.
pub fn ensure_state_matches(skl: &SignedKeyList, state: VerifiedState) -> Result<(), KtError> {
    let matches = matches!(
        (&skl.content, state),
        (SklContent::Keys { .. }, VerifiedState::Existent(_))
            | (SklContent::Obsolete, VerifiedState::Obsolete(_))
    );
    ensure(matches, "proof type does not match the SKL")
}

/// Timestamp encoded in the first 8 bytes of an obsolescence token.
pub fn obsolescence_token_timestamp(token: &str) -> Result<i64, KtError> {
    ensure(
        is_hex(token) && token.len() >= TOKEN_TIMESTAMP_HEX_LEN,
        "malformed obsolescence token",
    )?;
    let bytes = hex::decode(&token[..TOKEN_TIMESTAMP_HEX_LEN]).map_err(kt_crypto::CryptoError::from)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes);
    i64::try_from(u64::from_be_bytes(raw))
        .map_err(|_| KtError::verification("obsolescence token timestamp out of range"))
}

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Proves that an address has no directory entry.
pub struct AbsenceProofChecker {
    kt_repository: Arc<dyn KeyTransparencyRepository>,
    proofs: ProofVerifier,
    clock: Arc<dyn Clock>,
    config: Arc<KtConfig>,
}

impl AbsenceProofChecker {
    /// Create an absence checker.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            kt_repository: Arc::clone(&ctx.kt_repository),
            proofs: ProofVerifier::new(ctx),
            clock: Arc::clone(&ctx.clock),
            config: Arc::clone(&ctx.config),
        }
    }

    /// Verify `email` is absent in the latest epoch.
    #[instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn check_absence_proof(&self, user_id: &UserId, email: &str) -> Result<VerifiedState, KtError> {
        let epoch = self.kt_repository.get_last_epoch(user_id).await?;
        let proofs = self.kt_repository.get_proof(user_id, epoch.epoch_id, email).await?;

        match self.proofs.verify_proof_in_epoch(email, None, &epoch, &proofs)? {
            VerifiedState::Absent(not_before) => {
                ensure(
                    self.config.is_fresh(not_before, self.clock.now()),
                    "absence proof comes from a stale epoch",
                )?;
                Ok(VerifiedState::Absent(not_before))
            }
            other => Err(KtError::verification(format!(
                "expected absence, log reports {other:?}"
            ))),
        }
    }
}
