//! Auditing the user's own addresses against the log.
//!
//! For each address the auditor walks every SKL version published since the
//! last checkpoint, proves each one in the log, and advances the checkpoint.
//!
//! ## Security Properties
//!
//! - **Contiguous history**: consecutive versions must have consecutive
//!   revisions, so the directory cannot hide a version it served to others
//! - **Authenticated versions**: every version carrying keys must be signed
//!   by the address's own keys, with non-decreasing signature times
//! - **Freshness**: the newest proof must come from an epoch certified within
//!   the maximum epoch interval
//! - **Key match**: the newest version must declare exactly the local keys

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::bootstrap::InitialEpochResolver;
use crate::checkpoint::CheckpointStore;
use crate::clock::Clock;
use crate::config::KtConfig;
use crate::context::KtContext;
use crate::error::{ensure, KtError};
use crate::proof::{ensure_state_matches, AbsenceProofChecker, ProofVerifier};
use crate::report::{AuditWarning, UserAddressAuditResult};
use crate::repository::{KeyTransparencyRepository, PublicAddressRepository};
use crate::skl::{SignedKeyListAuthenticator, SignedKeyListMatcher};
use crate::types::{
    EpochId, ProofPair, SignedKeyList, SklContent, SklInclusion, UserAddress, UserId,
    VerifiedEpochData, VerifiedState,
};

/// Audits one of the user's addresses.
pub struct AddressAuditor {
    kt_repository: Arc<dyn KeyTransparencyRepository>,
    address_repository: Arc<dyn PublicAddressRepository>,
    checkpoints: CheckpointStore,
    resolver: InitialEpochResolver,
    absence: AbsenceProofChecker,
    authenticator: SignedKeyListAuthenticator,
    matcher: SignedKeyListMatcher,
    proofs: ProofVerifier,
    clock: Arc<dyn Clock>,
    config: Arc<KtConfig>,
}

impl AddressAuditor {
    /// Create an auditor.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            kt_repository: Arc::clone(&ctx.kt_repository),
            address_repository: Arc::clone(&ctx.address_repository),
            checkpoints: CheckpointStore::new(ctx),
            resolver: InitialEpochResolver::new(ctx),
            absence: AbsenceProofChecker::new(ctx),
            authenticator: SignedKeyListAuthenticator::new(ctx),
            matcher: SignedKeyListMatcher::new(ctx),
            proofs: ProofVerifier::new(ctx),
            clock: Arc::clone(&ctx.clock),
            config: Arc::clone(&ctx.config),
        }
    }

    /// Audit an address, reporting failures as data.
    #[instrument(skip_all, fields(user_id = %user_id, email = %address.email))]
    pub async fn audit(&self, user_id: &UserId, address: &UserAddress) -> UserAddressAuditResult {
        match self.audit_user_address(user_id, address).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Address audit failed");
                UserAddressAuditResult::Failure(e)
            }
        }
    }

    /// Audit an address.
    pub async fn audit_user_address(
        &self,
        user_id: &UserId,
        address: &UserAddress,
    ) -> Result<UserAddressAuditResult, KtError> {
        if !address.enabled {
            debug!("Address disabled, skipping");
            return Ok(UserAddressAuditResult::Warning(AuditWarning::Disabled));
        }

        let Some(input_skl) = &address.signed_key_list else {
            self.absence.check_absence_proof(user_id, &address.email).await?;
            return Ok(UserAddressAuditResult::Warning(AuditWarning::AddressNotInKt));
        };

        let stored = self.checkpoints.fetch(user_id, &address.address_id).await?;
        let after_epoch = stored.map_or(0, |c| c.epoch_id);
        let new_skls = self
            .address_repository
            .get_skls_after_epoch(user_id, after_epoch, &address.email)
            .await?;
        debug!(after_epoch, new_skls = new_skls.len(), "Fetched SKL history");

        let Some(initial) = self
            .resolver
            .build_initial_epoch(user_id, address, input_skl, stored, &new_skls)
            .await?
        else {
            return Ok(UserAddressAuditResult::Warning(AuditWarning::CreationTooRecent));
        };

        if new_skls.is_empty() {
            self.audit_unchanged(user_id, address, input_skl, stored.as_ref(), initial)
                .await?;
        } else {
            self.audit_new_skls(user_id, address, input_skl, stored.as_ref(), initial, &new_skls)
                .await?;
        }
        Ok(UserAddressAuditResult::Success)
    }

    /// No new versions: confirm the current one is still in the log and move
    /// the checkpoint to the newest epoch holding it.
    async fn audit_unchanged(
        &self,
        user_id: &UserId,
        address: &UserAddress,
        input_skl: &SignedKeyList,
        stored: Option<&VerifiedEpochData>,
        initial: VerifiedEpochData,
    ) -> Result<(), KtError> {
        let epoch_id = input_skl.max_epoch_id.unwrap_or(initial.epoch_id);
        if epoch_id < initial.epoch_id {
            return Err(KtError::RollbackDetected {
                field: "epoch_id",
                current: epoch_id,
                last_seen: initial.epoch_id,
            });
        }

        let (state, proofs) = self.prove_at(user_id, address, input_skl, epoch_id).await?;
        let revision = proofs
            .revision()
            .ok_or_else(|| KtError::verification("proof has no revision"))?;
        if revision < initial.revision {
            return Err(KtError::RollbackDetected {
                field: "revision",
                current: revision,
                last_seen: initial.revision,
            });
        }
        ensure(
            revision == initial.revision,
            "revision changed without a new SKL",
        )?;
        self.ensure_fresh(state, "latest epoch for the address is stale")?;

        if epoch_id > initial.epoch_id {
            let next = VerifiedEpochData::new(epoch_id, revision, initial.skl_creation_time);
            self.checkpoints
                .upload(user_id, &address.address_id, stored, next)
                .await?;
        } else {
            debug!(epoch_id, "Checkpoint already current");
        }
        Ok(())
    }

    /// Walk the new versions in order and advance the checkpoint past them.
    async fn audit_new_skls(
        &self,
        user_id: &UserId,
        address: &UserAddress,
        input_skl: &SignedKeyList,
        stored: Option<&VerifiedEpochData>,
        initial: VerifiedEpochData,
        new_skls: &[SignedKeyList],
    ) -> Result<(), KtError> {
        let now = self.clock.now();
        let (last, earlier) = new_skls
            .split_last()
            .ok_or_else(|| KtError::verification("no new SKLs"))?;
        ensure(
            earlier.iter().all(|skl| skl.max_epoch_id.is_some()),
            "only the newest SKL may be pending inclusion",
        )?;

        let mut checkpoint = initial;
        let mut certified_at = None;

        for (hop, skl) in new_skls.iter().enumerate() {
            let created_at = match &skl.content {
                SklContent::Keys { .. } => {
                    let ts = self.authenticator.verify_for_user_address(address, skl)?;
                    if ts < checkpoint.skl_creation_time {
                        return Err(KtError::TimestampRegression {
                            field: "skl_creation_time",
                            current: ts,
                            last_seen: checkpoint.skl_creation_time,
                        });
                    }
                    Some(ts)
                }
                SklContent::Obsolete => None,
            };

            match skl.inclusion() {
                SklInclusion::Included { max_epoch_id } => {
                    if max_epoch_id < checkpoint.epoch_id {
                        return Err(KtError::RollbackDetected {
                            field: "epoch_id",
                            current: max_epoch_id,
                            last_seen: checkpoint.epoch_id,
                        });
                    }
                    let (state, proofs) = self.prove_at(user_id, address, skl, max_epoch_id).await?;
                    let revision = proofs
                        .revision()
                        .ok_or_else(|| KtError::verification("proof has no revision"))?;
                    check_revision_hop(hop, checkpoint.revision, revision)?;

                    checkpoint = VerifiedEpochData::new(
                        max_epoch_id,
                        revision,
                        created_at.unwrap_or(checkpoint.skl_creation_time),
                    );
                    certified_at = Some(state);
                    debug!(hop, epoch_id = max_epoch_id, revision, "SKL version verified");
                }
                SklInclusion::Pending => {
                    let created_at = created_at
                        .ok_or_else(|| KtError::verification("newest SKL is an unincluded obsolescence marker"))?;
                    ensure(
                        self.config.is_fresh(created_at, now),
                        "newest SKL was not included within the maximum epoch interval",
                    )?;
                }
            }
        }

        ensure(
            last.content == input_skl.content,
            "newest directory SKL differs from the address SKL",
        )?;
        if input_skl.data().is_some() {
            self.matcher
                .check_signed_key_list_match(&address.keys, input_skl)?;
        }

        let Some(state) = certified_at.filter(|_| last.max_epoch_id.is_some()) else {
            debug!("Newest SKL pending inclusion, checkpoint not advanced");
            return Ok(());
        };
        self.ensure_fresh(state, "newest epoch for the address is stale")?;
        self.checkpoints
            .upload(user_id, &address.address_id, stored, checkpoint)
            .await
    }

    async fn prove_at(
        &self,
        user_id: &UserId,
        address: &UserAddress,
        skl: &SignedKeyList,
        epoch_id: EpochId,
    ) -> Result<(VerifiedState, ProofPair), KtError> {
        let epoch = self.kt_repository.get_epoch(user_id, epoch_id).await?;
        let proofs = self
            .kt_repository
            .get_proof(user_id, epoch_id, &address.email)
            .await?;
        let state = self
            .proofs
            .verify_proof_in_epoch(&address.email, Some(skl), &epoch, &proofs)?;
        ensure_state_matches(skl, state)?;
        Ok((state, proofs))
    }

    fn ensure_fresh(&self, state: VerifiedState, reason: &str) -> Result<(), KtError> {
        let not_before = state.not_before().unwrap_or_default();
        ensure(self.config.is_fresh(not_before, self.clock.now()), reason)
    }
}

/// The first hop may repeat the checkpoint revision (the checkpoint was
/// anchored on that version); every later hop must add exactly one.
fn check_revision_hop(hop: usize, previous: u64, revision: u64) -> Result<(), KtError> {
    let contiguous = revision == previous.saturating_add(1) || (hop == 0 && revision == previous);
    if contiguous {
        Ok(())
    } else if revision < previous {
        Err(KtError::RollbackDetected {
            field: "revision",
            current: revision,
            last_seen: previous,
        })
    } else {
        Err(KtError::verification(format!(
            "SKL revision jumped from {previous} to {revision}"
        )))
    }
}
