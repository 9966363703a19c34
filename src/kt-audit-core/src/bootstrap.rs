//! Establishing the first trusted checkpoint of an address.
//!
//! An address without a usable checkpoint is anchored at the first epoch its
//! oldest known SKL was included in. An existing checkpoint is kept as long
//! as the next SKL continues its revision chain; a gap means the directory
//! served versions the client never saw, and the address is re-anchored.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::config::KtConfig;
use crate::context::KtContext;
use crate::error::{ensure, KtError};
use crate::proof::{ensure_state_matches, ProofVerifier};
use crate::repository::KeyTransparencyRepository;
use crate::skl::SignedKeyListAuthenticator;
use crate::types::{SignedKeyList, UserAddress, UserId, VerifiedEpochData};

/// Anchors an address with no checkpoint.
pub struct EpochChainBootstrapper {
    kt_repository: Arc<dyn KeyTransparencyRepository>,
    authenticator: SignedKeyListAuthenticator,
    proofs: ProofVerifier,
    clock: Arc<dyn Clock>,
    config: Arc<KtConfig>,
}

impl EpochChainBootstrapper {
    /// Create a bootstrapper.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            kt_repository: Arc::clone(&ctx.kt_repository),
            authenticator: SignedKeyListAuthenticator::new(ctx),
            proofs: ProofVerifier::new(ctx),
            clock: Arc::clone(&ctx.clock),
            config: Arc::clone(&ctx.config),
        }
    }

    /// Derive an initial checkpoint from the address's SKL history.
    ///
    /// Returns `None` when the oldest SKL is still waiting for inclusion.
    #[instrument(skip_all, fields(user_id = %user_id, email = %address.email))]
    pub async fn bootstrap_initial_epoch(
        &self,
        user_id: &UserId,
        address: &UserAddress,
        input_skl: &SignedKeyList,
        historical_skls: &[SignedKeyList],
    ) -> Result<Option<VerifiedEpochData>, KtError> {
        let oldest = historical_skls
            .first()
            .ok_or_else(|| KtError::verification("no SKL history to bootstrap from"))?;
        let now = self.clock.now();

        let Some(min_epoch_id) = oldest.min_epoch_id else {
            ensure(
                oldest.content == input_skl.content,
                "pending SKL differs from the address SKL",
            )?;
            let created_at = self.authenticator.verify_for_user_address(address, input_skl)?;
            ensure(
                self.config.is_fresh(created_at, now),
                "SKL was never included within the maximum epoch interval",
            )?;
            debug!(created_at, "SKL not included yet, no checkpoint");
            return Ok(None);
        };

        let epoch = self.kt_repository.get_epoch(user_id, min_epoch_id).await?;
        let proofs = self
            .kt_repository
            .get_proof(user_id, min_epoch_id, &address.email)
            .await?;
        let state = self
            .proofs
            .verify_proof_in_epoch(&address.email, Some(oldest), &epoch, &proofs)?;
        ensure_state_matches(oldest, state)?;
        let revision = proofs
            .revision()
            .ok_or_else(|| KtError::verification("bootstrap proof has no revision"))?;

        // Revision 0 is a freshly created address; its first epoch may be old.
        if revision != 0 {
            let not_before = state.not_before().unwrap_or_default();
            let floor = now
                .saturating_sub(self.config.epoch_validity_period_secs())
                .saturating_sub(self.config.max_epoch_interval_secs());
            ensure(
                self.config.at_or_after(not_before, floor),
                "bootstrap epoch is older than the epoch validity period",
            )?;
        }

        info!(epoch_id = min_epoch_id, revision, "Bootstrapped checkpoint");
        Ok(Some(VerifiedEpochData::new(min_epoch_id, revision, 0)))
    }
}

/// Decides whether an existing checkpoint still anchors the SKL chain.
pub struct InitialEpochResolver {
    kt_repository: Arc<dyn KeyTransparencyRepository>,
    proofs: ProofVerifier,
    bootstrapper: EpochChainBootstrapper,
}

impl InitialEpochResolver {
    /// Create a resolver.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            kt_repository: Arc::clone(&ctx.kt_repository),
            proofs: ProofVerifier::new(ctx),
            bootstrapper: EpochChainBootstrapper::new(ctx),
        }
    }

    /// Checkpoint the audit should start from.
    ///
    /// Returns `None` when the address is too new to have one.
    #[instrument(skip_all, fields(user_id = %user_id, email = %address.email))]
    pub async fn build_initial_epoch(
        &self,
        user_id: &UserId,
        address: &UserAddress,
        input_skl: &SignedKeyList,
        existing: Option<VerifiedEpochData>,
        new_skls: &[SignedKeyList],
    ) -> Result<Option<VerifiedEpochData>, KtError> {
        let Some(existing) = existing else {
            return self
                .bootstrapper
                .bootstrap_initial_epoch(user_id, address, input_skl, new_skls)
                .await;
        };
        let Some((first, min_epoch_id)) = new_skls
            .first()
            .and_then(|skl| skl.min_epoch_id.map(|id| (skl, id)))
        else {
            return Ok(Some(existing));
        };

        let epoch = self.kt_repository.get_epoch(user_id, min_epoch_id).await?;
        let proofs = self
            .kt_repository
            .get_proof(user_id, min_epoch_id, &address.email)
            .await?;
        let state = self
            .proofs
            .verify_proof_in_epoch(&address.email, Some(first), &epoch, &proofs)?;
        ensure_state_matches(first, state)?;
        let revision = proofs
            .revision()
            .ok_or_else(|| KtError::verification("proof for new SKL has no revision"))?;

        if revision == existing.revision || revision == existing.revision.saturating_add(1) {
            Ok(Some(existing))
        } else if revision < existing.revision {
            error!(
                revision,
                checkpoint_revision = existing.revision,
                "SECURITY ALERT: directory revision behind checkpoint"
            );
            Err(KtError::RollbackDetected {
                field: "revision",
                current: revision,
                last_seen: existing.revision,
            })
        } else {
            warn!(
                revision,
                checkpoint_revision = existing.revision,
                "Revision gap after checkpoint, re-bootstrapping"
            );
            self.bootstrapper
                .bootstrap_initial_epoch(user_id, address, input_skl, new_skls)
                .await
        }
    }
}
