//! Reconciliation of recorded key changes with the log.
//!
//! A change recorded at send time promised that the directory would include
//! the new SKL by a given epoch. Once that epoch exists the promise is checked
//! and the record removed; a record the directory never honours either ages
//! out silently or fails the audit, depending on how old it is.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::config::KtConfig;
use crate::context::KtContext;
use crate::error::{ensure, KtError};
use crate::proof::{ensure_state_matches, obsolescence_token_timestamp, ProofVerifier};
use crate::report::AddressChangeAuditResult;
use crate::repository::{KeyTransparencyRepository, PublicAddressRepository};
use crate::skl::SignedKeyListAuthenticator;
use crate::types::{verification_keys, AddressChange, ProofPair, PublicKey, UserId};

/// Checks recorded changes against the log.
pub struct PendingChangeReconciler {
    kt_repository: Arc<dyn KeyTransparencyRepository>,
    address_repository: Arc<dyn PublicAddressRepository>,
    authenticator: SignedKeyListAuthenticator,
    proofs: ProofVerifier,
    clock: Arc<dyn Clock>,
    config: Arc<KtConfig>,
}

impl PendingChangeReconciler {
    /// Create a reconciler.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            kt_repository: Arc::clone(&ctx.kt_repository),
            address_repository: Arc::clone(&ctx.address_repository),
            authenticator: SignedKeyListAuthenticator::new(ctx),
            proofs: ProofVerifier::new(ctx),
            clock: Arc::clone(&ctx.clock),
            config: Arc::clone(&ctx.config),
        }
    }

    /// Reconcile one change, reporting failures as data.
    pub async fn reconcile(&self, user_id: &UserId, change: &AddressChange) -> AddressChangeAuditResult {
        match self.verify_address_change_was_included(user_id, change).await {
            Ok(()) => AddressChangeAuditResult::Success,
            Err(e) => {
                warn!(email = %change.email, error = %e, "Address change reconciliation failed");
                AddressChangeAuditResult::Failure(e)
            }
        }
    }

    /// Confirm the log includes the recorded change, removing the record
    /// once it is confirmed or has expired.
    #[instrument(skip_all, fields(user_id = %user_id, email = %change.email, epoch_id = change.epoch_id))]
    pub async fn verify_address_change_was_included(
        &self,
        user_id: &UserId,
        change: &AddressChange,
    ) -> Result<(), KtError> {
        let now = self.clock.now();
        let skl = match self
            .address_repository
            .get_skl_at_epoch(user_id, change.epoch_id, &change.email)
            .await
        {
            Ok(skl) => skl,
            Err(e) if e.is_not_found() => return self.handle_missing(change, now).await,
            Err(e) => return Err(e.into()),
        };

        let max_interval = self.config.max_epoch_interval_secs();
        let creation = change.creation_timestamp;

        let skl_timestamp = if skl.data().is_some() {
            let keys = self.key_ring(user_id, change).await;
            let ts = self.authenticator.verify_with_keys(&keys, &skl).map_err(|e| {
                error!(error = %e, "SECURITY ALERT: recorded SKL cannot be authenticated");
                KtError::unverifiable_skl(e.to_string())
            })?;
            ensure(
                self.config.at_or_after(ts, creation)
                    && self.config.at_or_before(ts, creation.saturating_add(max_interval)),
                "SKL signature time outside the recorded change window",
            )?;
            Some(ts)
        } else {
            None
        };

        let min_epoch_id = skl
            .min_epoch_id
            .ok_or_else(|| KtError::verification("SKL at recorded epoch was never included"))?;
        ensure(
            min_epoch_id <= change.epoch_id,
            "SKL first included after the promised epoch",
        )?;

        let epoch = self.kt_repository.get_epoch(user_id, min_epoch_id).await?;
        let proofs = self
            .kt_repository
            .get_proof(user_id, min_epoch_id, &change.email)
            .await?;
        let state = self
            .proofs
            .verify_proof_in_epoch(&change.email, Some(&skl), &epoch, &proofs)?;
        ensure_state_matches(&skl, state)?;
        let not_before = state.not_before().unwrap_or_default();
        ensure(
            self.config.at_or_before(not_before, creation.saturating_add(max_interval)),
            "change was included later than the maximum epoch interval",
        )?;

        if change.is_obsolete {
            self.verify_obsolescence_inclusion(&proofs, creation, skl_timestamp)?;
        }

        self.kt_repository.remove_address_change(change).await?;
        info!(min_epoch_id, "Address change confirmed by the log");
        Ok(())
    }

    async fn handle_missing(&self, change: &AddressChange, now: i64) -> Result<(), KtError> {
        let expiry = now.saturating_sub(self.config.epoch_validity_period_secs());
        if !self.config.at_or_after(change.creation_timestamp, expiry) {
            self.kt_repository.remove_address_change(change).await?;
            debug!("Expired address change removed");
            return Ok(());
        }
        if self.config.is_fresh(change.creation_timestamp, now) {
            debug!("Address change not included yet");
            return Ok(());
        }
        Err(KtError::verification(
            "directory has no SKL for a change it should have included",
        ))
    }

    /// Keys recorded with the change plus the address's current keys.
    async fn key_ring(&self, user_id: &UserId, change: &AddressChange) -> Vec<PublicKey> {
        let mut keys: Vec<PublicKey> = change
            .public_keys
            .iter()
            .map(|key| PublicKey::active(key.clone(), false))
            .collect();
        match self
            .address_repository
            .get_public_address(user_id, &change.email)
            .await
        {
            Ok(address) => {
                for key in verification_keys(&address.keys) {
                    if !keys.iter().any(|k| k.key == key.key) {
                        keys.push(key);
                    }
                }
            }
            Err(e) => debug!(error = %e, "Current address keys unavailable"),
        }
        keys
    }

    fn verify_obsolescence_inclusion(
        &self,
        proofs: &ProofPair,
        creation: i64,
        skl_timestamp: Option<i64>,
    ) -> Result<(), KtError> {
        let token = proofs
            .effective()
            .obsolescence_token
            .as_deref()
            .ok_or_else(|| KtError::verification("obsolescence record without token"))?;
        let token_timestamp = obsolescence_token_timestamp(token)?;
        let max_interval = self.config.max_epoch_interval_secs();

        ensure(
            self.config
                .at_or_after(token_timestamp, creation.saturating_sub(max_interval)),
            "obsolescence token is older than the recorded change",
        )?;
        ensure(
            self.config
                .at_or_before(token_timestamp, creation.saturating_add(max_interval)),
            "obsolescence token is newer than the recorded change",
        )?;
        if let Some(skl_timestamp) = skl_timestamp {
            ensure(
                self.config.at_or_after(token_timestamp, skl_timestamp),
                "obsolescence token predates the SKL",
            )?;
        }
        Ok(())
    }
}
