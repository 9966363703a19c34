//! Send-time verification of recipient keys and recording of key changes.
//!
//! A recipient whose SKL is already in the log is verified immediately. One
//! whose SKL is still pending is trusted on its signature alone and recorded
//! as an [`AddressChange`], which the reconciler later checks against the log.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::KtConfig;
use crate::context::KtContext;
use crate::error::{ensure, KtError};
use crate::proof::{ensure_state_matches, AbsenceProofChecker, ProofVerifier};
use crate::report::PublicKeyVerificationResult;
use crate::repository::KeyTransparencyRepository;
use crate::skl::{SignedKeyListAuthenticator, SignedKeyListMatcher};
use crate::types::{
    verification_keys, AddressChange, AddressKey, PublicAddress, SignedKeyList, SklContent,
    SklInclusion, UserAddress, UserId, VerifiedState,
};

/// Records observed key changes for later reconciliation.
pub struct AddressChangeStore {
    kt_repository: Arc<dyn KeyTransparencyRepository>,
    authenticator: SignedKeyListAuthenticator,
    clock: Arc<dyn Clock>,
}

impl AddressChangeStore {
    /// Create a change store.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            kt_repository: Arc::clone(&ctx.kt_repository),
            authenticator: SignedKeyListAuthenticator::new(ctx),
            clock: Arc::clone(&ctx.clock),
        }
    }

    /// Record a change to a third party's address.
    ///
    /// A record with the same creation time is not stored twice, and a
    /// record older than one already stored is rejected.
    #[instrument(skip_all, fields(user_id = %user_id, email = %address.email))]
    pub async fn store_public_address_change(
        &self,
        user_id: &UserId,
        address: &PublicAddress,
        skl: &SignedKeyList,
    ) -> Result<(), KtError> {
        self.record(user_id, &address.email, &address.keys, skl, false).await
    }

    /// Record a change to one of the user's own addresses, replacing any
    /// earlier record for it.
    #[instrument(skip_all, fields(user_id = %user_id, email = %address.email))]
    pub async fn store_user_address_change(
        &self,
        user_id: &UserId,
        address: &UserAddress,
        skl: &SignedKeyList,
    ) -> Result<(), KtError> {
        self.record(user_id, &address.email, &address.keys, skl, true).await
    }

    async fn record(
        &self,
        user_id: &UserId,
        email: &str,
        keys: &[AddressKey],
        skl: &SignedKeyList,
        replace_existing: bool,
    ) -> Result<(), KtError> {
        let epoch_id = skl
            .expected_min_epoch_id
            .ok_or_else(|| KtError::verification("SKL has no expected minimum epoch"))?;
        let signers = verification_keys(keys);
        let creation_timestamp = match &skl.content {
            SklContent::Keys { .. } => self.authenticator.verify_with_keys(&signers, skl)?,
            SklContent::Obsolete => self.clock.now(),
        };

        if replace_existing {
            self.kt_repository
                .remove_address_changes_for_address(user_id, email)
                .await?;
        } else {
            let existing = self
                .kt_repository
                .get_address_changes_for_address(user_id, email)
                .await?;
            if let Some(newest) = existing.iter().map(|c| c.creation_timestamp).max() {
                if newest > creation_timestamp {
                    return Err(KtError::TimestampRegression {
                        field: "address_change",
                        current: creation_timestamp,
                        last_seen: newest,
                    });
                }
            }
            if existing.iter().any(|c| c.creation_timestamp == creation_timestamp) {
                debug!(creation_timestamp, "Change already recorded");
                return Ok(());
            }
        }

        let change = AddressChange {
            user_id: user_id.clone(),
            email: email.to_owned(),
            epoch_id,
            creation_timestamp,
            public_keys: signers.into_iter().map(|k| k.key).collect(),
            is_obsolete: skl.is_obsolete(),
        };
        self.kt_repository.store_address_change(&change).await?;
        info!(epoch_id, creation_timestamp, "Address change recorded");
        Ok(())
    }
}

/// Verifies a recipient's keys against the log before use.
pub struct RecipientVerifier {
    kt_repository: Arc<dyn KeyTransparencyRepository>,
    absence: AbsenceProofChecker,
    authenticator: SignedKeyListAuthenticator,
    matcher: SignedKeyListMatcher,
    proofs: ProofVerifier,
    changes: AddressChangeStore,
    clock: Arc<dyn Clock>,
    config: Arc<KtConfig>,
}

impl RecipientVerifier {
    /// Create a recipient verifier.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            kt_repository: Arc::clone(&ctx.kt_repository),
            absence: AbsenceProofChecker::new(ctx),
            authenticator: SignedKeyListAuthenticator::new(ctx),
            matcher: SignedKeyListMatcher::new(ctx),
            proofs: ProofVerifier::new(ctx),
            changes: AddressChangeStore::new(ctx),
            clock: Arc::clone(&ctx.clock),
            config: Arc::clone(&ctx.config),
        }
    }

    /// Verify a recipient, reporting failures as data.
    #[instrument(skip_all, fields(user_id = %user_id, email = %address.email))]
    pub async fn verify_public_address(
        &self,
        user_id: &UserId,
        address: &PublicAddress,
    ) -> PublicKeyVerificationResult {
        match self.verify(user_id, address).await {
            Ok(state) => PublicKeyVerificationResult::Success(state),
            Err(e) => {
                warn!(error = %e, "Recipient verification failed");
                PublicKeyVerificationResult::Failure(e)
            }
        }
    }

    async fn verify(&self, user_id: &UserId, address: &PublicAddress) -> Result<VerifiedState, KtError> {
        if address.ignore_kt {
            debug!("Recipient opted out of key transparency");
            return Ok(VerifiedState::Absent(self.clock.now()));
        }

        let Some(skl) = &address.signed_key_list else {
            return self.absence.check_absence_proof(user_id, &address.email).await;
        };

        match skl.inclusion() {
            SklInclusion::Pending => {
                self.changes
                    .store_public_address_change(user_id, address, skl)
                    .await?;
                Ok(VerifiedState::NotYetIncluded)
            }
            SklInclusion::Included { max_epoch_id } => {
                if skl.data().is_some() {
                    self.authenticator.verify_for_public_address(address, skl)?;
                    self.matcher
                        .check_signed_key_list_match(&address.keys, skl)?;
                }

                let epoch = self.kt_repository.get_epoch(user_id, max_epoch_id).await?;
                let proofs = self
                    .kt_repository
                    .get_proof(user_id, max_epoch_id, &address.email)
                    .await?;
                let state = self
                    .proofs
                    .verify_proof_in_epoch(&address.email, Some(skl), &epoch, &proofs)?;
                ensure_state_matches(skl, state)?;

                let not_before = state.not_before().unwrap_or_default();
                ensure(
                    self.config.is_fresh(not_before, self.clock.now()),
                    "recipient's latest epoch is older than the maximum epoch interval",
                )?;
                Ok(state)
            }
        }
    }
}
