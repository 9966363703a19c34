//! Self-audit orchestration.
//!
//! The engine audits every owned address and reconciles every recorded
//! contact change, isolating failures per item:
//! 1. Address audits (checkpoint ratchet per address)
//! 2. Change reconciliation (per recorded change)
//! 3. Report aggregation and self-audit bookkeeping
//!
//! ## Security Properties
//!
//! - **Isolation**: one failing address or contact never hides the results
//!   of the others
//! - **Monotonic checkpoints**: every upload goes through the rollback check

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::AddressAuditor;
use crate::clock::Clock;
use crate::config::KtConfig;
use crate::context::KtContext;
use crate::error::KtError;
use crate::recipient::RecipientVerifier;
use crate::reconcile::PendingChangeReconciler;
use crate::report::{
    AddressChangeAuditResult, PublicKeyVerificationResult, SelfAuditReport, SelfAuditResult,
    UserAddressAuditResult,
};
use crate::repository::KeyTransparencyRepository;
use crate::types::{AddressChange, PublicAddress, UserAddress, UserId};

/// The key transparency engine.
///
/// Entry point for self audits and send-time recipient checks.
pub struct KeyTransparencyEngine {
    kt_repository: Arc<dyn KeyTransparencyRepository>,
    auditor: AddressAuditor,
    reconciler: PendingChangeReconciler,
    recipients: RecipientVerifier,
    clock: Arc<dyn Clock>,
    config: Arc<KtConfig>,
}

impl KeyTransparencyEngine {
    /// Create an engine from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns error if the context's configuration is invalid.
    pub fn new(ctx: KtContext) -> Result<Self, KtError> {
        ctx.config.validate()?;
        info!(
            max_epoch_interval = ctx.config.max_epoch_interval_secs(),
            epoch_validity_period = ctx.config.epoch_validity_period_secs(),
            boundary = ?ctx.config.boundary,
            epoch_verification = ?ctx.config.epoch_verification,
            concurrent = ctx.config.concurrent_audits,
            "KeyTransparencyEngine: initialized"
        );
        Ok(Self {
            kt_repository: Arc::clone(&ctx.kt_repository),
            auditor: AddressAuditor::new(&ctx),
            reconciler: PendingChangeReconciler::new(&ctx),
            recipients: RecipientVerifier::new(&ctx),
            clock: Arc::clone(&ctx.clock),
            config: Arc::clone(&ctx.config),
        })
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(ctx: KtContext, config: KtConfig) -> Result<Self, KtError> {
        Self::new(ctx.with_config(config))
    }

    /// The active configuration.
    pub fn config(&self) -> &KtConfig {
        &self.config
    }

    /// Audit every owned address and reconcile every recorded change.
    #[instrument(skip_all, fields(user_id = %user_id, addresses = addresses.len()))]
    pub async fn self_audit(&self, user_id: &UserId, addresses: &[UserAddress]) -> SelfAuditResult {
        let timestamp = self.clock.now();

        let address_results = self.audit_addresses(user_id, addresses).await;

        let changes = match self.kt_repository.get_all_address_changes(user_id).await {
            Ok(changes) => changes,
            Err(e) => {
                error!(error = %e, "Failed to load recorded address changes");
                return SelfAuditResult::Failure(e.into());
            }
        };
        let contact_results = self.reconcile_changes(user_id, &changes).await;

        let report = SelfAuditReport {
            timestamp,
            address_results,
            contact_results,
        };

        if let Err(e) = self
            .kt_repository
            .store_self_audit_timestamp(user_id, timestamp)
            .await
        {
            warn!(error = %e, "Failed to record self audit timestamp");
        }

        info!(
            addresses = report.address_results.len(),
            contacts = report.contact_results.len(),
            failures = report.failure_count(),
            "Self audit complete"
        );
        SelfAuditResult::Success(report)
    }

    /// Whether the last self audit is older than the configured interval.
    pub async fn is_self_audit_due(&self, user_id: &UserId) -> Result<bool, KtError> {
        let Some(last) = self.kt_repository.get_self_audit_timestamp(user_id).await? else {
            return Ok(true);
        };
        let elapsed = self.clock.now().saturating_sub(last);
        Ok(elapsed >= self.config.self_audit_interval_secs())
    }

    /// Check a recipient's keys against the log before use.
    pub async fn verify_public_address(
        &self,
        user_id: &UserId,
        address: &PublicAddress,
    ) -> PublicKeyVerificationResult {
        self.recipients.verify_public_address(user_id, address).await
    }

    async fn audit_addresses(
        &self,
        user_id: &UserId,
        addresses: &[UserAddress],
    ) -> HashMap<String, UserAddressAuditResult> {
        let results = if self.config.concurrent_audits {
            join_all(addresses.iter().map(|a| self.auditor.audit(user_id, a))).await
        } else {
            let mut results = Vec::with_capacity(addresses.len());
            for address in addresses {
                results.push(self.auditor.audit(user_id, address).await);
            }
            results
        };

        addresses
            .iter()
            .map(|a| a.email.clone())
            .zip(results)
            .collect()
    }

    async fn reconcile_changes(
        &self,
        user_id: &UserId,
        changes: &[AddressChange],
    ) -> HashMap<String, AddressChangeAuditResult> {
        let results = if self.config.concurrent_audits {
            join_all(changes.iter().map(|c| self.reconciler.reconcile(user_id, c))).await
        } else {
            let mut results = Vec::with_capacity(changes.len());
            for change in changes {
                results.push(self.reconciler.reconcile(user_id, change).await);
            }
            results
        };

        let mut by_contact = HashMap::new();
        for (change, result) in changes.iter().zip(results) {
            match by_contact.entry(change.email.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(result);
                }
                // A contact fails if any of its changes failed.
                Entry::Occupied(mut slot) => {
                    if result.is_failure() {
                        slot.insert(result);
                    }
                }
            }
        }
        debug!(contacts = by_contact.len(), "Reconciled recorded changes");
        by_contact
    }
}
