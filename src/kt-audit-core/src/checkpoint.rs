//! Self-signed verified-epoch checkpoints.
//!
//! The checkpoint for each address is stored by the directory but signed by
//! the user, so the directory can withhold it but not forge or rewind it.
//!
//! ## Security Properties
//!
//! - **Anti-rollback**: an upload never moves epoch, revision or SKL
//!   creation time backward relative to the stored checkpoint
//! - **Fail-safe fetch**: a checkpoint that fails verification is discarded
//!   and the address is re-bootstrapped from the log

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::context::KtContext;
use crate::crypto::KtCrypto;
use crate::error::KtError;
use crate::repository::{KeyTransparencyRepository, UserRepository};
use crate::types::{AddressId, UserId, VerifiedEpoch, VerifiedEpochData};

/// Loads and stores signed checkpoints.
pub struct CheckpointStore {
    kt_repository: Arc<dyn KeyTransparencyRepository>,
    user_repository: Arc<dyn UserRepository>,
    crypto: Arc<dyn KtCrypto>,
}

impl CheckpointStore {
    /// Create a checkpoint store.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            kt_repository: Arc::clone(&ctx.kt_repository),
            user_repository: Arc::clone(&ctx.user_repository),
            crypto: Arc::clone(&ctx.crypto),
        }
    }

    /// Fetch and verify the checkpoint for an address.
    #[instrument(skip(self, user_id, address_id), fields(user_id = %user_id, address_id = %address_id))]
    pub async fn fetch(&self, user_id: &UserId, address_id: &AddressId) -> Result<Option<VerifiedEpochData>, KtError> {
        let Some(stored) = self.kt_repository.get_verified_epoch(user_id, address_id).await? else {
            return Ok(None);
        };

        let keys: Vec<String> = self
            .user_repository
            .get_verification_keys(user_id)
            .await?
            .into_iter()
            .filter(|k| k.is_verification_key())
            .map(|k| k.key)
            .collect();

        if let Err(e) = self.crypto.verify_detached(&keys, &stored.data, &stored.signature) {
            warn!(error = %e, "Discarding checkpoint with invalid signature");
            return Ok(None);
        }

        match serde_json::from_str::<VerifiedEpochData>(&stored.data) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                warn!(error = %e, "Discarding unparseable checkpoint");
                Ok(None)
            }
        }
    }

    /// Sign and upload `next`, refusing to regress `previous`.
    #[instrument(
        skip(self, user_id, address_id, previous),
        fields(user_id = %user_id, address_id = %address_id, epoch_id = next.epoch_id, revision = next.revision)
    )]
    pub async fn upload(
        &self,
        user_id: &UserId,
        address_id: &AddressId,
        previous: Option<&VerifiedEpochData>,
        next: VerifiedEpochData,
    ) -> Result<(), KtError> {
        if let Some(previous) = previous {
            ensure_monotonic(previous, &next)?;
        }

        let data = serde_json::to_string(&next)?;
        let signature = self.user_repository.sign_with_primary_key(user_id, &data).await?;
        self.kt_repository
            .upload_verified_epoch(user_id, address_id, VerifiedEpoch { data, signature })
            .await?;

        info!("Verified epoch uploaded");
        Ok(())
    }
}

/// Fail if `next` moves any checkpoint component backward.
pub fn ensure_monotonic(previous: &VerifiedEpochData, next: &VerifiedEpochData) -> Result<(), KtError> {
    let violation = if next.epoch_id < previous.epoch_id {
        Some(KtError::RollbackDetected {
            field: "epoch_id",
            current: next.epoch_id,
            last_seen: previous.epoch_id,
        })
    } else if next.revision < previous.revision {
        Some(KtError::RollbackDetected {
            field: "revision",
            current: next.revision,
            last_seen: previous.revision,
        })
    } else if next.skl_creation_time < previous.skl_creation_time {
        Some(KtError::TimestampRegression {
            field: "skl_creation_time",
            current: next.skl_creation_time,
            last_seen: previous.skl_creation_time,
        })
    } else {
        None
    };

    match violation {
        Some(e) => {
            error!(error = %e, "SECURITY ALERT: checkpoint regression");
            Err(e)
        }
        None => Ok(()),
    }
}
