//! Collaborator interfaces for directory access, local storage and user keys.
//!
//! Transport and persistence are supplied by the embedding application.
//! Every call is a single request; the engine never retries.

use async_trait::async_trait;

use crate::error::{KtError, RepositoryError};
use crate::types::{
    AddressChange, AddressId, Epoch, EpochId, ProofPair, PublicAddress, PublicKey,
    SignedKeyList, UserId, VerifiedEpoch,
};

/// Access to the transparency log and to locally stored audit state.
#[async_trait]
pub trait KeyTransparencyRepository: Send + Sync {
    /// Fetch an epoch by id.
    async fn get_epoch(&self, user_id: &UserId, epoch_id: EpochId) -> Result<Epoch, RepositoryError>;

    /// Fetch the most recent epoch.
    async fn get_last_epoch(&self, user_id: &UserId) -> Result<Epoch, RepositoryError>;

    /// Fetch the proof for `email` at `epoch_id`.
    ///
    /// `email` is passed as given; the directory canonicalizes it.
    async fn get_proof(
        &self,
        user_id: &UserId,
        epoch_id: EpochId,
        email: &str,
    ) -> Result<ProofPair, RepositoryError>;

    /// Fetch the signed checkpoint for one of the user's addresses.
    async fn get_verified_epoch(
        &self,
        user_id: &UserId,
        address_id: &AddressId,
    ) -> Result<Option<VerifiedEpoch>, RepositoryError>;

    /// Replace the signed checkpoint for one of the user's addresses.
    async fn upload_verified_epoch(
        &self,
        user_id: &UserId,
        address_id: &AddressId,
        verified_epoch: VerifiedEpoch,
    ) -> Result<(), RepositoryError>;

    /// All locally recorded changes for the user.
    async fn get_all_address_changes(&self, user_id: &UserId) -> Result<Vec<AddressChange>, RepositoryError>;

    /// Locally recorded changes for one address.
    async fn get_address_changes_for_address(
        &self,
        user_id: &UserId,
        email: &str,
    ) -> Result<Vec<AddressChange>, RepositoryError>;

    /// Record a change.
    async fn store_address_change(&self, change: &AddressChange) -> Result<(), RepositoryError>;

    /// Delete one recorded change.
    async fn remove_address_change(&self, change: &AddressChange) -> Result<(), RepositoryError>;

    /// Delete every recorded change for one address.
    async fn remove_address_changes_for_address(
        &self,
        user_id: &UserId,
        email: &str,
    ) -> Result<(), RepositoryError>;

    /// Time of the last completed self audit.
    async fn get_self_audit_timestamp(&self, user_id: &UserId) -> Result<Option<i64>, RepositoryError>;

    /// Record the time of a completed self audit.
    async fn store_self_audit_timestamp(&self, user_id: &UserId, timestamp: i64) -> Result<(), RepositoryError>;
}

/// Access to directory entries of addresses.
#[async_trait]
pub trait PublicAddressRepository: Send + Sync {
    /// The SKL that was the entry for `email` at `epoch_id`.
    ///
    /// Returns [`RepositoryError::NotFound`] when the directory has none.
    async fn get_skl_at_epoch(
        &self,
        user_id: &UserId,
        epoch_id: EpochId,
        email: &str,
    ) -> Result<SignedKeyList, RepositoryError>;

    /// SKLs for `email` first included after `epoch_id`, oldest first.
    async fn get_skls_after_epoch(
        &self,
        user_id: &UserId,
        epoch_id: EpochId,
        email: &str,
    ) -> Result<Vec<SignedKeyList>, RepositoryError>;

    /// Current directory view of `email`.
    async fn get_public_address(&self, user_id: &UserId, email: &str) -> Result<PublicAddress, RepositoryError>;
}

/// The user's own account keys, used for self-signed checkpoints.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Sign `data` with the user's primary key, returning a detached signature.
    async fn sign_with_primary_key(&self, user_id: &UserId, data: &str) -> Result<String, KtError>;

    /// The user's keys able to verify checkpoint signatures.
    async fn get_verification_keys(&self, user_id: &UserId) -> Result<Vec<PublicKey>, KtError>;
}
