//! In-memory collaborators and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use kt_audit_core::crypto::{KtCrypto, MerkleLeaf};
use kt_audit_core::skl::SklKeyEntry;
use kt_audit_core::{
    AddressChange, AddressId, AddressKey, Clock, Epoch, EpochCertificate, EpochId, FixedClock,
    KeyTransparencyRepository, KtContext, KtError, Proof, ProofPair, ProofType, PublicAddress,
    PublicAddressRepository, PublicKey, RepositoryError, SignedKeyList, UserAddress, UserId,
    UserRepository, VerifiedEpoch, VerifiedEpochData,
};

pub const NOW: i64 = 1_700_000_000;
pub const HOUR: i64 = 60 * 60;
pub const DAY: i64 = 24 * HOUR;
pub const MAX_EPOCH_INTERVAL: i64 = 72 * HOUR;

pub const USER_KEY: &str = "user-key";

// =============================================================================
// Crypto
// =============================================================================

/// Signatures are `sig:<created_at>`; anything else is forged.
///
/// Merkle proofs hold unless the root is `invalid`, certificates hold unless
/// signed `forged`.
pub struct ScriptedCrypto;

impl KtCrypto for ScriptedCrypto {
    fn verify_detached(&self, public_keys: &[String], _data: &str, signature: &str) -> Result<i64, KtError> {
        if public_keys.is_empty() {
            return Err(KtError::verification("empty key ring"));
        }
        signature
            .strip_prefix("sig:")
            .and_then(|ts| ts.parse().ok())
            .ok_or_else(|| KtError::verification("forged signature"))
    }

    fn fingerprint(&self, public_key: &str) -> Result<String, KtError> {
        Ok(format!("fp-{public_key}"))
    }

    fn sha256_fingerprints(&self, public_key: &str) -> Result<Vec<String>, KtError> {
        Ok(vec![format!("sha-{public_key}")])
    }

    fn verify_merkle_proof(&self, _leaf: &MerkleLeaf<'_>, _proof: &Proof, root_hash: &str) -> Result<(), KtError> {
        if root_hash == "invalid" {
            return Err(KtError::verification("bad root"));
        }
        Ok(())
    }

    fn verify_epoch_certificate(&self, epoch: &Epoch) -> Result<i64, KtError> {
        if epoch.certificate.signature == "forged" {
            return Err(KtError::verification("bad certificate"));
        }
        Ok(epoch.certificate.issued_at)
    }
}

// =============================================================================
// Repositories
// =============================================================================

#[derive(Default)]
pub struct KtState {
    pub epochs: HashMap<EpochId, Epoch>,
    pub last_epoch: Option<EpochId>,
    pub proofs: HashMap<(EpochId, String), ProofPair>,
    pub verified: HashMap<AddressId, VerifiedEpoch>,
    pub uploads: Vec<(AddressId, VerifiedEpochData)>,
    pub changes: Vec<AddressChange>,
    pub self_audit: Option<i64>,
}

#[derive(Default)]
pub struct MemoryKtRepository {
    pub state: Mutex<KtState>,
    pub calls: AtomicUsize,
    pub fail_changes: AtomicBool,
    pub fail_self_audit: AtomicBool,
}

impl MemoryKtRepository {
    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_epoch(&self, epoch: Epoch) {
        let mut state = self.state.lock().unwrap();
        if state.last_epoch.map_or(true, |last| last < epoch.epoch_id) {
            state.last_epoch = Some(epoch.epoch_id);
        }
        state.epochs.insert(epoch.epoch_id, epoch);
    }

    pub fn add_proof(&self, epoch_id: EpochId, email: &str, proof: ProofPair) {
        self.state
            .lock()
            .unwrap()
            .proofs
            .insert((epoch_id, email.to_owned()), proof);
    }

    /// Store a checkpoint signed by the user's key.
    pub fn set_checkpoint(&self, address_id: &str, data: VerifiedEpochData) {
        let verified = VerifiedEpoch {
            data: serde_json::to_string(&data).unwrap(),
            signature: format!("sig:{NOW}"),
        };
        self.state
            .lock()
            .unwrap()
            .verified
            .insert(AddressId::from(address_id), verified);
    }

    pub fn uploads(&self) -> Vec<(AddressId, VerifiedEpochData)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn changes(&self) -> Vec<AddressChange> {
        self.state.lock().unwrap().changes.clone()
    }

    pub fn add_change(&self, change: AddressChange) {
        self.state.lock().unwrap().changes.push(change);
    }

    pub fn self_audit(&self) -> Option<i64> {
        self.state.lock().unwrap().self_audit
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyTransparencyRepository for MemoryKtRepository {
    async fn get_epoch(&self, _user_id: &UserId, epoch_id: EpochId) -> Result<Epoch, RepositoryError> {
        self.touch();
        self.state
            .lock()
            .unwrap()
            .epochs
            .get(&epoch_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("epoch {epoch_id}")))
    }

    async fn get_last_epoch(&self, _user_id: &UserId) -> Result<Epoch, RepositoryError> {
        self.touch();
        let state = self.state.lock().unwrap();
        state
            .last_epoch
            .and_then(|id| state.epochs.get(&id).cloned())
            .ok_or_else(|| RepositoryError::not_found("no epochs"))
    }

    async fn get_proof(&self, _user_id: &UserId, epoch_id: EpochId, email: &str) -> Result<ProofPair, RepositoryError> {
        self.touch();
        self.state
            .lock()
            .unwrap()
            .proofs
            .get(&(epoch_id, email.to_owned()))
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("proof for {email} at {epoch_id}")))
    }

    async fn get_verified_epoch(
        &self,
        _user_id: &UserId,
        address_id: &AddressId,
    ) -> Result<Option<VerifiedEpoch>, RepositoryError> {
        self.touch();
        Ok(self.state.lock().unwrap().verified.get(address_id).cloned())
    }

    async fn upload_verified_epoch(
        &self,
        _user_id: &UserId,
        address_id: &AddressId,
        verified_epoch: VerifiedEpoch,
    ) -> Result<(), RepositoryError> {
        self.touch();
        let data: VerifiedEpochData = serde_json::from_str(&verified_epoch.data)
            .map_err(|e| RepositoryError::storage(e.to_string()))?;
        let mut state = self.state.lock().unwrap();
        state.uploads.push((address_id.clone(), data));
        state.verified.insert(address_id.clone(), verified_epoch);
        Ok(())
    }

    async fn get_all_address_changes(&self, _user_id: &UserId) -> Result<Vec<AddressChange>, RepositoryError> {
        self.touch();
        if self.fail_changes.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("change store unavailable"));
        }
        Ok(self.changes())
    }

    async fn get_address_changes_for_address(
        &self,
        _user_id: &UserId,
        email: &str,
    ) -> Result<Vec<AddressChange>, RepositoryError> {
        self.touch();
        Ok(self
            .changes()
            .into_iter()
            .filter(|c| c.email == email)
            .collect())
    }

    async fn store_address_change(&self, change: &AddressChange) -> Result<(), RepositoryError> {
        self.touch();
        self.add_change(change.clone());
        Ok(())
    }

    async fn remove_address_change(&self, change: &AddressChange) -> Result<(), RepositoryError> {
        self.touch();
        self.state.lock().unwrap().changes.retain(|c| c != change);
        Ok(())
    }

    async fn remove_address_changes_for_address(&self, _user_id: &UserId, email: &str) -> Result<(), RepositoryError> {
        self.touch();
        self.state.lock().unwrap().changes.retain(|c| c.email != email);
        Ok(())
    }

    async fn get_self_audit_timestamp(&self, _user_id: &UserId) -> Result<Option<i64>, RepositoryError> {
        self.touch();
        Ok(self.self_audit())
    }

    async fn store_self_audit_timestamp(&self, _user_id: &UserId, timestamp: i64) -> Result<(), RepositoryError> {
        self.touch();
        if self.fail_self_audit.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("bookkeeping unavailable"));
        }
        self.state.lock().unwrap().self_audit = Some(timestamp);
        Ok(())
    }
}

#[derive(Default)]
pub struct AddressState {
    pub history: HashMap<String, Vec<SignedKeyList>>,
    pub skl_at: HashMap<(String, EpochId), SignedKeyList>,
    pub public: HashMap<String, PublicAddress>,
}

#[derive(Default)]
pub struct MemoryAddressRepository {
    pub state: Mutex<AddressState>,
    pub calls: AtomicUsize,
}

impl MemoryAddressRepository {
    /// Append a version to the directory history of `email`.
    pub fn push_skl(&self, email: &str, skl: SignedKeyList) {
        self.state
            .lock()
            .unwrap()
            .history
            .entry(email.to_owned())
            .or_default()
            .push(skl);
    }

    pub fn set_history(&self, email: &str, skls: Vec<SignedKeyList>) {
        self.state.lock().unwrap().history.insert(email.to_owned(), skls);
    }

    pub fn set_skl_at(&self, email: &str, epoch_id: EpochId, skl: SignedKeyList) {
        self.state
            .lock()
            .unwrap()
            .skl_at
            .insert((email.to_owned(), epoch_id), skl);
    }

    pub fn set_public(&self, address: PublicAddress) {
        self.state
            .lock()
            .unwrap()
            .public
            .insert(address.email.clone(), address);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublicAddressRepository for MemoryAddressRepository {
    async fn get_skl_at_epoch(
        &self,
        _user_id: &UserId,
        epoch_id: EpochId,
        email: &str,
    ) -> Result<SignedKeyList, RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .skl_at
            .get(&(email.to_owned(), epoch_id))
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("no SKL at epoch"))
    }

    async fn get_skls_after_epoch(
        &self,
        _user_id: &UserId,
        epoch_id: EpochId,
        email: &str,
    ) -> Result<Vec<SignedKeyList>, RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .lock()
            .unwrap()
            .history
            .get(email)
            .map(|skls| {
                skls.iter()
                    .filter(|skl| skl.min_epoch_id.map_or(true, |min| min > epoch_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_public_address(&self, _user_id: &UserId, email: &str) -> Result<PublicAddress, RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .public
            .get(email)
            .cloned()
            .ok_or_else(|| RepositoryError::Api {
                code: 404,
                message: "unknown address".into(),
            })
    }
}

/// Signs as `sig:<now>` with a single verification key.
pub struct MemoryUserRepository {
    pub clock: Arc<FixedClock>,
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn sign_with_primary_key(&self, _user_id: &UserId, _data: &str) -> Result<String, KtError> {
        Ok(format!("sig:{}", self.clock.now()))
    }

    async fn get_verification_keys(&self, _user_id: &UserId) -> Result<Vec<PublicKey>, KtError> {
        Ok(vec![PublicKey::active(USER_KEY, true)])
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub kt: Arc<MemoryKtRepository>,
    pub addresses: Arc<MemoryAddressRepository>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            kt: Arc::new(MemoryKtRepository::default()),
            addresses: Arc::new(MemoryAddressRepository::default()),
            clock: Arc::new(FixedClock::new(NOW)),
        }
    }

    pub fn context(&self) -> KtContext {
        let user = Arc::new(MemoryUserRepository {
            clock: Arc::clone(&self.clock),
        });
        KtContext::new(
            self.kt.clone(),
            self.addresses.clone(),
            user,
            Arc::new(ScriptedCrypto),
        )
        .with_clock(self.clock.clone())
    }

    /// Publish a certified epoch.
    pub fn epoch(&self, epoch_id: EpochId, issued_at: i64) {
        self.kt.add_epoch(epoch(epoch_id, issued_at));
    }

    pub fn proof(&self, epoch_id: EpochId, email: &str, proof: ProofPair) {
        self.kt.add_proof(epoch_id, email, proof);
    }

    pub fn user() -> UserId {
        UserId::from("user-1")
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn epoch(epoch_id: EpochId, issued_at: i64) -> Epoch {
    Epoch {
        epoch_id,
        tree_hash: format!("root-{epoch_id}"),
        certificate: EpochCertificate {
            chain_hash: format!("chain-{epoch_id}"),
            previous_chain_hash: format!("chain-{}", epoch_id.saturating_sub(1)),
            issued_at,
            signature: "cert".into(),
        },
    }
}

pub fn existence(revision: u64) -> ProofPair {
    ProofPair {
        proof: Proof {
            proof_type: ProofType::Existence,
            revision: Some(revision),
            obsolescence_token: None,
            neighbors: Vec::new(),
        },
        catch_all_proof: None,
    }
}

pub fn absence() -> ProofPair {
    ProofPair {
        proof: Proof {
            proof_type: ProofType::Absence,
            revision: None,
            obsolescence_token: None,
            neighbors: Vec::new(),
        },
        catch_all_proof: None,
    }
}

pub fn obsolescence(revision: u64, token_timestamp: i64) -> ProofPair {
    ProofPair {
        proof: Proof {
            proof_type: ProofType::Obsolescence,
            revision: Some(revision),
            obsolescence_token: Some(token(token_timestamp)),
            neighbors: Vec::new(),
        },
        catch_all_proof: None,
    }
}

/// `proof` for the address with `catch_all` for its domain.
pub fn with_catch_all(proof: ProofPair, catch_all: ProofPair) -> ProofPair {
    ProofPair {
        proof: proof.proof,
        catch_all_proof: Some(catch_all.proof),
    }
}

/// Obsolescence token carrying `timestamp` in its first 8 bytes.
pub fn token(timestamp: i64) -> String {
    format!("{:016x}{}", timestamp as u64, "ab".repeat(24))
}

pub fn primary_key(key: &str) -> AddressKey {
    AddressKey::new(PublicKey::active(key, true))
}

/// SKL data as [`ScriptedCrypto`] fingerprints it.
pub fn skl_data(keys: &[AddressKey]) -> String {
    let entries: Vec<SklKeyEntry> = keys
        .iter()
        .map(|k| SklKeyEntry {
            fingerprint: format!("fp-{}", k.public_key.key),
            sha256_fingerprints: vec![format!("sha-{}", k.public_key.key)],
            flags: k.flags,
            primary: u8::from(k.public_key.is_primary),
        })
        .collect();
    serde_json::to_string(&entries).unwrap()
}

/// A pending SKL for `keys` signed at `created_at`.
pub fn skl(keys: &[AddressKey], created_at: i64) -> SignedKeyList {
    SignedKeyList::new(skl_data(keys), format!("sig:{created_at}"))
}

pub fn user_address(email: &str, keys: Vec<AddressKey>, skl: Option<SignedKeyList>) -> UserAddress {
    UserAddress {
        address_id: AddressId::from(format!("id-{email}").as_str()),
        email: email.to_owned(),
        enabled: true,
        keys,
        signed_key_list: skl,
    }
}

pub fn public_address(email: &str, keys: Vec<AddressKey>, skl: Option<SignedKeyList>) -> PublicAddress {
    PublicAddress {
        email: email.to_owned(),
        ignore_kt: false,
        keys,
        signed_key_list: skl,
    }
}

pub fn change(email: &str, epoch_id: EpochId, creation_timestamp: i64, keys: &[&str]) -> AddressChange {
    AddressChange {
        user_id: Harness::user(),
        email: email.to_owned(),
        epoch_id,
        creation_timestamp,
        public_keys: keys.iter().map(|k| (*k).to_owned()).collect(),
        is_obsolete: false,
    }
}
