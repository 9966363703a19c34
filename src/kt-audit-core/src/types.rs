//! Directory, proof and checkpoint types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a log epoch.
pub type EpochId = u64;

/// Revision of a directory entry. Starts at `0` and grows by one per change.
pub type Revision = u64;

/// Account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of one of the user's own addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressId(pub String);

impl fmt::Display for AddressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AddressId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// ========================================================================
// Epochs and proofs
// ========================================================================

/// Certificate metadata of an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochCertificate {
    /// `H(previous_chain_hash || tree_hash)`, hex.
    pub chain_hash: String,
    /// Chain hash of the previous epoch, hex.
    pub previous_chain_hash: String,
    /// Certificate issue time; the epoch's `notBefore`.
    pub issued_at: i64,
    /// Log signature over the epoch, hex.
    pub signature: String,
}

/// A numbered, hash-committed snapshot of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// Epoch number.
    pub epoch_id: EpochId,
    /// Root hash of the directory tree, hex.
    pub tree_hash: String,
    /// Certificate metadata.
    pub certificate: EpochCertificate,
}

/// What a proof claims about a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProofType {
    /// No entry exists for the label.
    Absence,
    /// The entry holds the given SKL.
    Existence,
    /// The entry was removed; the leaf holds an obsolescence token.
    Obsolescence,
}

impl TryFrom<u8> for ProofType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Absence),
            1 => Ok(Self::Existence),
            2 => Ok(Self::Obsolescence),
            other => Err(format!("unknown proof type {other}")),
        }
    }
}

impl From<ProofType> for u8 {
    fn from(value: ProofType) -> Self {
        match value {
            ProofType::Absence => 0,
            ProofType::Existence => 1,
            ProofType::Obsolescence => 2,
        }
    }
}

/// A Merkle proof for one label at one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Claim made by the proof.
    pub proof_type: ProofType,
    /// Entry revision; absent for absence proofs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
    /// Hex token stored in the leaf of an obsolete entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obsolescence_token: Option<String>,
    /// Sibling hashes from leaf level upward, hex; `None` is an empty subtree.
    #[serde(default)]
    pub neighbors: Vec<Option<String>>,
}

/// Proof for an address plus, for catch-all routing, the proof for `@domain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPair {
    /// Proof for the address itself.
    pub proof: Proof,
    /// Proof for the domain catch-all entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch_all_proof: Option<Proof>,
}

impl ProofPair {
    /// The proof that determines the entry: the catch-all proof when the
    /// address itself is absent, the address proof otherwise.
    pub fn effective(&self) -> &Proof {
        match &self.catch_all_proof {
            Some(catch_all) if self.proof.proof_type == ProofType::Absence => catch_all,
            _ => &self.proof,
        }
    }

    /// Revision of the effective proof.
    pub fn revision(&self) -> Option<Revision> {
        self.effective().revision
    }
}

// ========================================================================
// Signed key lists
// ========================================================================

/// Payload of a signed key list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SklContent {
    /// A signed declaration of the address's keys.
    Keys {
        /// JSON key metadata.
        data: String,
        /// Detached signature over `data`.
        signature: String,
    },
    /// Marker that the address no longer has keys.
    Obsolete,
}

/// Whether an SKL has been committed to an epoch yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SklInclusion {
    /// Not committed to any epoch yet.
    Pending,
    /// Committed; `max_epoch_id` is the last epoch holding this version.
    Included {
        /// Last epoch in which this version is the directory entry.
        max_epoch_id: EpochId,
    },
}

/// A versioned, signed declaration of an address's public keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SignedKeyListWire", into = "SignedKeyListWire")]
pub struct SignedKeyList {
    /// Keys or obsolescence marker.
    pub content: SklContent,
    /// First epoch containing this version.
    pub min_epoch_id: Option<EpochId>,
    /// Last epoch containing this version.
    pub max_epoch_id: Option<EpochId>,
    /// Earliest epoch the directory promised to include this version in.
    pub expected_min_epoch_id: Option<EpochId>,
}

impl SignedKeyList {
    /// A not yet included SKL holding keys.
    pub fn new(data: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            content: SklContent::Keys {
                data: data.into(),
                signature: signature.into(),
            },
            min_epoch_id: None,
            max_epoch_id: None,
            expected_min_epoch_id: None,
        }
    }

    /// A not yet included obsolescence marker.
    pub fn obsolete() -> Self {
        Self {
            content: SklContent::Obsolete,
            min_epoch_id: None,
            max_epoch_id: None,
            expected_min_epoch_id: None,
        }
    }

    /// Set the first epoch.
    #[must_use]
    pub fn with_min_epoch(mut self, epoch_id: EpochId) -> Self {
        self.min_epoch_id = Some(epoch_id);
        self
    }

    /// Set the last epoch.
    #[must_use]
    pub fn with_max_epoch(mut self, epoch_id: EpochId) -> Self {
        self.max_epoch_id = Some(epoch_id);
        self
    }

    /// Set the expected first epoch.
    #[must_use]
    pub fn with_expected_min_epoch(mut self, epoch_id: EpochId) -> Self {
        self.expected_min_epoch_id = Some(epoch_id);
        self
    }

    /// Key metadata, unless obsolete.
    pub fn data(&self) -> Option<&str> {
        match &self.content {
            SklContent::Keys { data, .. } => Some(data),
            SklContent::Obsolete => None,
        }
    }

    /// Signature, unless obsolete.
    pub fn signature(&self) -> Option<&str> {
        match &self.content {
            SklContent::Keys { signature, .. } => Some(signature),
            SklContent::Obsolete => None,
        }
    }

    /// Whether this is an obsolescence marker.
    pub fn is_obsolete(&self) -> bool {
        matches!(self.content, SklContent::Obsolete)
    }

    /// Inclusion status.
    pub fn inclusion(&self) -> SklInclusion {
        match self.max_epoch_id {
            Some(max_epoch_id) => SklInclusion::Included { max_epoch_id },
            None => SklInclusion::Pending,
        }
    }
}

/// Flat wire shape of [`SignedKeyList`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignedKeyListWire {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    min_epoch_id: Option<EpochId>,
    #[serde(default)]
    max_epoch_id: Option<EpochId>,
    #[serde(default)]
    expected_min_epoch_id: Option<EpochId>,
}

impl TryFrom<SignedKeyListWire> for SignedKeyList {
    type Error = String;

    fn try_from(wire: SignedKeyListWire) -> Result<Self, Self::Error> {
        let content = match (wire.data, wire.signature) {
            (Some(data), Some(signature)) => SklContent::Keys { data, signature },
            (None, _) => SklContent::Obsolete,
            (Some(_), None) => return Err("signed key list has data but no signature".into()),
        };
        Ok(Self {
            content,
            min_epoch_id: wire.min_epoch_id,
            max_epoch_id: wire.max_epoch_id,
            expected_min_epoch_id: wire.expected_min_epoch_id,
        })
    }
}

impl From<SignedKeyList> for SignedKeyListWire {
    fn from(skl: SignedKeyList) -> Self {
        let (data, signature) = match skl.content {
            SklContent::Keys { data, signature } => (Some(data), Some(signature)),
            SklContent::Obsolete => (None, None),
        };
        Self {
            data,
            signature,
            min_epoch_id: skl.min_epoch_id,
            max_epoch_id: skl.max_epoch_id,
            expected_min_epoch_id: skl.expected_min_epoch_id,
        }
    }
}

// ========================================================================
// Keys and addresses
// ========================================================================

/// A public key with its capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Encoded key material.
    pub key: String,
    /// Primary key of the address.
    pub is_primary: bool,
    /// Key is active.
    pub is_active: bool,
    /// Key can be used for encryption.
    pub can_encrypt: bool,
    /// Key can be used to verify signatures.
    pub can_verify: bool,
}

impl PublicKey {
    /// An active key usable for both verification and encryption.
    pub fn active(key: impl Into<String>, is_primary: bool) -> Self {
        Self {
            key: key.into(),
            is_primary,
            is_active: true,
            can_encrypt: true,
            can_verify: true,
        }
    }

    /// Usable to authenticate signatures.
    pub fn is_verification_key(&self) -> bool {
        self.is_active && self.can_verify
    }
}

/// Key flag: the key is not compromised and may verify signatures.
pub const KEY_FLAG_NOT_COMPROMISED: u32 = 1;
/// Key flag: the key is not obsolete and may encrypt.
pub const KEY_FLAG_NOT_OBSOLETE: u32 = 2;

/// A key attached to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressKey {
    /// The key.
    pub public_key: PublicKey,
    /// Declared key flags.
    pub flags: u32,
}

impl AddressKey {
    /// Wrap a key, deriving flags from its capabilities.
    pub fn new(public_key: PublicKey) -> Self {
        let mut flags = 0;
        if public_key.can_verify {
            flags |= KEY_FLAG_NOT_COMPROMISED;
        }
        if public_key.can_encrypt {
            flags |= KEY_FLAG_NOT_OBSOLETE;
        }
        Self { public_key, flags }
    }
}

/// One of the user's own addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAddress {
    /// Address identifier.
    pub address_id: AddressId,
    /// Email address.
    pub email: String,
    /// Address can send and receive.
    pub enabled: bool,
    /// Keys of the address.
    pub keys: Vec<AddressKey>,
    /// Currently declared SKL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_key_list: Option<SignedKeyList>,
}

/// A third party's address as served by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAddress {
    /// Email address.
    pub email: String,
    /// The owner opted out of key transparency.
    #[serde(default)]
    pub ignore_kt: bool,
    /// Keys of the address.
    pub keys: Vec<AddressKey>,
    /// Currently declared SKL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_key_list: Option<SignedKeyList>,
}

/// Active, verification-capable keys.
pub fn verification_keys(keys: &[AddressKey]) -> Vec<PublicKey> {
    keys.iter()
        .map(|k| &k.public_key)
        .filter(|k| k.is_verification_key())
        .cloned()
        .collect()
}

// ========================================================================
// Checkpoints and recorded changes
// ========================================================================

/// The client's trust checkpoint for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedEpochData {
    /// Last verified epoch.
    #[serde(rename = "EpochID")]
    pub epoch_id: EpochId,
    /// Entry revision at that epoch.
    #[serde(rename = "Revision")]
    pub revision: Revision,
    /// Signature time of the newest verified SKL, `0` after bootstrap.
    #[serde(rename = "SKLCreationTime")]
    pub skl_creation_time: i64,
}

impl VerifiedEpochData {
    /// Create a checkpoint.
    pub fn new(epoch_id: EpochId, revision: Revision, skl_creation_time: i64) -> Self {
        Self {
            epoch_id,
            revision,
            skl_creation_time,
        }
    }
}

/// A checkpoint as stored by the directory: JSON plus the user's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedEpoch {
    /// Serialized [`VerifiedEpochData`].
    pub data: String,
    /// Detached signature over `data`.
    pub signature: String,
}

/// A third party's key change seen locally and not yet confirmed by the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressChange {
    /// Owner of the record.
    pub user_id: UserId,
    /// Address whose keys changed.
    pub email: String,
    /// Epoch the change is expected to be included by.
    pub epoch_id: EpochId,
    /// When the change was observed (SKL signature time).
    pub creation_timestamp: i64,
    /// Keys the SKL was authenticated with.
    pub public_keys: Vec<String>,
    /// The change removed the address's keys.
    pub is_obsolete: bool,
}

// ========================================================================
// Verification outcomes
// ========================================================================

/// What the log says about an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedState {
    /// Entry present; `notBefore` is the epoch certificate time.
    Existent(i64),
    /// No entry.
    Absent(i64),
    /// Entry removed.
    Obsolete(i64),
    /// SKL seen but not committed to an epoch yet.
    NotYetIncluded,
}

impl VerifiedState {
    /// The certified lower bound, if any.
    pub fn not_before(&self) -> Option<i64> {
        match self {
            Self::Existent(t) | Self::Absent(t) | Self::Obsolete(t) => Some(*t),
            Self::NotYetIncluded => None,
        }
    }

    /// Entry present or removed, as opposed to never created.
    pub fn is_included(&self) -> bool {
        matches!(self, Self::Existent(_) | Self::Obsolete(_))
    }
}
