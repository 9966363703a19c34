//! # kt-audit-core
//!
//! Client-side verification for a key transparency directory: proofs of
//! inclusion, absence and obsolescence for signed key lists, a per-address
//! trust checkpoint that only moves forward, and reconciliation of key
//! changes observed before the log committed to them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  KeyTransparencyEngine                       │
//! │                                                              │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌───────────┐  │
//! │  │  AddressAuditor  │  │ PendingChange    │  │ Recipient │  │
//! │  │ (own addresses)  │  │ Reconciler       │  │ Verifier  │  │
//! │  └──────────────────┘  └──────────────────┘  └───────────┘  │
//! │           │                     │                  │         │
//! │           ▼                     ▼                  ▼         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ InitialEpochResolver / EpochChainBootstrapper         │   │
//! │  │ CheckpointStore (signed, monotonic)                   │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SignedKeyListAuthenticator / SignedKeyListMatcher     │   │
//! │  │ ProofVerifier / EpochVerifier                         │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                           │                                  │
//! │                           ▼                                  │
//! │      KeyTransparencyRepository · PublicAddressRepository     │
//! │               UserRepository · KtCrypto · Clock              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - **Anti-rollback**: a checkpoint never moves back in epoch, revision or
//!   SKL creation time
//! - **Gap detection**: skipped SKL revisions fail the audit
//! - **Freshness**: trusted time comes from epoch certificates and is bounded
//!   by the maximum epoch interval
//! - **Isolation**: per-address and per-contact failures are reported, not
//!   propagated

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod audit;
pub mod bootstrap;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod context;
pub mod crypto;
pub mod email;
pub mod engine;
pub mod error;
pub mod proof;
pub mod recipient;
pub mod reconcile;
pub mod report;
pub mod repository;
pub mod skl;
pub mod types;

pub use audit::AddressAuditor;
pub use bootstrap::{EpochChainBootstrapper, InitialEpochResolver};
pub use checkpoint::CheckpointStore;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Boundary, EpochVerificationMode, KtConfig};
pub use context::KtContext;
pub use crypto::{certify_epoch, KtCrypto, MerkleLeaf, SoftwareKtCrypto};
pub use engine::KeyTransparencyEngine;
pub use error::{KtError, RepositoryError};
pub use proof::{AbsenceProofChecker, EpochVerifier, ProofVerifier};
pub use recipient::{AddressChangeStore, RecipientVerifier};
pub use reconcile::PendingChangeReconciler;
pub use report::{
    AddressChangeAuditResult, AuditWarning, PublicKeyVerificationResult, SelfAuditReport,
    SelfAuditResult, UserAddressAuditResult,
};
pub use repository::{KeyTransparencyRepository, PublicAddressRepository, UserRepository};
pub use skl::{SignedKeyListAuthenticator, SignedKeyListMatcher};
pub use types::{
    AddressChange, AddressId, AddressKey, Epoch, EpochCertificate, EpochId, Proof, ProofPair,
    ProofType, PublicAddress, PublicKey, Revision, SignedKeyList, SklContent, SklInclusion,
    UserAddress, UserId, VerifiedEpoch, VerifiedEpochData, VerifiedState,
};
