//! Audit outcomes.
//!
//! Failures are carried as data so a batch audit can report every address
//! and contact independently.

use std::collections::HashMap;

use crate::error::KtError;
use crate::types::VerifiedState;

/// Benign terminal states of an address audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditWarning {
    /// The address is disabled and was not audited.
    Disabled,
    /// The address has no SKL and the log confirms it is absent.
    AddressNotInKt,
    /// The address's SKL has not been included in an epoch yet.
    CreationTooRecent,
}

/// Outcome of auditing one of the user's addresses.
#[derive(Debug)]
pub enum UserAddressAuditResult {
    /// The log agrees with the address and the checkpoint is current.
    Success,
    /// Nothing to verify yet.
    Warning(AuditWarning),
    /// Verification failed.
    Failure(KtError),
}

impl UserAddressAuditResult {
    /// Whether the audit succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether the audit failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Outcome of reconciling one recorded change.
#[derive(Debug)]
pub enum AddressChangeAuditResult {
    /// Confirmed, expired or still pending within its window.
    Success,
    /// Reconciliation failed.
    Failure(KtError),
}

impl AddressChangeAuditResult {
    /// Whether reconciliation failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Per-item results of a self audit.
#[derive(Debug, Default)]
pub struct SelfAuditReport {
    /// When the audit ran.
    pub timestamp: i64,
    /// Results keyed by address email.
    pub address_results: HashMap<String, UserAddressAuditResult>,
    /// Results keyed by contact email.
    pub contact_results: HashMap<String, AddressChangeAuditResult>,
}

impl SelfAuditReport {
    /// Number of failed addresses and contacts.
    pub fn failure_count(&self) -> usize {
        self.address_results.values().filter(|r| r.is_failure()).count()
            + self.contact_results.values().filter(|r| r.is_failure()).count()
    }
}

/// Outcome of a self audit.
#[derive(Debug)]
pub enum SelfAuditResult {
    /// The audit ran; individual items may still have failed.
    Success(SelfAuditReport),
    /// The audit could not run.
    Failure(KtError),
}

/// Outcome of checking a recipient's keys.
#[derive(Debug)]
pub enum PublicKeyVerificationResult {
    /// What the log says about the address.
    Success(VerifiedState),
    /// Verification failed.
    Failure(KtError),
}

impl PublicKeyVerificationResult {
    /// The verified state, if verification succeeded.
    pub fn state(&self) -> Option<VerifiedState> {
        match self {
            Self::Success(state) => Some(*state),
            Self::Failure(_) => None,
        }
    }
}
