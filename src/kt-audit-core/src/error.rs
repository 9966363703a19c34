//! Error types for key transparency verification.

use thiserror::Error;

/// Errors that can occur during verification.
#[derive(Debug, Error)]
pub enum KtError {
    /// A proof, signature or consistency check did not hold.
    #[error("Key transparency verification failed: {reason}")]
    VerificationFailed {
        /// What did not hold.
        reason: String,
    },

    /// A signed key list's signature could not be authenticated while
    /// reconciling a recorded change. Distinct from [`Self::VerificationFailed`]
    /// so callers can surface it as a possible directory compromise.
    #[error("Unverifiable signed key list: {reason}")]
    UnverifiableSkl {
        /// Why authentication failed.
        reason: String,
    },

    /// Rollback detected - an epoch or revision went backward.
    #[error("Rollback detected: {field} is {current} but previously saw {last_seen}")]
    RollbackDetected {
        /// Which counter regressed.
        field: &'static str,
        /// The value just observed.
        current: u64,
        /// The highest value previously seen.
        last_seen: u64,
    },

    /// Rollback detected - a signed timestamp went backward.
    #[error("Timestamp regression: {field} is {current} but previously saw {last_seen}")]
    TimestampRegression {
        /// Which timestamp regressed.
        field: &'static str,
        /// The timestamp just observed.
        current: i64,
        /// The latest timestamp previously seen.
        last_seen: i64,
    },

    /// Repository or API error.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] kt_crypto::CryptoError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message.
        message: String,
    },
}

impl KtError {
    /// Create a verification failure.
    #[must_use]
    pub fn verification(reason: impl Into<String>) -> Self {
        Self::VerificationFailed {
            reason: reason.into(),
        }
    }

    /// Create an unverifiable SKL error.
    #[must_use]
    pub fn unverifiable_skl(reason: impl Into<String>) -> Self {
        Self::UnverifiableSkl {
            reason: reason.into(),
        }
    }

    /// Check if this error comes from a failed cryptographic or consistency
    /// check rather than from I/O.
    #[must_use]
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::VerificationFailed { .. }
                | Self::UnverifiableSkl { .. }
                | Self::RollbackDetected { .. }
                | Self::TimestampRegression { .. }
                | Self::Crypto(_)
        )
    }

    /// Check if this error is an anti-rollback violation.
    #[must_use]
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            Self::RollbackDetected { .. } | Self::TimestampRegression { .. }
        )
    }
}

/// Fail with [`KtError::VerificationFailed`] unless `condition` holds.
pub(crate) fn ensure(condition: bool, reason: &str) -> Result<(), KtError> {
    if condition {
        Ok(())
    } else {
        Err(KtError::verification(reason))
    }
}

/// Errors returned by repository collaborators.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The directory has no record for the request (HTTP 422 from the API).
    #[error("Not found: {message}")]
    NotFound {
        /// Error message.
        message: String,
    },

    /// API error.
    #[error("API error ({code}): {message}")]
    Api {
        /// Status code.
        code: u16,
        /// Error message.
        message: String,
    },

    /// Local storage error.
    #[error("Storage error: {message}")]
    Storage {
        /// Error message.
        message: String,
    },
}

impl RepositoryError {
    /// Create a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Check if the directory reported the record as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
