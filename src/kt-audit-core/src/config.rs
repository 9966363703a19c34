//! Configuration for the audit engine.

use std::time::Duration;

use crate::error::KtError;

/// How freshness bounds treat a timestamp that lands exactly on the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boundary {
    /// A timestamp equal to the bound passes (`>=` / `<=`).
    #[default]
    Inclusive,
    /// A timestamp equal to the bound fails (`>` / `<`).
    Exclusive,
}

/// What to do with an epoch whose certificate cannot be verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpochVerificationMode {
    /// Fail the check.
    #[default]
    Strict,
    /// Continue with a trusted timestamp of `0`, which then fails every
    /// freshness bound that depends on it.
    Permissive,
}

/// Configuration for the key transparency engine.
#[derive(Debug, Clone)]
pub struct KtConfig {
    /// Longest time the directory may take to include a change in an epoch.
    pub max_epoch_interval: Duration,
    /// How long epochs stay retrievable from the directory.
    pub epoch_validity_period: Duration,
    /// Bound semantics for every freshness check.
    pub boundary: Boundary,
    /// Epoch certificate handling.
    pub epoch_verification: EpochVerificationMode,
    /// Minimum time between two self audits.
    pub self_audit_interval: Duration,
    /// Run per-address and per-contact audits concurrently.
    pub concurrent_audits: bool,
}

impl Default for KtConfig {
    fn default() -> Self {
        Self {
            max_epoch_interval: Duration::from_secs(72 * 60 * 60), // 72 hours
            epoch_validity_period: Duration::from_secs(90 * 24 * 60 * 60), // 90 days
            boundary: Boundary::Inclusive,
            epoch_verification: EpochVerificationMode::Strict,
            self_audit_interval: Duration::from_secs(4 * 60 * 60),
            concurrent_audits: true,
        }
    }
}

impl KtConfig {
    /// Set the maximum epoch interval.
    #[must_use]
    pub fn with_max_epoch_interval(mut self, interval: Duration) -> Self {
        self.max_epoch_interval = interval;
        self
    }

    /// Set the epoch validity period.
    #[must_use]
    pub fn with_epoch_validity_period(mut self, period: Duration) -> Self {
        self.epoch_validity_period = period;
        self
    }

    /// Set the bound semantics.
    #[must_use]
    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    /// Set the epoch certificate handling.
    #[must_use]
    pub fn with_epoch_verification(mut self, mode: EpochVerificationMode) -> Self {
        self.epoch_verification = mode;
        self
    }

    /// Set the self-audit interval.
    #[must_use]
    pub fn with_self_audit_interval(mut self, interval: Duration) -> Self {
        self.self_audit_interval = interval;
        self
    }

    /// Run audits sequentially or concurrently.
    #[must_use]
    pub fn with_concurrent_audits(mut self, concurrent: bool) -> Self {
        self.concurrent_audits = concurrent;
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), KtError> {
        if self.max_epoch_interval.is_zero() {
            return Err(KtError::ConfigError {
                message: "max_epoch_interval must be non-zero".into(),
            });
        }
        if self.epoch_validity_period < self.max_epoch_interval {
            return Err(KtError::ConfigError {
                message: "epoch_validity_period must not be shorter than max_epoch_interval".into(),
            });
        }
        Ok(())
    }

    /// Maximum epoch interval in seconds.
    #[must_use]
    pub fn max_epoch_interval_secs(&self) -> i64 {
        secs(self.max_epoch_interval)
    }

    /// Epoch validity period in seconds.
    #[must_use]
    pub fn epoch_validity_period_secs(&self) -> i64 {
        secs(self.epoch_validity_period)
    }

    /// Self-audit interval in seconds.
    #[must_use]
    pub fn self_audit_interval_secs(&self) -> i64 {
        secs(self.self_audit_interval)
    }

    /// `value` is not earlier than `bound`.
    #[must_use]
    pub fn at_or_after(&self, value: i64, bound: i64) -> bool {
        match self.boundary {
            Boundary::Inclusive => value >= bound,
            Boundary::Exclusive => value > bound,
        }
    }

    /// `value` is not later than `bound`.
    #[must_use]
    pub fn at_or_before(&self, value: i64, bound: i64) -> bool {
        match self.boundary {
            Boundary::Inclusive => value <= bound,
            Boundary::Exclusive => value < bound,
        }
    }

    /// `timestamp` is within one epoch interval of `now`.
    #[must_use]
    pub fn is_fresh(&self, timestamp: i64, now: i64) -> bool {
        self.at_or_after(timestamp, now.saturating_sub(self.max_epoch_interval_secs()))
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
