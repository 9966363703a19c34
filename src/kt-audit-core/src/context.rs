//! Shared handles to the engine's collaborators.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::KtConfig;
use crate::crypto::KtCrypto;
use crate::repository::{KeyTransparencyRepository, PublicAddressRepository, UserRepository};

/// Collaborators every verification component draws from.
///
/// Cheap to clone; components keep their own copy of the handles they use.
#[derive(Clone)]
pub struct KtContext {
    /// Log access and local audit state.
    pub kt_repository: Arc<dyn KeyTransparencyRepository>,
    /// Directory entries.
    pub address_repository: Arc<dyn PublicAddressRepository>,
    /// The user's own keys.
    pub user_repository: Arc<dyn UserRepository>,
    /// Signature and proof checks.
    pub crypto: Arc<dyn KtCrypto>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Engine configuration.
    pub config: Arc<KtConfig>,
}

impl KtContext {
    /// Create a context using the system clock and default configuration.
    pub fn new(
        kt_repository: Arc<dyn KeyTransparencyRepository>,
        address_repository: Arc<dyn PublicAddressRepository>,
        user_repository: Arc<dyn UserRepository>,
        crypto: Arc<dyn KtCrypto>,
    ) -> Self {
        Self {
            kt_repository,
            address_repository,
            user_repository,
            crypto,
            clock: Arc::new(SystemClock),
            config: Arc::new(KtConfig::default()),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: KtConfig) -> Self {
        self.config = Arc::new(config);
        self
    }
}
