//! Signed key list authentication and key matching.
//!
//! An SKL is only trusted once its signature verifies against the address's
//! own keys, and its declared key metadata matches the keys the client is
//! about to use. A directory substituting keys must fail one of the two.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::KtContext;
use crate::crypto::KtCrypto;
use crate::error::{ensure, KtError};
use crate::types::{
    verification_keys, AddressKey, PublicAddress, PublicKey, SignedKeyList, SklContent,
    UserAddress,
};

/// One key entry of SKL data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SklKeyEntry {
    /// Short key fingerprint.
    #[serde(rename = "Fingerprint")]
    pub fingerprint: String,
    /// SHA-256 key fingerprints.
    #[serde(rename = "SHA256Fingerprints")]
    pub sha256_fingerprints: Vec<String>,
    /// Key flags.
    #[serde(rename = "Flags")]
    pub flags: u32,
    /// `1` for the primary key, `0` otherwise.
    #[serde(rename = "Primary")]
    pub primary: u8,
}

/// Verifies SKL signatures.
pub struct SignedKeyListAuthenticator {
    crypto: Arc<dyn KtCrypto>,
}

impl SignedKeyListAuthenticator {
    /// Create an authenticator.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            crypto: Arc::clone(&ctx.crypto),
        }
    }

    /// Verify `skl` against the active verification keys in `keys`.
    ///
    /// Returns the signature creation time.
    pub fn verify_with_keys(&self, keys: &[PublicKey], skl: &SignedKeyList) -> Result<i64, KtError> {
        let (data, signature) = match &skl.content {
            SklContent::Keys { data, signature } => (data, signature),
            SklContent::Obsolete => {
                return Err(KtError::verification("obsolete SKL carries no signature"));
            }
        };

        let ring: Vec<String> = keys
            .iter()
            .filter(|k| k.is_verification_key())
            .map(|k| k.key.clone())
            .collect();
        ensure(!ring.is_empty(), "no active verification key for SKL")?;

        let created_at = self.crypto.verify_detached(&ring, data, signature).map_err(|e| {
            warn!(error = %e, keys = ring.len(), "SKL signature did not verify");
            e
        })?;
        debug!(created_at, "SKL signature verified");
        Ok(created_at)
    }

    /// Verify `skl` against one of the user's own addresses.
    pub fn verify_for_user_address(&self, address: &UserAddress, skl: &SignedKeyList) -> Result<i64, KtError> {
        self.verify_with_keys(&verification_keys(&address.keys), skl)
    }

    /// Verify `skl` against a third party's address.
    pub fn verify_for_public_address(&self, address: &PublicAddress, skl: &SignedKeyList) -> Result<i64, KtError> {
        self.verify_with_keys(&verification_keys(&address.keys), skl)
    }
}

/// Checks SKL key metadata against local keys.
pub struct SignedKeyListMatcher {
    crypto: Arc<dyn KtCrypto>,
}

impl SignedKeyListMatcher {
    /// Create a matcher.
    pub fn new(ctx: &KtContext) -> Self {
        Self {
            crypto: Arc::clone(&ctx.crypto),
        }
    }

    /// Fail unless `skl` declares exactly the usable keys in `keys`.
    pub fn check_signed_key_list_match(&self, keys: &[AddressKey], skl: &SignedKeyList) -> Result<(), KtError> {
        let data = skl
            .data()
            .ok_or_else(|| KtError::verification("obsolete SKL has no key metadata"))?;
        let entries: Vec<SklKeyEntry> = serde_json::from_str(data)
            .map_err(|e| KtError::verification(format!("SKL data is not key metadata: {e}")))?;

        let local: Vec<&AddressKey> = keys.iter().filter(|k| is_listed(k)).collect();
        ensure(
            entries.len() == local.len(),
            "SKL lists a different number of keys than the address",
        )?;
        ensure(
            entries.iter().filter(|e| e.primary == 1).count() == 1,
            "SKL must mark exactly one primary key",
        )?;

        for key in local {
            let expected = self.entry_for(key)?;
            let entry = entries
                .iter()
                .find(|e| e.fingerprint == expected.fingerprint)
                .ok_or_else(|| KtError::verification("address key missing from SKL"))?;
            ensure(entry.flags == expected.flags, "SKL key flags mismatch")?;
            ensure(
                entry.sha256_fingerprints == expected.sha256_fingerprints,
                "SKL SHA-256 fingerprints mismatch",
            )?;
            ensure(entry.primary == expected.primary, "SKL primary key mismatch")?;
        }
        Ok(())
    }

    /// SKL data declaring the usable keys in `keys`.
    pub fn build_skl_data(&self, keys: &[AddressKey]) -> Result<String, KtError> {
        let entries = keys
            .iter()
            .filter(|k| is_listed(k))
            .map(|k| self.entry_for(k))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(serde_json::to_string(&entries)?)
    }

    fn entry_for(&self, key: &AddressKey) -> Result<SklKeyEntry, KtError> {
        Ok(SklKeyEntry {
            fingerprint: self.crypto.fingerprint(&key.public_key.key)?,
            sha256_fingerprints: self.crypto.sha256_fingerprints(&key.public_key.key)?,
            flags: key.flags,
            primary: u8::from(key.public_key.is_primary),
        })
    }
}

/// Keys an SKL must declare: active and usable for verification or encryption.
fn is_listed(key: &AddressKey) -> bool {
    key.public_key.is_active && (key.public_key.can_verify || key.public_key.can_encrypt)
}
