//! Credential storage with secure hashing
//!
//! Exactly one of the PIN digest or the pattern digest is authoritative,
//! selected by the persisted auth mode. Digests are Argon2id PHC strings
//! carrying their own random salt.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::storage::{keys, StorageContext};
use crate::types::AuthMode;
use crate::{DEFAULT_GRID_SIZE, DEFAULT_PATTERN_MIN_NODES, DEFAULT_PIN_LENGTH};

/// Digest algorithm version: Argon2id, default parameters
pub const DIGEST_VERSION: u32 = 1;

/// Salted one-way digest of a PIN or pattern
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDigest {
    /// Algorithm version for future migrations
    pub version: u32,
    /// Argon2id PHC string (includes salt and parameters)
    pub phc: String,
}

/// Shape constraints on credential input
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRules {
    pub pin_length: usize,
    pub grid_size: u8,
    pub pattern_min_nodes: usize,
}

impl Default for CredentialRules {
    fn default() -> Self {
        Self {
            pin_length: DEFAULT_PIN_LENGTH,
            grid_size: DEFAULT_GRID_SIZE,
            pattern_min_nodes: DEFAULT_PATTERN_MIN_NODES,
        }
    }
}

impl CredentialRules {
    /// Validate PIN format
    pub fn validate_pin(&self, pin: &[u8]) -> Result<()> {
        if pin.len() != self.pin_length {
            return Err(Error::InvalidPinLength(self.pin_length));
        }
        if !pin.iter().all(u8::is_ascii_digit) {
            return Err(Error::InvalidPinFormat);
        }
        Ok(())
    }

    /// Validate an ordered node-index sequence
    pub fn validate_pattern(&self, nodes: &[u8]) -> Result<()> {
        if nodes.len() < self.pattern_min_nodes {
            return Err(Error::InvalidPattern(format!(
                "at least {} nodes required",
                self.pattern_min_nodes
            )));
        }

        let node_count = usize::from(self.grid_size) * usize::from(self.grid_size);
        let mut seen = vec![false; node_count];
        for &node in nodes {
            let index = usize::from(node);
            if index >= node_count {
                return Err(Error::InvalidPattern(format!("node {} outside grid", node)));
            }
            if seen[index] {
                return Err(Error::InvalidPattern(format!("node {} repeated", node)));
            }
            seen[index] = true;
        }
        Ok(())
    }
}

/// Canonical byte form of a pattern, e.g. `[0, 1, 2, 5]` -> `"0-1-2-5"`
pub fn encode_pattern(nodes: &[u8]) -> Zeroizing<Vec<u8>> {
    let joined = nodes
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join("-");
    Zeroizing::new(joined.into_bytes())
}

/// Credential store over the shared storage context
pub struct CredentialStore {
    context: Arc<StorageContext>,
    rules: CredentialRules,
}

impl CredentialStore {
    pub fn new(context: Arc<StorageContext>, rules: CredentialRules) -> Self {
        Self { context, rules }
    }

    pub fn rules(&self) -> &CredentialRules {
        &self.rules
    }

    /// Validate raw input for `mode` and hash it
    ///
    /// For patterns `raw` is the node-index sequence.
    pub fn create_digest(&self, mode: AuthMode, raw: &[u8]) -> Result<CredentialDigest> {
        let secret = match mode {
            AuthMode::Pin => {
                self.rules.validate_pin(raw)?;
                Zeroizing::new(raw.to_vec())
            }
            AuthMode::Pattern => {
                self.rules.validate_pattern(raw)?;
                encode_pattern(raw)
            }
        };

        let salt = SaltString::generate(&mut OsRng);
        let phc = Argon2::default()
            .hash_password(&secret, &salt)
            .map_err(|e| Error::Crypto(format!("Failed to hash credential: {}", e)))?
            .to_string();

        Ok(CredentialDigest {
            version: DIGEST_VERSION,
            phc,
        })
    }

    /// Store `digest` for `mode` and make `mode` authoritative
    ///
    /// The other mode's digest is removed; only one credential is ever on
    /// disk.
    pub fn set_authoritative(&self, mode: AuthMode, digest: &CredentialDigest) -> Result<()> {
        let replaced = match mode {
            AuthMode::Pin => AuthMode::Pattern,
            AuthMode::Pattern => AuthMode::Pin,
        };
        self.context.put_json(mode.digest_key(), digest)?;
        self.context.put_json(keys::AUTH_MODE, &mode)?;
        self.context.remove(replaced.digest_key())?;
        info!(%mode, "Credential updated");
        Ok(())
    }

    /// The authoritative mode (PIN when never configured)
    pub fn auth_mode(&self) -> Result<AuthMode> {
        Ok(self
            .context
            .get_json::<AuthMode>(keys::AUTH_MODE)?
            .unwrap_or_default())
    }

    /// Whether the authoritative mode has a digest
    pub fn is_configured(&self) -> Result<bool> {
        let mode = self.auth_mode()?;
        self.context.contains(mode.digest_key())
    }

    /// Check `input` against the stored digest for `mode`
    ///
    /// Any failure to read or parse the digest is a mismatch.
    pub fn verify(&self, mode: AuthMode, input: &[u8]) -> bool {
        match self.try_verify(mode, input) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(%mode, "Credential verification failed closed: {}", e);
                false
            }
        }
    }

    fn try_verify(&self, mode: AuthMode, input: &[u8]) -> Result<bool> {
        let digest: CredentialDigest = self
            .context
            .get_json(mode.digest_key())?
            .ok_or_else(|| Error::CredentialNotSet(mode.to_string()))?;

        if digest.version != DIGEST_VERSION {
            return Err(Error::Crypto(format!(
                "Unsupported digest version {}",
                digest.version
            )));
        }

        let parsed = PasswordHash::new(&digest.phc)
            .map_err(|e| Error::Crypto(format!("Invalid stored digest: {}", e)))?;

        let secret = match mode {
            AuthMode::Pin => Zeroizing::new(input.to_vec()),
            AuthMode::Pattern => encode_pattern(input),
        };

        // Constant-time comparison inside argon2
        Ok(Argon2::default().verify_password(&secret, &parsed).is_ok())
    }

    /// Verify against whichever mode is authoritative
    pub fn verify_current(&self, input: &[u8]) -> bool {
        match self.auth_mode() {
            Ok(mode) => self.verify(mode, input),
            Err(e) => {
                warn!("Auth mode unreadable, denying: {}", e);
                false
            }
        }
    }

    /// Factory reset - removes both digests, the auth mode and lockout state
    pub fn reset(&self) -> Result<()> {
        self.context.remove(keys::PIN_DIGEST)?;
        self.context.remove(keys::PATTERN_DIGEST)?;
        self.context.remove(keys::AUTH_MODE)?;
        self.context.remove(keys::LOCKOUT_STATE)?;
        self.context.remove(keys::FIRST_LAUNCH_COMPLETE)?;
        info!("Credentials reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn test_store() -> CredentialStore {
        let context = Arc::new(StorageContext::with_backend(Arc::new(MemoryStore::new())));
        CredentialStore::new(context, CredentialRules::default())
    }

    #[test]
    fn test_pin_set_and_verify() {
        let store = test_store();
        let digest = store.create_digest(AuthMode::Pin, b"1234").unwrap();
        assert!(digest.phc.starts_with("$argon2id$"));

        store.set_authoritative(AuthMode::Pin, &digest).unwrap();
        assert!(store.is_configured().unwrap());
        assert!(store.verify(AuthMode::Pin, b"1234"));
        assert!(!store.verify(AuthMode::Pin, b"4321"));
    }

    #[test]
    fn test_digests_are_salted() {
        let store = test_store();
        let a = store.create_digest(AuthMode::Pin, b"1234").unwrap();
        let b = store.create_digest(AuthMode::Pin, b"1234").unwrap();
        assert_ne!(a.phc, b.phc);
    }

    #[test]
    fn test_pin_validation() {
        let store = test_store();
        assert!(matches!(
            store.create_digest(AuthMode::Pin, b"123"),
            Err(Error::InvalidPinLength(4))
        ));
        assert!(matches!(
            store.create_digest(AuthMode::Pin, b"12a4"),
            Err(Error::InvalidPinFormat)
        ));
    }

    #[test]
    fn test_pattern_validation() {
        let rules = CredentialRules::default();
        assert!(rules.validate_pattern(&[0, 1, 2]).is_err());
        assert!(rules.validate_pattern(&[0, 1, 2, 1]).is_err());
        assert!(rules.validate_pattern(&[0, 1, 2, 9]).is_err());
        assert!(rules.validate_pattern(&[0, 4, 8, 5]).is_ok());
    }

    #[test]
    fn test_pattern_mode_is_authoritative() {
        let store = test_store();
        let digest = store.create_digest(AuthMode::Pattern, &[0, 3, 6, 7]).unwrap();
        store.set_authoritative(AuthMode::Pattern, &digest).unwrap();

        assert_eq!(store.auth_mode().unwrap(), AuthMode::Pattern);
        assert!(store.verify_current(&[0, 3, 6, 7]));
        assert!(!store.verify_current(&[7, 6, 3, 0]));
    }

    #[test]
    fn test_switching_mode_drops_previous_digest() {
        let store = test_store();
        let pin = store.create_digest(AuthMode::Pin, b"1234").unwrap();
        store.set_authoritative(AuthMode::Pin, &pin).unwrap();

        let pattern = store.create_digest(AuthMode::Pattern, &[0, 1, 2, 5]).unwrap();
        store.set_authoritative(AuthMode::Pattern, &pattern).unwrap();

        assert!(!store.context.contains(keys::PIN_DIGEST).unwrap());
        assert!(!store.verify(AuthMode::Pin, b"1234"));
        assert!(store.verify_current(&[0, 1, 2, 5]));

        // And back again
        let pin = store.create_digest(AuthMode::Pin, b"9876").unwrap();
        store.set_authoritative(AuthMode::Pin, &pin).unwrap();
        assert!(!store.context.contains(keys::PATTERN_DIGEST).unwrap());
        assert!(!store.verify(AuthMode::Pattern, &[0, 1, 2, 5]));
    }

    #[test]
    fn test_missing_digest_never_verifies() {
        let store = test_store();
        assert!(!store.is_configured().unwrap());
        assert!(!store.verify(AuthMode::Pin, b"1234"));
    }

    #[test]
    fn test_uninitialized_storage_never_verifies() {
        let store = CredentialStore::new(Arc::new(StorageContext::new()), CredentialRules::default());
        assert!(!store.verify(AuthMode::Pin, b"1234"));
        assert!(!store.verify_current(b"1234"));
    }

    #[test]
    fn test_corrupt_digest_never_verifies() {
        let context = Arc::new(StorageContext::with_backend(Arc::new(MemoryStore::new())));
        context.set(keys::PIN_DIGEST, b"{\"version\":1,\"phc\":\"garbage\"}").unwrap();
        let store = CredentialStore::new(context, CredentialRules::default());
        assert!(!store.verify(AuthMode::Pin, b"1234"));
    }

    #[test]
    fn test_reset_clears_credentials() {
        let store = test_store();
        let digest = store.create_digest(AuthMode::Pin, b"1234").unwrap();
        store.set_authoritative(AuthMode::Pin, &digest).unwrap();

        store.reset().unwrap();
        assert!(!store.is_configured().unwrap());
        assert!(!store.verify(AuthMode::Pin, b"1234"));
    }
}
