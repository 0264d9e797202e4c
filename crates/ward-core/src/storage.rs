//! Persisted key-value storage
//!
//! Every persisted component reads and writes through a [`StorageContext`].
//! The context is constructed empty and must be initialized with a backend
//! before use; access before that point fails with
//! [`Error::StorageNotInitialized`].
//!
//! Encryption at rest is the backend's concern.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// Storage keys of the persisted layout
pub mod keys {
    pub const LOCKED_APPS: &str = "locked_apps";
    pub const PIN_DIGEST: &str = "pin_digest";
    pub const PATTERN_DIGEST: &str = "pattern_digest";
    pub const AUTH_MODE: &str = "auth_mode";
    pub const BIOMETRIC_ENABLED: &str = "biometric_enabled";
    pub const SESSION_TIMEOUT_MS: &str = "session_timeout_ms";
    pub const SESSIONS: &str = "sessions";
    pub const FIRST_LAUNCH_COMPLETE: &str = "first_launch_complete";
    pub const LOCKOUT_STATE: &str = "lockout_state";
}

/// Byte-string key-value backend
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn remove(&self, key: &str) -> Result<()>;
}

fn lock_poisoned<T>(_: T) -> Error {
    Error::Storage("store lock poisoned".to_string())
}

/// In-memory backend (tests and ephemeral runs)
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().map_err(lock_poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().map_err(lock_poisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().map_err(lock_poisoned)?;
        Ok(entries.contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(lock_poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// File backend: one JSON object of hex-encoded values
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or create on first write) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents).map_err(|e| {
                Error::Storage(format!("Failed to parse store {}: {}", path.display(), e))
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let contents = serde_json::to_string_pretty(entries)?;

        // Write atomically
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents)?;
        fs::rename(&temp_path, &self.path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().map_err(lock_poisoned)?;
        entries
            .get(key)
            .map(|value| {
                hex::decode(value)
                    .map_err(|e| Error::Storage(format!("Corrupt value for {}: {}", key, e)))
            })
            .transpose()
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().map_err(lock_poisoned)?;
        let previous = entries.insert(key.to_string(), hex::encode(value));
        if let Err(e) = self.persist(&entries) {
            // Keep memory consistent with disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().map_err(lock_poisoned)?;
        Ok(entries.contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(lock_poisoned)?;
        if let Some(previous) = entries.remove(key) {
            if let Err(e) = self.persist(&entries) {
                entries.insert(key.to_string(), previous);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Explicitly initialized handle to the persisted store
///
/// Shared by the credential store, session ledger and settings.
#[derive(Default)]
pub struct StorageContext {
    backend: OnceLock<Arc<dyn KeyValueStore>>,
}

impl StorageContext {
    /// Create an uninitialized context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context already initialized with `backend`
    pub fn with_backend(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend: OnceLock::from(backend),
        }
    }

    /// Attach the backend. May only be called once.
    pub fn initialize(&self, backend: Arc<dyn KeyValueStore>) -> Result<()> {
        self.backend
            .set(backend)
            .map_err(|_| Error::StorageAlreadyInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.get().is_some()
    }

    fn backend(&self) -> Result<&Arc<dyn KeyValueStore>> {
        self.backend.get().ok_or(Error::StorageNotInitialized)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.backend()?.get(key)
    }

    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.backend()?.set(key, value)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        self.backend()?.contains(key)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.backend()?.remove(key)
    }

    /// Read and deserialize a JSON value
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a JSON value
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes)
    }
}
