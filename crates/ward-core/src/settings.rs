//! User-editable guard settings
//!
//! The protected app set, session timeout, biometric flag and
//! first-launch flag. Every mutation is written through to storage.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::storage::{keys, StorageContext};
use crate::types::AppId;
use crate::DEFAULT_SESSION_TIMEOUT_MS;

/// Applications the user has chosen to guard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectedAppSet(BTreeSet<AppId>);

impl ProtectedAppSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, app_id: &AppId) -> bool {
        self.0.contains(app_id)
    }

    pub fn insert(&mut self, app_id: AppId) -> bool {
        self.0.insert(app_id)
    }

    pub fn remove(&mut self, app_id: &AppId) -> bool {
        self.0.remove(app_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppId> {
        self.0.iter()
    }
}

impl FromIterator<AppId> for ProtectedAppSet {
    fn from_iter<I: IntoIterator<Item = AppId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Session duration applied to new grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionTimeout(u64);

impl SessionTimeout {
    /// Presets offered by the settings surface
    pub const PRESETS: [SessionTimeout; 5] = [
        SessionTimeout(10_000),
        SessionTimeout(30_000),
        SessionTimeout(60_000),
        SessionTimeout(120_000),
        SessionTimeout(300_000),
    ];

    pub fn from_millis(ms: u64) -> Result<Self> {
        if ms == 0 {
            return Err(Error::InvalidSessionTimeout);
        }
        Ok(Self(ms))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn is_preset(self) -> bool {
        Self::PRESETS.contains(&self)
    }
}

impl Default for SessionTimeout {
    fn default() -> Self {
        Self(DEFAULT_SESSION_TIMEOUT_MS)
    }
}

/// Settings snapshot backed by the storage context
pub struct Settings {
    context: Arc<StorageContext>,
    protected: ProtectedAppSet,
    session_timeout: SessionTimeout,
    biometric_enabled: bool,
    first_launch_complete: bool,
}

impl Settings {
    /// Load settings, falling back to defaults for absent or unreadable keys
    pub fn load(context: Arc<StorageContext>) -> Result<Self> {
        if !context.is_initialized() {
            return Err(Error::StorageNotInitialized);
        }

        let protected = read_or_default(&context, keys::LOCKED_APPS);
        let session_timeout: SessionTimeout = read_or_default(&context, keys::SESSION_TIMEOUT_MS);
        let session_timeout = if session_timeout.as_millis() == 0 {
            SessionTimeout::default()
        } else {
            session_timeout
        };

        Ok(Self {
            protected,
            session_timeout,
            biometric_enabled: read_or_default(&context, keys::BIOMETRIC_ENABLED),
            first_launch_complete: read_or_default(&context, keys::FIRST_LAUNCH_COMPLETE),
            context,
        })
    }

    pub fn protected_apps(&self) -> &ProtectedAppSet {
        &self.protected
    }

    pub fn is_protected(&self, app_id: &AppId) -> bool {
        self.protected.contains(app_id)
    }

    /// Add an app to the protected set. Returns false if already present.
    pub fn protect(&mut self, app_id: AppId) -> Result<bool> {
        let mut updated = self.protected.clone();
        if !updated.insert(app_id.clone()) {
            return Ok(false);
        }
        self.context.put_json(keys::LOCKED_APPS, &updated)?;
        self.protected = updated;
        info!(%app_id, "App protected");
        Ok(true)
    }

    /// Remove an app from the protected set. Returns false if absent.
    pub fn unprotect(&mut self, app_id: &AppId) -> Result<bool> {
        let mut updated = self.protected.clone();
        if !updated.remove(app_id) {
            return Ok(false);
        }
        self.context.put_json(keys::LOCKED_APPS, &updated)?;
        self.protected = updated;
        info!(%app_id, "App unprotected");
        Ok(true)
    }

    pub fn session_timeout(&self) -> SessionTimeout {
        self.session_timeout
    }

    /// Change the timeout for future grants only
    pub fn set_session_timeout(&mut self, timeout: SessionTimeout) -> Result<()> {
        self.context.put_json(keys::SESSION_TIMEOUT_MS, &timeout)?;
        self.session_timeout = timeout;
        Ok(())
    }

    pub fn biometric_enabled(&self) -> bool {
        self.biometric_enabled
    }

    pub fn set_biometric_enabled(&mut self, enabled: bool) -> Result<()> {
        self.context.put_json(keys::BIOMETRIC_ENABLED, &enabled)?;
        self.biometric_enabled = enabled;
        Ok(())
    }

    pub fn first_launch_complete(&self) -> bool {
        self.first_launch_complete
    }

    pub fn mark_first_launch_complete(&mut self) -> Result<()> {
        self.context.put_json(keys::FIRST_LAUNCH_COMPLETE, &true)?;
        self.first_launch_complete = true;
        Ok(())
    }
}

fn read_or_default<T>(context: &StorageContext, key: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    match context.get_json(key) {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            warn!(key, "Unreadable setting, using default: {}", e);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn test_context() -> Arc<StorageContext> {
        Arc::new(StorageContext::with_backend(Arc::new(MemoryStore::new())))
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::load(test_context()).unwrap();
        assert!(settings.protected_apps().is_empty());
        assert_eq!(settings.session_timeout().as_millis(), 30_000);
        assert!(!settings.biometric_enabled());
        assert!(!settings.first_launch_complete());
    }

    #[test]
    fn test_load_requires_initialized_storage() {
        assert!(matches!(
            Settings::load(Arc::new(StorageContext::new())),
            Err(Error::StorageNotInitialized)
        ));
    }

    #[test]
    fn test_protect_persists() {
        let context = test_context();
        let mut settings = Settings::load(Arc::clone(&context)).unwrap();

        assert!(settings.protect(AppId::from("com.bank.app")).unwrap());
        assert!(!settings.protect(AppId::from("com.bank.app")).unwrap());
        settings.set_session_timeout(SessionTimeout::from_millis(60_000).unwrap()).unwrap();
        settings.set_biometric_enabled(true).unwrap();

        let reloaded = Settings::load(context).unwrap();
        assert!(reloaded.is_protected(&AppId::from("com.bank.app")));
        assert_eq!(reloaded.session_timeout().as_millis(), 60_000);
        assert!(reloaded.biometric_enabled());
    }

    #[test]
    fn test_unprotect() {
        let mut settings = Settings::load(test_context()).unwrap();
        let app = AppId::from("com.bank.app");
        settings.protect(app.clone()).unwrap();
        assert!(settings.unprotect(&app).unwrap());
        assert!(!settings.unprotect(&app).unwrap());
        assert!(!settings.is_protected(&app));
    }

    #[test]
    fn test_session_timeout_presets() {
        assert!(SessionTimeout::from_millis(0).is_err());
        assert!(SessionTimeout::from_millis(120_000).unwrap().is_preset());
        assert!(!SessionTimeout::from_millis(45_000).unwrap().is_preset());
        assert!(SessionTimeout::default().is_preset());
    }

    #[test]
    fn test_corrupt_setting_falls_back() {
        let context = test_context();
        context.set(keys::LOCKED_APPS, b"not json").unwrap();
        let settings = Settings::load(context).unwrap();
        assert!(settings.protected_apps().is_empty());
    }
}
