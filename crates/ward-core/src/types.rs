//! Core types shared by every Ward component

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch
pub type TimestampMs = u64;

/// Opaque application identifier (package or bundle identifier)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which credential is authoritative
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Pin,
    Pattern,
}

impl AuthMode {
    /// Storage key holding this mode's digest
    pub(crate) fn digest_key(self) -> &'static str {
        match self {
            AuthMode::Pin => crate::storage::keys::PIN_DIGEST,
            AuthMode::Pattern => crate::storage::keys::PATTERN_DIGEST,
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Pin => f.write_str("pin"),
            AuthMode::Pattern => f.write_str("pattern"),
        }
    }
}

/// A raw foreground change reported by the platform observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundTransition {
    pub app_id: AppId,
    pub observed_at: TimestampMs,
}

impl ForegroundTransition {
    pub fn new(app_id: impl Into<AppId>, observed_at: TimestampMs) -> Self {
        Self {
            app_id: app_id.into(),
            observed_at,
        }
    }
}
