//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use ward_core::{
    CredentialRules, GuardConfig, HeuristicClassifier, LockoutPolicy, DEBOUNCE_WINDOW_MS,
    DEFAULT_GRID_SIZE, DEFAULT_PATTERN_MIN_NODES, DEFAULT_PIN_LENGTH, MAX_GRID_SIZE,
    MAX_PIN_LENGTH,
};

use crate::error::{DaemonError, Result};

/// Named lockout policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockoutPreset {
    #[default]
    Default,
    Strict,
    Lenient,
}

impl LockoutPreset {
    pub fn policy(self) -> LockoutPolicy {
        match self {
            LockoutPreset::Default => LockoutPolicy::default(),
            LockoutPreset::Strict => LockoutPolicy::strict(),
            LockoutPreset::Lenient => LockoutPolicy::lenient(),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path of the persisted key-value store
    pub store_path: PathBuf,

    /// Unix socket path for IPC
    pub ipc_socket_path: PathBuf,

    /// Identifier of the guard's own UI (never challenged)
    pub own_app_id: String,

    /// Window for collapsing repeated events of the same app
    pub debounce_window_ms: u64,

    pub pin_length: usize,

    /// Pattern grid dimension (N x N)
    pub pattern_grid_size: u8,

    pub pattern_min_nodes: usize,

    pub lockout: LockoutPreset,

    /// Drop persisted sessions at startup instead of honoring them
    pub clear_sessions_on_start: bool,

    /// Period of the expired-session sweep (seconds, 0 disables it)
    pub sweep_interval_secs: u64,

    /// Extra identifiers to treat as non user-facing
    pub ignored_app_ids: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: Self::default_store_path(),
            ipc_socket_path: Self::default_ipc_path(),
            own_app_id: "io.ward.guard".to_string(),
            debounce_window_ms: DEBOUNCE_WINDOW_MS,
            pin_length: DEFAULT_PIN_LENGTH,
            pattern_grid_size: DEFAULT_GRID_SIZE,
            pattern_min_nodes: DEFAULT_PATTERN_MIN_NODES,
            lockout: LockoutPreset::Default,
            clear_sessions_on_start: false,
            sweep_interval_secs: 30,
            ignored_app_ids: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Platform-appropriate default IPC path
    fn default_ipc_path() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, fallback to /tmp
        dirs::runtime_dir()
            .map(|dir| dir.join("ward.sock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/ward.sock"))
    }

    fn default_store_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("ward")
            .join("store.json")
    }

    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("ward")
            .join("daemon.json")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file at `path`, writing defaults there if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        tracing::info!("Created default config at {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pin_length == 0 || self.pin_length > MAX_PIN_LENGTH {
            return Err(DaemonError::Config(format!(
                "pin_length must be between 1 and {}",
                MAX_PIN_LENGTH
            )));
        }
        if self.pattern_grid_size < 2 || self.pattern_grid_size > MAX_GRID_SIZE {
            return Err(DaemonError::Config(format!(
                "pattern_grid_size must be between 2 and {}",
                MAX_GRID_SIZE
            )));
        }
        let nodes = usize::from(self.pattern_grid_size) * usize::from(self.pattern_grid_size);
        if self.pattern_min_nodes == 0 || self.pattern_min_nodes > nodes {
            return Err(DaemonError::Config(format!(
                "pattern_min_nodes must be between 1 and {}",
                nodes
            )));
        }
        if self.own_app_id.is_empty() {
            return Err(DaemonError::Config("own_app_id must not be empty".into()));
        }
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.store_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.ipc_socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            debounce_window_ms: self.debounce_window_ms,
            rules: CredentialRules {
                pin_length: self.pin_length,
                grid_size: self.pattern_grid_size,
                pattern_min_nodes: self.pattern_min_nodes,
            },
            lockout: self.lockout.policy(),
            clear_sessions_on_start: self.clear_sessions_on_start,
        }
    }

    pub fn classifier(&self) -> HeuristicClassifier {
        HeuristicClassifier::new(self.own_app_id.as_str())
            .with_ignored(self.ignored_app_ids.iter().cloned())
    }
}
