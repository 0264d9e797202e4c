//! Ward Core - Application guard decision logic
//!
//! This crate provides the components that decide, for every foreground
//! app switch, whether a protected application may be shown or must be
//! challenged first:
//!
//! - Storage context and key-value persistence
//! - Credential store (Argon2id digests of the PIN or pattern)
//! - Session ledger of time-boxed unlock grants
//! - Foreground event debouncer and app classifier
//! - Lock decision engine
//! - PIN and pattern challenge verifiers with progressive lockout
//! - The composed [`Guard`] facade used by the daemon

pub mod classifier;
pub mod credential;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod lockout;
pub mod platform;
pub mod settings;
pub mod storage;
pub mod types;
pub mod verifier;

pub use classifier::{AppClassifier, ExactListClassifier, HeuristicClassifier};
pub use credential::{encode_pattern, CredentialDigest, CredentialRules, CredentialStore};
pub use debounce::Debouncer;
pub use engine::{Decision, EngineState, LockEngine};
pub use error::{Error, Result};
pub use guard::{Guard, GuardConfig, GuardStatus, InputOutcome};
pub use ledger::{SessionLedger, UnlockSession};
pub use lockout::{AttemptTracker, LockoutPolicy, LockoutState};
pub use platform::{
    BiometricSensor, Capability, ChallengeMode, EntryFeedback, NoBiometric, PlatformCall,
    PlatformUi, RecordingPlatform, ScriptedBiometric,
};
pub use settings::{ProtectedAppSet, SessionTimeout, Settings};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageContext};
pub use types::{AppId, AuthMode, ForegroundTransition, TimestampMs};
pub use verifier::{
    EntryOutcome, GridGeometry, PatternPad, PinPad, Point, SetupFlow, SetupOutcome, SetupStep,
};

/// Default debounce window for repeated events of the same app
pub const DEBOUNCE_WINDOW_MS: u64 = 300;

/// Default PIN length
pub const DEFAULT_PIN_LENGTH: usize = 4;

/// Longest accepted PIN
pub const MAX_PIN_LENGTH: usize = 16;

/// Default pattern grid dimension (N x N)
pub const DEFAULT_GRID_SIZE: u8 = 3;

/// Largest grid whose node indices fit in a `u8`
pub const MAX_GRID_SIZE: u8 = 16;

/// Default minimum number of pattern nodes
pub const DEFAULT_PATTERN_MIN_NODES: usize = 4;

/// Default session timeout in milliseconds
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;
