//! The composed guard
//!
//! Wires the debouncer, lock engine, verifiers, credential store, session
//! ledger and settings into one single-writer object. The daemon holds a
//! `Guard` behind a mutex; every observer event and every challenge input
//! goes through it in arrival order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::classifier::AppClassifier;
use crate::credential::{CredentialRules, CredentialStore};
use crate::debounce::Debouncer;
use crate::engine::{Decision, EngineState, LockEngine};
use crate::error::{Error, Result};
use crate::ledger::{SessionLedger, UnlockSession};
use crate::lockout::{AttemptTracker, LockoutPolicy, LockoutState};
use crate::platform::{BiometricSensor, ChallengeMode, PlatformUi};
use crate::settings::{ProtectedAppSet, SessionTimeout, Settings};
use crate::storage::{keys, StorageContext};
use crate::types::{AppId, AuthMode, ForegroundTransition, TimestampMs};
use crate::verifier::{
    EntryOutcome, GridGeometry, PatternPad, PinPad, Point, SetupFlow, SetupOutcome,
};
use crate::DEBOUNCE_WINDOW_MS;

/// Static guard configuration
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub debounce_window_ms: u64,
    pub rules: CredentialRules,
    pub lockout: LockoutPolicy,
    /// Drop every persisted session when the guard starts
    pub clear_sessions_on_start: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEBOUNCE_WINDOW_MS,
            rules: CredentialRules::default(),
            lockout: LockoutPolicy::default(),
            clear_sessions_on_start: false,
        }
    }
}

impl GuardConfig {
    /// Pattern grid in normalized coordinates (0.0 - 1.0 on both axes)
    pub fn pattern_geometry(&self) -> GridGeometry {
        GridGeometry::new(self.rules.grid_size, 1.0, 1.0)
    }
}

/// Result of one challenge or setup input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    /// No challenge or setup is waiting for this kind of input
    Idle,
    /// Entry progress or failure
    Entry(EntryOutcome),
    /// Challenge passed; the app was resumed
    Unlocked(AppId),
    /// A setup step completed
    Setup(SetupOutcome),
}

/// Snapshot for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardStatus {
    pub challenging: Option<AppId>,
    pub protected_apps: Vec<AppId>,
    pub live_sessions: Vec<UnlockSession>,
    pub auth_mode: AuthMode,
    pub credential_configured: bool,
    pub session_timeout_ms: u64,
    pub biometric_enabled: bool,
    pub first_launch_complete: bool,
    pub failed_attempts: u32,
    pub locked_out_for_ms: Option<u64>,
    pub setup_in_progress: bool,
}

enum ActiveChallenge {
    Pin(PinPad),
    Pattern(PatternPad),
}

enum SetupInput {
    Pin(PinPad),
    Pattern(PatternPad),
}

struct ActiveSetup {
    flow: SetupFlow,
    input: SetupInput,
}

pub struct Guard<P: PlatformUi, B: BiometricSensor> {
    context: Arc<StorageContext>,
    config: GuardConfig,
    debouncer: Debouncer,
    engine: LockEngine<P>,
    credentials: CredentialStore,
    settings: Settings,
    biometric: B,
    /// Failed-attempt counter shared by every credential check
    lockout: AttemptTracker,
    challenge: Option<ActiveChallenge>,
    setup: Option<ActiveSetup>,
}

impl<P: PlatformUi, B: BiometricSensor> Guard<P, B> {
    /// Build a guard over an initialized storage context
    ///
    /// Startup is a cold decision point: no challenge is in progress and
    /// the persisted ledger decides what is unlocked.
    pub fn new(
        context: Arc<StorageContext>,
        config: GuardConfig,
        classifier: Box<dyn AppClassifier>,
        platform: P,
        biometric: B,
    ) -> Result<Self> {
        let settings = Settings::load(Arc::clone(&context))?;
        let ledger = Arc::new(SessionLedger::new(Arc::clone(&context)));

        if config.clear_sessions_on_start {
            ledger.invalidate_all()?;
        }

        let credentials = CredentialStore::new(Arc::clone(&context), config.rules.clone());
        if !credentials.is_configured()? {
            info!("No credential configured yet; setup required");
        }

        let lockout_state = context
            .get_json::<LockoutState>(keys::LOCKOUT_STATE)
            .unwrap_or_else(|e| {
                warn!("Lockout state unreadable: {}", e);
                None
            })
            .unwrap_or_default();
        let lockout = AttemptTracker::new(config.lockout.clone(), lockout_state);

        Ok(Self {
            debouncer: Debouncer::with_window(classifier, config.debounce_window_ms),
            engine: LockEngine::new(platform, ledger),
            credentials,
            settings,
            biometric,
            lockout,
            challenge: None,
            setup: None,
            context,
            config,
        })
    }

    pub fn engine(&self) -> &LockEngine<P> {
        &self.engine
    }

    pub fn platform(&self) -> &P {
        self.engine.platform()
    }

    pub fn platform_mut(&mut self) -> &mut P {
        self.engine.platform_mut()
    }

    pub fn biometric_mut(&mut self) -> &mut B {
        &mut self.biometric
    }

    pub fn ledger(&self) -> &Arc<SessionLedger> {
        self.engine.ledger()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> &EngineState {
        self.engine.state()
    }

    // ---------------------------------------------------------------
    // Observer
    // ---------------------------------------------------------------

    /// Raw foreground change from the platform observer
    ///
    /// Returns the engine's decision for transitions that survive the
    /// debouncer, `None` for dropped events.
    pub fn on_foreground_changed(
        &mut self,
        app_id: impl Into<AppId>,
        observed_at: TimestampMs,
    ) -> Option<Decision> {
        let transition = self
            .debouncer
            .accept(ForegroundTransition::new(app_id, observed_at))?;

        let mode = self.challenge_mode();
        let decision = self.engine.on_transition(
            &transition.app_id,
            transition.observed_at,
            self.settings.protected_apps(),
            mode,
        );

        match decision {
            Decision::Challenge => {
                if !self.credentials.is_configured().unwrap_or(false) {
                    warn!(app_id = %transition.app_id, "Challenging with no credential configured");
                }
                self.challenge = Some(self.new_challenge(mode.method));
            }
            Decision::AlreadyChallenging => {}
            Decision::Allow | Decision::AllowWithSession | Decision::FailedOpen => {
                self.challenge = None;
            }
        }

        Some(decision)
    }

    fn challenge_mode(&self) -> ChallengeMode {
        let method = self.credentials.auth_mode().unwrap_or_else(|e| {
            warn!("Auth mode unreadable, presenting PIN: {}", e);
            AuthMode::Pin
        });
        ChallengeMode {
            method,
            offer_biometric: self.settings.biometric_enabled() && self.biometric.is_available(),
        }
    }

    fn new_challenge(&self, method: AuthMode) -> ActiveChallenge {
        let tracker = self.lockout.clone();
        match method {
            AuthMode::Pin => ActiveChallenge::Pin(PinPad::new(self.config.rules.pin_length, tracker)),
            AuthMode::Pattern => ActiveChallenge::Pattern(PatternPad::new(
                self.config.pattern_geometry(),
                self.config.rules.pattern_min_nodes,
                tracker,
            )),
        }
    }

    // ---------------------------------------------------------------
    // Challenge input
    // ---------------------------------------------------------------

    /// Digit press on the PIN pad (challenge or setup)
    pub fn pin_press(&mut self, digit: u8, now: TimestampMs) -> Result<InputOutcome> {
        let credentials = &self.credentials;
        if let Some(ActiveChallenge::Pin(pad)) = &mut self.challenge {
            *pad.tracker_mut() = self.lockout.clone();
            let outcome = pad.press_digit(digit, now, |entry| credentials.verify_current(entry));
            self.lockout = pad.tracker().clone();
            return Ok(self.after_challenge_entry(outcome, now));
        }

        if let Some(ActiveSetup {
            input: SetupInput::Pin(pad),
            ..
        }) = &mut self.setup
        {
            let mut captured = None;
            let outcome = pad.press_digit(digit, now, |entry| {
                captured = Some(Zeroizing::new(entry.to_vec()));
                true
            });
            return match captured {
                Some(entry) => self.submit_setup_entry(&entry),
                None => Ok(InputOutcome::Entry(outcome)),
            };
        }

        Ok(InputOutcome::Idle)
    }

    pub fn pin_backspace(&mut self) -> InputOutcome {
        match self.active_pin_pad() {
            Some(pad) => InputOutcome::Entry(pad.backspace()),
            None => InputOutcome::Idle,
        }
    }

    /// Long-press clear on the PIN pad
    pub fn pin_clear(&mut self) -> InputOutcome {
        match self.active_pin_pad() {
            Some(pad) => InputOutcome::Entry(pad.clear()),
            None => InputOutcome::Idle,
        }
    }

    fn active_pin_pad(&mut self) -> Option<&mut PinPad> {
        if let Some(ActiveChallenge::Pin(pad)) = &mut self.challenge {
            return Some(pad);
        }
        match &mut self.setup {
            Some(ActiveSetup {
                input: SetupInput::Pin(pad),
                ..
            }) => Some(pad),
            _ => None,
        }
    }

    /// Whole drag gesture on the pattern grid, in normalized coordinates
    pub fn pattern_gesture(&mut self, points: &[Point], now: TimestampMs) -> Result<InputOutcome> {
        let credentials = &self.credentials;
        if let Some(ActiveChallenge::Pattern(pad)) = &mut self.challenge {
            *pad.tracker_mut() = self.lockout.clone();
            let outcome = pad.gesture(points, now, |nodes| credentials.verify_current(nodes));
            self.lockout = pad.tracker().clone();
            return Ok(self.after_challenge_entry(outcome, now));
        }

        if let Some(ActiveSetup {
            input: SetupInput::Pattern(pad),
            ..
        }) = &mut self.setup
        {
            let mut captured = None;
            let outcome = pad.gesture(points, now, |nodes| {
                captured = Some(Zeroizing::new(nodes.to_vec()));
                true
            });
            return match captured {
                Some(entry) => self.submit_setup_entry(&entry),
                None => Ok(InputOutcome::Entry(outcome)),
            };
        }

        Ok(InputOutcome::Idle)
    }

    fn after_challenge_entry(&mut self, outcome: EntryOutcome, now: TimestampMs) -> InputOutcome {
        if outcome.is_failure() || outcome == EntryOutcome::Accepted {
            if let Err(e) = self.persist_lockout() {
                warn!("Failed to persist lockout state: {}", e);
            }
        }

        if let Some(feedback) = outcome.feedback() {
            self.engine.platform_mut().show_feedback(feedback);
        }

        if outcome == EntryOutcome::Accepted {
            return self.unlock(now);
        }
        InputOutcome::Entry(outcome)
    }

    fn unlock(&mut self, now: TimestampMs) -> InputOutcome {
        self.challenge = None;
        match self.engine.on_verified(now, self.settings.session_timeout()) {
            Ok((app_id, _)) => InputOutcome::Unlocked(app_id),
            Err(e) => {
                warn!("Verified without an active challenge: {}", e);
                InputOutcome::Idle
            }
        }
    }

    /// Biometric prompt through the synchronous sensor collaborator
    pub fn attempt_biometric(&mut self, now: TimestampMs) -> InputOutcome {
        let Some(app_id) = self.biometric_target() else {
            return InputOutcome::Idle;
        };
        let success = self.biometric.prompt(&app_id);
        self.biometric_outcome(success, now)
    }

    /// Biometric outcome delivered asynchronously by the platform
    pub fn complete_biometric(&mut self, success: bool, now: TimestampMs) -> InputOutcome {
        if self.biometric_target().is_none() {
            return InputOutcome::Idle;
        }
        self.biometric_outcome(success, now)
    }

    fn biometric_target(&self) -> Option<AppId> {
        let offered = self.settings.biometric_enabled() && self.biometric.is_available();
        if !offered || self.challenge.is_none() {
            return None;
        }
        self.engine.challenged_app().cloned()
    }

    fn biometric_outcome(&mut self, success: bool, now: TimestampMs) -> InputOutcome {
        if success {
            info!("Biometric accepted");
            self.unlock(now)
        } else {
            // Not a credential attempt; the challenge stays up
            InputOutcome::Entry(EntryOutcome::Pending)
        }
    }

    /// User backed out of the challenge
    pub fn cancel_challenge(&mut self) -> Result<AppId> {
        self.challenge = None;
        self.engine.on_cancel()
    }

    // ---------------------------------------------------------------
    // Setup
    // ---------------------------------------------------------------

    /// Start the create/confirm flow for `mode`
    ///
    /// Replacing an existing credential requires the current one, subject
    /// to the same lockout as a challenge.
    pub fn begin_setup(&mut self, mode: AuthMode, current: Option<&[u8]>, now: TimestampMs) -> Result<()> {
        self.authorize_change(current, now)?;

        self.setup = Some(ActiveSetup {
            flow: SetupFlow::new(mode),
            input: self.new_setup_input(mode),
        });
        info!(%mode, "Credential setup started");
        Ok(())
    }

    /// Check `current` against the configured credential, if any
    fn authorize_change(&mut self, current: Option<&[u8]>, now: TimestampMs) -> Result<()> {
        if !self.credentials.is_configured()? {
            return Ok(());
        }

        if self.lockout.locked_out_for(now).is_some() {
            return Err(Error::Unauthorized);
        }

        let verified = current.is_some_and(|c| self.credentials.verify_current(c));
        if verified {
            self.lockout.record_success();
        } else {
            self.lockout.record_failure(now);
        }
        self.persist_lockout()?;

        if verified {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    fn persist_lockout(&self) -> Result<()> {
        self.context.put_json(keys::LOCKOUT_STATE, self.lockout.state())
    }

    fn reset_lockout(&mut self) {
        self.lockout = AttemptTracker::new(self.config.lockout.clone(), LockoutState::default());
    }

    pub fn cancel_setup(&mut self) -> bool {
        self.setup.take().is_some()
    }

    pub fn setup_in_progress(&self) -> bool {
        self.setup.is_some()
    }

    fn new_setup_input(&self, mode: AuthMode) -> SetupInput {
        match mode {
            AuthMode::Pin => SetupInput::Pin(PinPad::new(
                self.config.rules.pin_length,
                AttemptTracker::unlimited(),
            )),
            AuthMode::Pattern => SetupInput::Pattern(PatternPad::new(
                self.config.pattern_geometry(),
                self.config.rules.pattern_min_nodes,
                AttemptTracker::unlimited(),
            )),
        }
    }

    fn submit_setup_entry(&mut self, entry: &[u8]) -> Result<InputOutcome> {
        let Some(mode) = self.setup.as_ref().map(|s| s.flow.mode()) else {
            return Ok(InputOutcome::Idle);
        };
        // Fresh pad for the next step whatever the result
        let input = self.new_setup_input(mode);
        let Some(setup) = self.setup.as_mut() else {
            return Ok(InputOutcome::Idle);
        };
        setup.input = input;

        let outcome = setup.flow.submit(entry, &self.credentials)?;
        if let SetupOutcome::Complete(_) = &outcome {
            self.setup = None;
            self.reset_lockout();
            self.persist_lockout()?;
            if !self.settings.first_launch_complete() {
                self.settings.mark_first_launch_complete()?;
            }
            self.rearm_challenge(mode);
        }
        Ok(InputOutcome::Setup(outcome))
    }

    /// Swap the open challenge's input for the newly committed method
    fn rearm_challenge(&mut self, method: AuthMode) {
        let stale = match &self.challenge {
            Some(ActiveChallenge::Pin(_)) => method != AuthMode::Pin,
            Some(ActiveChallenge::Pattern(_)) => method != AuthMode::Pattern,
            None => false,
        };
        if !stale {
            return;
        }

        let mode = self.challenge_mode();
        if self.engine.represent(mode) {
            self.challenge = Some(self.new_challenge(method));
        } else {
            self.challenge = None;
        }
    }

    // ---------------------------------------------------------------
    // Settings and sessions
    // ---------------------------------------------------------------

    pub fn protected_apps(&self) -> &ProtectedAppSet {
        self.settings.protected_apps()
    }

    pub fn protect(&mut self, app_id: AppId) -> Result<bool> {
        self.settings.protect(app_id)
    }

    /// Stop guarding an app and drop its session
    pub fn unprotect(&mut self, app_id: &AppId) -> Result<bool> {
        let removed = self.settings.unprotect(app_id)?;
        if removed {
            self.engine.relock(app_id)?;
        }
        Ok(removed)
    }

    pub fn set_session_timeout(&mut self, timeout: SessionTimeout) -> Result<()> {
        self.settings.set_session_timeout(timeout)
    }

    pub fn set_biometric_enabled(&mut self, enabled: bool) -> Result<()> {
        self.settings.set_biometric_enabled(enabled)
    }

    pub fn relock(&mut self, app_id: &AppId) -> Result<bool> {
        self.engine.relock(app_id)
    }

    pub fn clear_sessions(&mut self) -> Result<usize> {
        self.engine.clear_sessions()
    }

    pub fn sweep_expired(&self, now: TimestampMs) -> Result<usize> {
        self.ledger().sweep_expired(now)
    }

    /// Full reset of credentials, lockout state and every session
    ///
    /// Requires the current credential when one is configured.
    pub fn factory_reset(&mut self, current: Option<&[u8]>, now: TimestampMs) -> Result<()> {
        self.authorize_change(current, now)?;
        self.challenge = None;
        self.setup = None;
        if self.engine.challenged_app().is_some() {
            self.engine.on_cancel()?;
        }
        self.credentials.reset()?;
        self.reset_lockout();
        self.engine.clear_sessions()?;
        self.debouncer.reset();
        self.settings = Settings::load(Arc::clone(&self.context))?;
        Ok(())
    }

    pub fn status(&self, now: TimestampMs) -> GuardStatus {
        let tracker = &self.lockout;
        let live_sessions = self.ledger().live_sessions(now).unwrap_or_else(|e| {
            warn!("Session ledger unreadable: {}", e);
            Vec::new()
        });

        GuardStatus {
            challenging: self.engine.challenged_app().cloned(),
            protected_apps: self.settings.protected_apps().iter().cloned().collect(),
            live_sessions,
            auth_mode: self.credentials.auth_mode().unwrap_or_default(),
            credential_configured: self.credentials.is_configured().unwrap_or(false),
            session_timeout_ms: self.settings.session_timeout().as_millis(),
            biometric_enabled: self.settings.biometric_enabled(),
            first_launch_complete: self.settings.first_launch_complete(),
            failed_attempts: tracker.failed_attempts(),
            locked_out_for_ms: tracker.locked_out_for(now),
            setup_in_progress: self.setup.is_some(),
        }
    }
}
