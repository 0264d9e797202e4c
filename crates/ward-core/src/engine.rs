//! Lock decision engine
//!
//! Single-writer state machine deciding, per clean foreground transition,
//! whether to allow the app or interpose a challenge:
//!
//! ```text
//! Idle --transition(app)--> Idle                 app not protected / live session
//! Idle --transition(app)--> Challenging(app)     challenge presented
//! Idle --transition(app)--> Idle + neutral       challenge could not be presented
//! Challenging(app) --verified--> Granting(app) --> Idle
//! Challenging(app) --cancel--> Idle + neutral
//! Challenging(a) --transition(b)--> re-evaluated as Idle --transition(b)-->
//! ```
//!
//! Every side effect is a request to the platform or the session ledger.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ledger::{SessionLedger, UnlockSession};
use crate::platform::{Capability, ChallengeMode, PlatformUi};
use crate::settings::{ProtectedAppSet, SessionTimeout};
use crate::types::{AppId, TimestampMs};

/// Engine state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EngineState {
    /// No challenge shown
    #[default]
    Idle,
    /// Challenge active for the app
    Challenging(AppId),
    /// Verifier succeeded, grant being recorded
    Granting(AppId),
}

/// Outcome of one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// App is not protected
    Allow,
    /// Protected app with a live session
    AllowWithSession,
    /// Challenge presented
    Challenge,
    /// Challenge already active for this app
    AlreadyChallenging,
    /// Challenge needed but could not be shown; deflected to neutral surface
    FailedOpen,
}

pub struct LockEngine<P: PlatformUi> {
    platform: P,
    ledger: Arc<SessionLedger>,
    state: EngineState,
}

impl<P: PlatformUi> LockEngine<P> {
    pub fn new(platform: P, ledger: Arc<SessionLedger>) -> Self {
        Self {
            platform,
            ledger,
            state: EngineState::Idle,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// App currently being challenged
    pub fn challenged_app(&self) -> Option<&AppId> {
        match &self.state {
            EngineState::Challenging(app_id) => Some(app_id),
            _ => None,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn ledger(&self) -> &Arc<SessionLedger> {
        &self.ledger
    }

    /// Decide on a clean transition to `app_id`
    ///
    /// A transition to a different app while challenging supersedes the
    /// in-flight challenge and is evaluated as if from `Idle`.
    pub fn on_transition(
        &mut self,
        app_id: &AppId,
        now: TimestampMs,
        protected: &ProtectedAppSet,
        mode: ChallengeMode,
    ) -> Decision {
        let superseded = match &self.state {
            EngineState::Challenging(current) if current == app_id => {
                return Decision::AlreadyChallenging;
            }
            EngineState::Challenging(current) => {
                info!(previous = %current, next = %app_id, "Challenge superseded by newer transition");
                true
            }
            _ => false,
        };

        if !protected.contains(app_id) {
            debug!(%app_id, "Unprotected app allowed");
            self.settle_superseded(superseded);
            return Decision::Allow;
        }

        if self.ledger.has_live_session(app_id, now) {
            debug!(%app_id, "Protected app allowed by live session");
            self.settle_superseded(superseded);
            return Decision::AllowWithSession;
        }

        if !self.platform.capability_granted(Capability::Overlay) {
            warn!(%app_id, "Overlay capability missing, deflecting to neutral surface");
            self.platform.request_capability(Capability::Overlay);
            self.fail_open(superseded);
            return Decision::FailedOpen;
        }

        if !self.platform.present_challenge(app_id, mode) {
            warn!(%app_id, "Challenge presentation refused, deflecting to neutral surface");
            self.fail_open(superseded);
            return Decision::FailedOpen;
        }

        info!(%app_id, method = %mode.method, "Challenge presented");
        self.state = EngineState::Challenging(app_id.clone());
        Decision::Challenge
    }

    fn settle_superseded(&mut self, superseded: bool) {
        if superseded {
            self.platform.dismiss_challenge();
        }
        self.state = EngineState::Idle;
    }

    fn fail_open(&mut self, superseded: bool) {
        if superseded {
            self.platform.dismiss_challenge();
        }
        self.platform.go_to_neutral_surface();
        self.state = EngineState::Idle;
    }

    /// The verifier accepted the credential: grant a session and resume the app
    ///
    /// The app is resumed even if the grant cannot be persisted; the next
    /// transition to it will then challenge again.
    pub fn on_verified(
        &mut self,
        now: TimestampMs,
        timeout: SessionTimeout,
    ) -> Result<(AppId, Option<UnlockSession>)> {
        let app_id = match std::mem::take(&mut self.state) {
            EngineState::Challenging(app_id) => app_id,
            other => {
                self.state = other;
                return Err(Error::NoChallenge);
            }
        };

        self.state = EngineState::Granting(app_id.clone());
        let session = match self.ledger.grant(&app_id, now, timeout.as_millis()) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(%app_id, "Failed to record session: {}", e);
                None
            }
        };

        self.platform.dismiss_challenge();
        self.state = EngineState::Idle;
        info!(%app_id, "Challenge passed, app resumed");

        Ok((app_id, session))
    }

    /// The user backed out of the challenge: go home, never into the app
    pub fn on_cancel(&mut self) -> Result<AppId> {
        let app_id = match std::mem::take(&mut self.state) {
            EngineState::Challenging(app_id) => app_id,
            other => {
                self.state = other;
                return Err(Error::NoChallenge);
            }
        };

        info!(%app_id, "Challenge cancelled");
        self.fail_open(false);
        Ok(app_id)
    }

    /// Present the in-flight challenge again with a new `mode`
    ///
    /// Used when the authoritative credential changes under an open
    /// challenge. A refused presentation deflects to the neutral surface.
    /// Returns false when there is no challenge or it was dropped.
    pub fn represent(&mut self, mode: ChallengeMode) -> bool {
        let Some(app_id) = self.challenged_app().cloned() else {
            return false;
        };
        if self.platform.present_challenge(&app_id, mode) {
            info!(%app_id, method = %mode.method, "Challenge presented with new method");
            return true;
        }
        warn!(%app_id, "Challenge presentation refused, deflecting to neutral surface");
        self.fail_open(true);
        false
    }

    /// Explicitly re-lock one app
    pub fn relock(&mut self, app_id: &AppId) -> Result<bool> {
        self.ledger.invalidate(app_id)
    }

    /// Bulk-clear every session
    pub fn clear_sessions(&mut self) -> Result<usize> {
        self.ledger.invalidate_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlatformCall, RecordingPlatform};
    use crate::storage::{MemoryStore, StorageContext};
    use crate::storage::KeyValueStore;
    use crate::types::AuthMode;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose writes can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Storage("disk full".to_string()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Storage("disk full".to_string()));
            }
            self.inner.remove(key)
        }
    }

    const PIN: ChallengeMode = ChallengeMode {
        method: AuthMode::Pin,
        offer_biometric: false,
    };

    fn engine() -> LockEngine<RecordingPlatform> {
        let context = Arc::new(StorageContext::with_backend(Arc::new(MemoryStore::new())));
        LockEngine::new(RecordingPlatform::new(), Arc::new(SessionLedger::new(context)))
    }

    fn protected(ids: &[&str]) -> ProtectedAppSet {
        ids.iter().map(|id| AppId::from(*id)).collect()
    }

    #[test]
    fn test_unprotected_app_allowed() {
        let mut engine = engine();
        let set = protected(&["com.bank.app"]);

        let decision = engine.on_transition(&AppId::from("com.game.app"), 0, &set, PIN);
        assert_eq!(decision, Decision::Allow);
        assert_eq!(engine.state(), &EngineState::Idle);
        assert!(engine.platform().calls.is_empty());
    }

    #[test]
    fn test_protected_app_challenged_once() {
        let mut engine = engine();
        let set = protected(&["com.bank.app"]);
        let bank = AppId::from("com.bank.app");

        assert_eq!(engine.on_transition(&bank, 0, &set, PIN), Decision::Challenge);
        assert_eq!(engine.on_transition(&bank, 500, &set, PIN), Decision::AlreadyChallenging);
        assert_eq!(engine.platform().presented(), 1);
        assert_eq!(engine.challenged_app(), Some(&bank));
    }

    #[test]
    fn test_verified_grants_session_and_resumes() {
        let mut engine = engine();
        let set = protected(&["com.bank.app"]);
        let bank = AppId::from("com.bank.app");
        let timeout = SessionTimeout::from_millis(30_000).unwrap();

        engine.on_transition(&bank, 0, &set, PIN);
        let (app_id, session) = engine.on_verified(1_000, timeout).unwrap();
        assert_eq!(app_id, bank);
        assert_eq!(session.unwrap().expires_at, 31_000);
        assert_eq!(engine.state(), &EngineState::Idle);
        assert_eq!(engine.platform().last(), Some(&PlatformCall::Dismiss));

        assert_eq!(
            engine.on_transition(&bank, 30_999, &set, PIN),
            Decision::AllowWithSession
        );
        assert_eq!(engine.on_transition(&bank, 31_000, &set, PIN), Decision::Challenge);
    }

    #[test]
    fn test_cancel_goes_neutral() {
        let mut engine = engine();
        let set = protected(&["com.bank.app"]);
        engine.on_transition(&AppId::from("com.bank.app"), 0, &set, PIN);

        engine.on_cancel().unwrap();
        assert_eq!(engine.state(), &EngineState::Idle);
        assert_eq!(engine.platform().last(), Some(&PlatformCall::Neutral));
        assert!(matches!(engine.on_cancel(), Err(Error::NoChallenge)));
    }

    #[test]
    fn test_verified_without_challenge_rejected() {
        let mut engine = engine();
        assert!(matches!(
            engine.on_verified(0, SessionTimeout::default()),
            Err(Error::NoChallenge)
        ));
    }

    #[test]
    fn test_present_failure_fails_open_to_neutral() {
        let mut engine = engine();
        engine.platform_mut().refuse_present = true;
        let set = protected(&["com.bank.app"]);

        let decision = engine.on_transition(&AppId::from("com.bank.app"), 0, &set, PIN);
        assert_eq!(decision, Decision::FailedOpen);
        assert_eq!(engine.state(), &EngineState::Idle);
        assert_eq!(engine.platform().last(), Some(&PlatformCall::Neutral));
    }

    #[test]
    fn test_missing_overlay_requests_capability() {
        let mut engine = engine();
        engine.platform_mut().missing.insert(Capability::Overlay);
        let set = protected(&["com.bank.app"]);

        let decision = engine.on_transition(&AppId::from("com.bank.app"), 0, &set, PIN);
        assert_eq!(decision, Decision::FailedOpen);
        assert_eq!(
            engine.platform().calls,
            vec![
                PlatformCall::RequestCapability(Capability::Overlay),
                PlatformCall::Neutral
            ]
        );
    }

    #[test]
    fn test_newer_transition_supersedes_challenge() {
        let mut engine = engine();
        let set = protected(&["com.bank.app", "com.mail.app"]);

        engine.on_transition(&AppId::from("com.bank.app"), 0, &set, PIN);
        let decision = engine.on_transition(&AppId::from("com.mail.app"), 100, &set, PIN);
        assert_eq!(decision, Decision::Challenge);
        assert_eq!(engine.challenged_app(), Some(&AppId::from("com.mail.app")));
        assert_eq!(engine.platform().presented(), 2);

        // Switching to an unprotected app drops the challenge
        let decision = engine.on_transition(&AppId::from("com.game.app"), 200, &set, PIN);
        assert_eq!(decision, Decision::Allow);
        assert_eq!(engine.state(), &EngineState::Idle);
        assert_eq!(engine.platform().last(), Some(&PlatformCall::Dismiss));
    }

    #[test]
    fn test_superseded_challenge_dismissed_when_failing_open() {
        let mut engine = engine();
        let set = protected(&["com.bank.app", "com.mail.app"]);

        engine.on_transition(&AppId::from("com.bank.app"), 0, &set, PIN);
        engine.platform_mut().calls.clear();
        engine.platform_mut().refuse_present = true;

        let decision = engine.on_transition(&AppId::from("com.mail.app"), 100, &set, PIN);
        assert_eq!(decision, Decision::FailedOpen);
        assert_eq!(engine.state(), &EngineState::Idle);
        assert_eq!(
            engine.platform().calls,
            vec![PlatformCall::Dismiss, PlatformCall::Neutral]
        );
    }

    #[test]
    fn test_superseded_challenge_dismissed_when_overlay_revoked() {
        let mut engine = engine();
        let set = protected(&["com.bank.app", "com.mail.app"]);

        engine.on_transition(&AppId::from("com.bank.app"), 0, &set, PIN);
        engine.platform_mut().calls.clear();
        engine.platform_mut().missing.insert(Capability::Overlay);

        let decision = engine.on_transition(&AppId::from("com.mail.app"), 100, &set, PIN);
        assert_eq!(decision, Decision::FailedOpen);
        assert_eq!(
            engine.platform().calls,
            vec![
                PlatformCall::RequestCapability(Capability::Overlay),
                PlatformCall::Dismiss,
                PlatformCall::Neutral
            ]
        );
    }

    #[test]
    fn test_represent_switches_method() {
        let mut engine = engine();
        let set = protected(&["com.bank.app"]);
        let bank = AppId::from("com.bank.app");
        let pattern = ChallengeMode {
            method: AuthMode::Pattern,
            offer_biometric: false,
        };

        assert!(!engine.represent(pattern));

        engine.on_transition(&bank, 0, &set, PIN);
        assert!(engine.represent(pattern));
        assert_eq!(engine.challenged_app(), Some(&bank));
        assert_eq!(
            engine.platform().last(),
            Some(&PlatformCall::Present(bank.clone(), pattern))
        );

        engine.platform_mut().refuse_present = true;
        assert!(!engine.represent(PIN));
        assert_eq!(engine.state(), &EngineState::Idle);
        assert_eq!(engine.platform().last(), Some(&PlatformCall::Neutral));
    }

    #[test]
    fn test_unpersisted_grant_still_resumes_then_challenges() {
        let store = Arc::new(FlakyStore::default());
        let context = Arc::new(StorageContext::with_backend(store.clone()));
        let mut engine =
            LockEngine::new(RecordingPlatform::new(), Arc::new(SessionLedger::new(context)));
        let set = protected(&["com.bank.app"]);
        let bank = AppId::from("com.bank.app");

        engine.on_transition(&bank, 0, &set, PIN);
        store.fail_writes.store(true, Ordering::SeqCst);

        let (app_id, session) = engine.on_verified(1_000, SessionTimeout::default()).unwrap();
        assert_eq!(app_id, bank);
        assert!(session.is_none());
        assert_eq!(engine.state(), &EngineState::Idle);
        assert_eq!(engine.platform().last(), Some(&PlatformCall::Dismiss));

        // No session was recorded, so the app is not unlocked
        assert!(!engine.ledger().has_live_session(&bank, 1_001));
        assert_eq!(engine.on_transition(&bank, 1_001, &set, PIN), Decision::Challenge);
    }

    #[test]
    fn test_clear_sessions_forces_challenge() {
        let mut engine = engine();
        let set = protected(&["com.bank.app"]);
        let bank = AppId::from("com.bank.app");

        engine.on_transition(&bank, 0, &set, PIN);
        engine.on_verified(0, SessionTimeout::default()).unwrap();
        engine.clear_sessions().unwrap();

        assert_eq!(engine.on_transition(&bank, 1, &set, PIN), Decision::Challenge);
    }

    #[test]
    fn test_relock_single_app() {
        let mut engine = engine();
        let set = protected(&["com.bank.app"]);
        let bank = AppId::from("com.bank.app");

        engine.on_transition(&bank, 0, &set, PIN);
        engine.on_verified(0, SessionTimeout::default()).unwrap();
        assert!(engine.relock(&bank).unwrap());
        assert_eq!(engine.on_transition(&bank, 1, &set, PIN), Decision::Challenge);
    }
}
