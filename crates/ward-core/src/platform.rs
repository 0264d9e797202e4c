//! Platform collaborators
//!
//! The engine never touches the overlay, home screen or biometric sensor
//! directly. It issues requests through these traits and treats every
//! refusal as a reason to deflect to the neutral surface.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{AppId, AuthMode};

/// OS-granted capabilities the guard depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Observe foreground app transitions
    ForegroundObserver,
    /// Present the challenge above other apps
    Overlay,
}

/// How a challenge should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeMode {
    pub method: AuthMode,
    pub offer_biometric: bool,
}

/// Feedback for the challenge UI after an entry is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryFeedback {
    /// Wrong entry: shake, vibrate, show remaining attempts
    Rejected { attempts_remaining: u32 },
    /// Pattern released with too few nodes
    TooShort { attempts_remaining: u32 },
    /// Input refused until the cooldown ends
    LockedOut { remaining_ms: u64 },
}

/// Overlay and navigation requests issued by the engine
pub trait PlatformUi: Send {
    /// Show the challenge for `app_id`. Returns false if the platform refused.
    fn present_challenge(&mut self, app_id: &AppId, mode: ChallengeMode) -> bool;

    /// Hide the challenge, revealing the app underneath
    fn dismiss_challenge(&mut self);

    /// Navigate to the home screen
    fn go_to_neutral_surface(&mut self);

    fn show_feedback(&mut self, _feedback: EntryFeedback) {}

    fn capability_granted(&self, _capability: Capability) -> bool {
        true
    }

    fn request_capability(&mut self, _capability: Capability) {}
}

/// Biometric sensor collaborator
pub trait BiometricSensor: Send {
    fn is_available(&self) -> bool;

    /// Prompt and wait for the outcome
    fn prompt(&mut self, app_id: &AppId) -> bool;
}

/// Device without a biometric sensor
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBiometric;

impl BiometricSensor for NoBiometric {
    fn is_available(&self) -> bool {
        false
    }

    fn prompt(&mut self, _app_id: &AppId) -> bool {
        false
    }
}

/// Request recorded by [`RecordingPlatform`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Present(AppId, ChallengeMode),
    Dismiss,
    Neutral,
    Feedback(EntryFeedback),
    RequestCapability(Capability),
}

/// Platform double that records every request
///
/// Use for tests and headless embedding.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    pub calls: Vec<PlatformCall>,
    /// When set, `present_challenge` reports failure
    pub refuse_present: bool,
    pub missing: HashSet<Capability>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, PlatformCall::Present(..)))
            .count()
    }

    pub fn last(&self) -> Option<&PlatformCall> {
        self.calls.last()
    }
}

impl PlatformUi for RecordingPlatform {
    fn present_challenge(&mut self, app_id: &AppId, mode: ChallengeMode) -> bool {
        if self.refuse_present {
            return false;
        }
        self.calls.push(PlatformCall::Present(app_id.clone(), mode));
        true
    }

    fn dismiss_challenge(&mut self) {
        self.calls.push(PlatformCall::Dismiss);
    }

    fn go_to_neutral_surface(&mut self) {
        self.calls.push(PlatformCall::Neutral);
    }

    fn show_feedback(&mut self, feedback: EntryFeedback) {
        self.calls.push(PlatformCall::Feedback(feedback));
    }

    fn capability_granted(&self, capability: Capability) -> bool {
        !self.missing.contains(&capability)
    }

    fn request_capability(&mut self, capability: Capability) {
        self.calls.push(PlatformCall::RequestCapability(capability));
    }
}

/// Biometric double with a scripted outcome
#[derive(Debug, Default, Clone)]
pub struct ScriptedBiometric {
    pub available: bool,
    pub succeed: bool,
    pub prompts: usize,
}

impl BiometricSensor for ScriptedBiometric {
    fn is_available(&self) -> bool {
        self.available
    }

    fn prompt(&mut self, _app_id: &AppId) -> bool {
        self.prompts += 1;
        self.available && self.succeed
    }
}
