//! Platform adapter for the daemon
//!
//! The overlay and navigation live in a separate UI process. Requests from
//! the engine are broadcast as [`UiCommand`]s to every subscribed client;
//! with no subscriber a challenge cannot be shown and the engine fails open.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use ward_core::{AppId, BiometricSensor, Capability, ChallengeMode, EntryFeedback, PlatformUi};

/// Command streamed to subscribed UI clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UiCommand {
    ShowChallenge { app_id: AppId, mode: ChallengeMode },
    DismissChallenge,
    /// Navigate to the home screen
    GoHome,
    Feedback { feedback: EntryFeedback },
    RequestCapability { capability: Capability },
}

/// [`PlatformUi`] over a broadcast channel
pub struct ChannelPlatform {
    sender: broadcast::Sender<UiCommand>,
    granted: HashSet<Capability>,
}

impl ChannelPlatform {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            granted: HashSet::from([Capability::ForegroundObserver, Capability::Overlay]),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiCommand> {
        self.sender.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<UiCommand> {
        self.sender.clone()
    }

    pub fn set_capability(&mut self, capability: Capability, granted: bool) {
        if granted {
            self.granted.insert(capability);
        } else {
            self.granted.remove(&capability);
        }
    }

    fn send(&self, command: UiCommand) -> bool {
        match self.sender.send(command) {
            Ok(receivers) => {
                debug!(receivers, "UI command sent");
                true
            }
            Err(_) => {
                debug!("No UI client subscribed");
                false
            }
        }
    }
}

impl PlatformUi for ChannelPlatform {
    fn present_challenge(&mut self, app_id: &AppId, mode: ChallengeMode) -> bool {
        self.send(UiCommand::ShowChallenge {
            app_id: app_id.clone(),
            mode,
        })
    }

    fn dismiss_challenge(&mut self) {
        self.send(UiCommand::DismissChallenge);
    }

    fn go_to_neutral_surface(&mut self) {
        self.send(UiCommand::GoHome);
    }

    fn show_feedback(&mut self, feedback: EntryFeedback) {
        self.send(UiCommand::Feedback { feedback });
    }

    fn capability_granted(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    fn request_capability(&mut self, capability: Capability) {
        self.send(UiCommand::RequestCapability { capability });
    }
}

/// Biometric sensor owned by the UI process
///
/// The UI reports whether a sensor is enrolled and delivers prompt outcomes
/// asynchronously, so a synchronous prompt never succeeds here.
#[derive(Debug, Default, Clone, Copy)]
pub struct UiBiometric {
    pub available: bool,
}

impl BiometricSensor for UiBiometric {
    fn is_available(&self) -> bool {
        self.available
    }

    fn prompt(&mut self, _app_id: &AppId) -> bool {
        false
    }
}
