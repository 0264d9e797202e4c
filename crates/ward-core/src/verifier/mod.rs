//! Challenge verifiers
//!
//! Interactive entry state machines for PIN and pattern challenges, plus
//! the two-step setup flow built on top of them. The verifiers never read
//! credentials themselves: the caller supplies a verify predicate.

mod pattern;
mod pin;
mod setup;

pub use pattern::{GridGeometry, PatternPad, Point};
pub use pin::PinPad;
pub use setup::{SetupFlow, SetupOutcome, SetupStep};

use crate::platform::EntryFeedback;

/// Result of feeding input to a verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Input had no effect
    Ignored,
    /// Entry in progress
    Pending,
    /// Predicate accepted the entry
    Accepted,
    /// Predicate rejected the entry; buffer cleared
    Rejected {
        attempts_remaining: u32,
        cooldown_ms: Option<u64>,
    },
    /// Pattern released below the minimum length; predicate not consulted
    TooShort {
        attempts_remaining: u32,
        cooldown_ms: Option<u64>,
    },
    /// Input refused during a cooldown
    LockedOut { remaining_ms: u64 },
}

impl EntryOutcome {
    /// Feedback the challenge UI should show, if any
    pub fn feedback(&self) -> Option<EntryFeedback> {
        match *self {
            EntryOutcome::Rejected {
                attempts_remaining,
                cooldown_ms: None,
            } => Some(EntryFeedback::Rejected { attempts_remaining }),
            EntryOutcome::TooShort {
                attempts_remaining,
                cooldown_ms: None,
            } => Some(EntryFeedback::TooShort { attempts_remaining }),
            EntryOutcome::Rejected {
                cooldown_ms: Some(remaining_ms),
                ..
            }
            | EntryOutcome::TooShort {
                cooldown_ms: Some(remaining_ms),
                ..
            }
            | EntryOutcome::LockedOut { remaining_ms } => {
                Some(EntryFeedback::LockedOut { remaining_ms })
            }
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EntryOutcome::Rejected { .. } | EntryOutcome::TooShort { .. }
        )
    }
}
