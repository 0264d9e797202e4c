//! PIN entry state machine

use zeroize::{Zeroize, Zeroizing};

use super::EntryOutcome;
use crate::lockout::AttemptTracker;
use crate::types::TimestampMs;

/// Digit pad with a bounded entry buffer
///
/// The predicate runs synchronously once the buffer reaches the configured
/// length. After acceptance the pad is spent and ignores further input.
pub struct PinPad {
    length: usize,
    buffer: Zeroizing<String>,
    tracker: AttemptTracker,
    error: bool,
    accepted: bool,
}

impl PinPad {
    pub fn new(length: usize, tracker: AttemptTracker) -> Self {
        Self {
            length,
            buffer: Zeroizing::new(String::with_capacity(length)),
            tracker,
            error: false,
            accepted: false,
        }
    }

    /// Number of digits entered so far (for the dot indicator)
    pub fn entered(&self) -> usize {
        self.buffer.len()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Set by a failed entry, cleared by the next input
    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn tracker(&self) -> &AttemptTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut AttemptTracker {
        &mut self.tracker
    }

    pub fn attempts(&self) -> u32 {
        self.tracker.failed_attempts()
    }

    /// Press digit `digit` (0-9)
    pub fn press_digit<F>(&mut self, digit: u8, now: TimestampMs, verify: F) -> EntryOutcome
    where
        F: FnOnce(&[u8]) -> bool,
    {
        if self.accepted || digit > 9 {
            return EntryOutcome::Ignored;
        }
        if let Some(remaining_ms) = self.tracker.locked_out_for(now) {
            return EntryOutcome::LockedOut { remaining_ms };
        }

        self.error = false;
        self.buffer.push(char::from(b'0' + digit));

        if self.buffer.len() < self.length {
            return EntryOutcome::Pending;
        }

        if verify(self.buffer.as_bytes()) {
            self.tracker.record_success();
            self.accepted = true;
            EntryOutcome::Accepted
        } else {
            let cooldown_ms = self.tracker.record_failure(now);
            self.error = true;
            self.buffer.zeroize();
            EntryOutcome::Rejected {
                attempts_remaining: self.tracker.attempts_remaining(),
                cooldown_ms,
            }
        }
    }

    pub fn backspace(&mut self) -> EntryOutcome {
        if self.accepted || self.buffer.pop().is_none() {
            return EntryOutcome::Ignored;
        }
        self.error = false;
        EntryOutcome::Pending
    }

    /// Long-press clear
    pub fn clear(&mut self) -> EntryOutcome {
        if self.accepted || self.buffer.is_empty() {
            return EntryOutcome::Ignored;
        }
        self.error = false;
        self.buffer.zeroize();
        EntryOutcome::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockout::{LockoutPolicy, LockoutState};

    fn pad() -> PinPad {
        PinPad::new(4, AttemptTracker::new(LockoutPolicy::strict(), LockoutState::default()))
    }

    fn enter<F: Fn(&[u8]) -> bool>(pad: &mut PinPad, pin: &str, now: TimestampMs, verify: F) -> EntryOutcome {
        let mut outcome = EntryOutcome::Ignored;
        for c in pin.bytes() {
            outcome = pad.press_digit(c - b'0', now, |entry| verify(entry));
        }
        outcome
    }

    #[test]
    fn test_predicate_called_at_full_length() {
        let mut pad = pad();
        let mut calls = 0;
        for digit in [1, 2, 3] {
            let outcome = pad.press_digit(digit, 0, |_| {
                calls += 1;
                true
            });
            assert_eq!(outcome, EntryOutcome::Pending);
        }
        assert_eq!(calls, 0);
        assert_eq!(pad.entered(), 3);

        let outcome = pad.press_digit(4, 0, |entry| entry == b"1234");
        assert_eq!(outcome, EntryOutcome::Accepted);
        assert!(pad.is_accepted());
        assert_eq!(pad.press_digit(5, 0, |_| true), EntryOutcome::Ignored);
    }

    #[test]
    fn test_failure_clears_and_counts() {
        let mut pad = pad();
        let outcome = enter(&mut pad, "9999", 0, |entry| entry == b"1234");
        assert_eq!(
            outcome,
            EntryOutcome::Rejected {
                attempts_remaining: 2,
                cooldown_ms: None
            }
        );
        assert!(pad.has_error());
        assert_eq!(pad.entered(), 0);
        assert_eq!(pad.attempts(), 1);

        // Next press clears the error flag
        pad.press_digit(1, 0, |_| false);
        assert!(!pad.has_error());
    }

    #[test]
    fn test_lockout_enforced() {
        let mut pad = pad();
        enter(&mut pad, "0000", 0, |_| false);
        enter(&mut pad, "0000", 0, |_| false);
        let outcome = enter(&mut pad, "0000", 1_000, |_| false);
        assert_eq!(
            outcome,
            EntryOutcome::Rejected {
                attempts_remaining: 1,
                cooldown_ms: Some(60_000)
            }
        );

        let mut called = false;
        let outcome = pad.press_digit(1, 30_000, |_| {
            called = true;
            true
        });
        assert_eq!(outcome, EntryOutcome::LockedOut { remaining_ms: 31_000 });
        assert_eq!(pad.entered(), 0);
        assert!(!called);

        assert_eq!(enter(&mut pad, "1234", 61_000, |e| e == b"1234"), EntryOutcome::Accepted);
        assert_eq!(pad.attempts(), 0);
    }

    #[test]
    fn test_backspace_and_clear() {
        let mut pad = pad();
        assert_eq!(pad.backspace(), EntryOutcome::Ignored);
        pad.press_digit(1, 0, |_| true);
        pad.press_digit(2, 0, |_| true);
        assert_eq!(pad.backspace(), EntryOutcome::Pending);
        assert_eq!(pad.entered(), 1);
        assert_eq!(pad.clear(), EntryOutcome::Pending);
        assert_eq!(pad.entered(), 0);
        assert_eq!(pad.clear(), EntryOutcome::Ignored);
    }

    #[test]
    fn test_invalid_digit_ignored() {
        let mut pad = pad();
        assert_eq!(pad.press_digit(10, 0, |_| true), EntryOutcome::Ignored);
        assert_eq!(pad.entered(), 0);
    }
}
