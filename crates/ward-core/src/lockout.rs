//! Progressive lockout policy for brute-force protection
//!
//! The cooldown grows with consecutive failed attempts:
//!
//! - 1-4 failures: No lockout (allow typos)
//! - 5 failures: 30 second lockout
//! - 6 failures: 1 minute lockout
//! - 7 failures: 5 minute lockout
//! - 8+ failures: 30 minute lockout

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::TimestampMs;

/// Progressive lockout policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    /// Failed attempts before the first cooldown
    pub threshold: u32,
    /// Cooldown for each level past the threshold (in seconds)
    pub lockout_durations: Vec<u64>,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            lockout_durations: vec![
                30,   // 5 failures: 30 seconds
                60,   // 6 failures: 1 minute
                300,  // 7 failures: 5 minutes
                1800, // 8+ failures: 30 minutes
            ],
        }
    }
}

impl LockoutPolicy {
    /// Locks out sooner with longer cooldowns
    pub fn strict() -> Self {
        Self {
            threshold: 3,
            lockout_durations: vec![
                60,    // 3 failures: 1 minute
                600,   // 4 failures: 10 minutes
                3600,  // 5 failures: 1 hour
                86400, // 6+ failures: 24 hours
            ],
        }
    }

    /// More attempts allowed, short cooldowns
    pub fn lenient() -> Self {
        Self {
            threshold: 8,
            lockout_durations: vec![
                15,  // 8 failures: 15 seconds
                60,  // 9 failures: 1 minute
                300, // 10+ failures: 5 minutes
            ],
        }
    }

    /// Get the cooldown for the given number of failed attempts
    /// Returns None if not yet locked out
    pub fn lockout_duration_ms(&self, failed_attempts: u32) -> Option<u64> {
        if failed_attempts < self.threshold || self.lockout_durations.is_empty() {
            return None;
        }

        let lockout_level = (failed_attempts - self.threshold) as usize;
        let duration_index = lockout_level.min(self.lockout_durations.len() - 1);

        Some(self.lockout_durations[duration_index] * 1000)
    }

    /// Attempts remaining before the next cooldown starts
    pub fn attempts_before_lockout(&self, failed_attempts: u32) -> u32 {
        if failed_attempts >= self.threshold {
            // Every further failure re-triggers a cooldown
            1
        } else {
            self.threshold - failed_attempts
        }
    }
}

/// Persisted attempt counter and cooldown deadline
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked_until: Option<TimestampMs>,
}

/// Attempt counting with enforced cooldown
#[derive(Clone, Debug)]
pub struct AttemptTracker {
    policy: Option<LockoutPolicy>,
    state: LockoutState,
}

impl AttemptTracker {
    pub fn new(policy: LockoutPolicy, state: LockoutState) -> Self {
        Self {
            policy: Some(policy),
            state,
        }
    }

    /// Counts attempts but never locks out (setup flows)
    pub fn unlimited() -> Self {
        Self {
            policy: None,
            state: LockoutState::default(),
        }
    }

    pub fn state(&self) -> &LockoutState {
        &self.state
    }

    pub fn failed_attempts(&self) -> u32 {
        self.state.failed_attempts
    }

    /// Remaining cooldown at `now`, if locked out
    pub fn locked_out_for(&self, now: TimestampMs) -> Option<u64> {
        self.state
            .locked_until
            .filter(|&until| now < until)
            .map(|until| until - now)
    }

    /// Attempts remaining before the next cooldown
    pub fn attempts_remaining(&self) -> u32 {
        match &self.policy {
            Some(policy) => policy.attempts_before_lockout(self.state.failed_attempts),
            None => u32::MAX,
        }
    }

    /// Record a failure, returning the cooldown started by it (if any)
    pub fn record_failure(&mut self, now: TimestampMs) -> Option<u64> {
        self.state.failed_attempts = self.state.failed_attempts.saturating_add(1);

        let cooldown = self
            .policy
            .as_ref()
            .and_then(|p| p.lockout_duration_ms(self.state.failed_attempts));

        if let Some(duration) = cooldown {
            self.state.locked_until = Some(now.saturating_add(duration));
            info!(
                failed_attempts = self.state.failed_attempts,
                cooldown_ms = duration,
                "Verifier locked out"
            );
        }

        cooldown
    }

    pub fn record_success(&mut self) {
        self.state = LockoutState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_no_lockout_initially() {
        let policy = LockoutPolicy::default();
        for attempts in 0..5 {
            assert!(policy.lockout_duration_ms(attempts).is_none());
        }
    }

    #[test]
    fn test_default_policy_progressive_lockout() {
        let policy = LockoutPolicy::default();

        assert_eq!(policy.lockout_duration_ms(5), Some(30_000));
        assert_eq!(policy.lockout_duration_ms(6), Some(60_000));
        assert_eq!(policy.lockout_duration_ms(7), Some(300_000));
        assert_eq!(policy.lockout_duration_ms(8), Some(1_800_000));
    }

    #[test]
    fn test_lockout_caps_at_max() {
        let policy = LockoutPolicy::strict();
        assert_eq!(policy.lockout_duration_ms(100), Some(86_400_000));
    }

    #[test]
    fn test_tracker_locks_after_threshold() {
        let mut tracker = AttemptTracker::new(LockoutPolicy::strict(), LockoutState::default());

        assert_eq!(tracker.record_failure(1_000), None);
        assert_eq!(tracker.attempts_remaining(), 2);
        assert_eq!(tracker.record_failure(2_000), None);
        assert_eq!(tracker.record_failure(3_000), Some(60_000));

        assert_eq!(tracker.locked_out_for(3_000), Some(60_000));
        assert_eq!(tracker.locked_out_for(62_999), Some(1));
        assert_eq!(tracker.locked_out_for(63_000), None);
    }

    #[test]
    fn test_tracker_success_resets() {
        let mut tracker = AttemptTracker::new(LockoutPolicy::strict(), LockoutState::default());
        for t in 0..3 {
            tracker.record_failure(t);
        }
        tracker.record_success();
        assert_eq!(tracker.failed_attempts(), 0);
        assert_eq!(tracker.locked_out_for(0), None);
    }

    #[test]
    fn test_unlimited_tracker_never_locks() {
        let mut tracker = AttemptTracker::unlimited();
        for t in 0..50 {
            assert_eq!(tracker.record_failure(t), None);
        }
        assert_eq!(tracker.failed_attempts(), 50);
    }
}
