//! Foreground event debouncer
//!
//! Turns the observer's noisy stream of foreground notifications into one
//! transition per actual app switch. A repeat of the last seen identifier
//! inside the debounce window is dropped; every other event updates the
//! last-seen state and then passes through the classifier.
//!
//! Confined to one serial execution context; holds no locks.

use tracing::trace;

use crate::classifier::AppClassifier;
use crate::types::{AppId, ForegroundTransition, TimestampMs};
use crate::DEBOUNCE_WINDOW_MS;

pub struct Debouncer {
    window_ms: u64,
    classifier: Box<dyn AppClassifier>,
    last_app_id: Option<AppId>,
    last_event_time: TimestampMs,
}

impl Debouncer {
    pub fn new(classifier: Box<dyn AppClassifier>) -> Self {
        Self::with_window(classifier, DEBOUNCE_WINDOW_MS)
    }

    pub fn with_window(classifier: Box<dyn AppClassifier>, window_ms: u64) -> Self {
        Self {
            window_ms,
            classifier,
            last_app_id: None,
            last_event_time: 0,
        }
    }

    /// Feed one raw event; returns the transition if it should be decided on
    pub fn accept(&mut self, event: ForegroundTransition) -> Option<ForegroundTransition> {
        let ForegroundTransition {
            app_id,
            observed_at,
        } = event;

        if self.is_duplicate(&app_id, observed_at) {
            trace!(%app_id, observed_at, "Duplicate foreground event dropped");
            return None;
        }

        self.last_app_id = Some(app_id.clone());
        self.last_event_time = observed_at;

        if !self.classifier.is_user_facing_app(&app_id) {
            trace!(%app_id, "Non user-facing app ignored");
            return None;
        }

        Some(ForegroundTransition {
            app_id,
            observed_at,
        })
    }

    fn is_duplicate(&self, app_id: &AppId, observed_at: TimestampMs) -> bool {
        // Out-of-order timestamps count as zero elapsed
        self.last_app_id.as_ref() == Some(app_id)
            && observed_at.saturating_sub(self.last_event_time) < self.window_ms
    }

    /// Forget the last-seen app (next event always passes the debounce)
    pub fn reset(&mut self) {
        self.last_app_id = None;
        self.last_event_time = 0;
    }

    pub fn last_app_id(&self) -> Option<&AppId> {
        self.last_app_id.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::HeuristicClassifier;

    fn debouncer() -> Debouncer {
        Debouncer::new(Box::new(HeuristicClassifier::new("io.ward.guard")))
    }

    fn event(id: &str, t: TimestampMs) -> ForegroundTransition {
        ForegroundTransition::new(id, t)
    }

    #[test]
    fn test_duplicate_within_window_dropped() {
        let mut d = debouncer();
        assert!(d.accept(event("com.bank.app", 1_000)).is_some());
        assert!(d.accept(event("com.bank.app", 1_299)).is_none());
    }

    #[test]
    fn test_duplicate_after_window_passes() {
        let mut d = debouncer();
        assert!(d.accept(event("com.bank.app", 1_000)).is_some());
        assert!(d.accept(event("com.bank.app", 1_300)).is_some());
    }

    #[test]
    fn test_window_measured_from_last_accepted() {
        let mut d = debouncer();
        assert!(d.accept(event("com.bank.app", 0)).is_some());
        // Dropped events do not extend the window
        assert!(d.accept(event("com.bank.app", 200)).is_none());
        assert!(d.accept(event("com.bank.app", 300)).is_some());
    }

    #[test]
    fn test_different_app_passes_immediately() {
        let mut d = debouncer();
        assert!(d.accept(event("com.bank.app", 1_000)).is_some());
        assert!(d.accept(event("com.mail.app", 1_001)).is_some());
        assert!(d.accept(event("com.bank.app", 1_002)).is_some());
    }

    #[test]
    fn test_system_ui_filtered_but_recorded() {
        let mut d = debouncer();
        assert!(d.accept(event("com.bank.app", 0)).is_some());
        assert!(d.accept(event("com.android.systemui", 100)).is_none());
        assert_eq!(d.last_app_id(), Some(&AppId::from("com.android.systemui")));
        // Returning right away is a new transition
        assert!(d.accept(event("com.bank.app", 150)).is_some());
    }

    #[test]
    fn test_out_of_order_timestamp_is_duplicate() {
        let mut d = debouncer();
        assert!(d.accept(event("com.bank.app", 5_000)).is_some());
        assert!(d.accept(event("com.bank.app", 4_000)).is_none());
    }

    #[test]
    fn test_reset() {
        let mut d = debouncer();
        assert!(d.accept(event("com.bank.app", 0)).is_some());
        d.reset();
        assert!(d.accept(event("com.bank.app", 10)).is_some());
    }
}
