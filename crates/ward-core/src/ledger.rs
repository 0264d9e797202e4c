//! Session ledger of time-boxed unlock grants
//!
//! At most one session exists per app. A session is live while
//! `now < expires_at`; expired sessions are logically absent even while
//! still stored, and [`SessionLedger::sweep_expired`] removes them eagerly.
//!
//! Every operation holds the ledger mutex for its whole read-modify-write,
//! so a grant can never interleave with a bulk clear.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::storage::{keys, StorageContext};
use crate::types::{AppId, TimestampMs};

/// Unlock grant for one protected app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockSession {
    pub app_id: AppId,
    pub granted_at: TimestampMs,
    pub expires_at: TimestampMs,
}

impl UnlockSession {
    /// Check if the session is live at the given timestamp
    pub fn is_live(&self, now: TimestampMs) -> bool {
        now < self.expires_at
    }

    /// Milliseconds until expiry (0 if already expired)
    pub fn remaining_ms(&self, now: TimestampMs) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    fn is_well_formed(&self) -> bool {
        self.expires_at > self.granted_at
    }
}

/// Persisted ledger (lazily loaded on first access)
pub struct SessionLedger {
    context: Arc<StorageContext>,
    sessions: Mutex<Option<Vec<UnlockSession>>>,
}

impl SessionLedger {
    pub fn new(context: Arc<StorageContext>) -> Self {
        Self {
            context,
            sessions: Mutex::new(None),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Vec<UnlockSession>>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::Storage("session ledger lock poisoned".to_string()))
    }

    /// Load persisted sessions, discarding malformed records
    fn load(&self) -> Result<Vec<UnlockSession>> {
        match self.context.get_json::<Vec<UnlockSession>>(keys::SESSIONS) {
            Ok(Some(sessions)) => {
                let total = sessions.len();
                let sessions: Vec<_> = sessions.into_iter().filter(|s| s.is_well_formed()).collect();
                if sessions.len() != total {
                    warn!(dropped = total - sessions.len(), "Discarded malformed sessions");
                }
                Ok(sessions)
            }
            Ok(None) => Ok(Vec::new()),
            Err(Error::Serialization(e)) => {
                warn!("Session ledger corrupt, treating as empty: {}", e);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Run `f` over the sessions; persist if it reports a change
    fn with_sessions<T>(
        &self,
        f: impl FnOnce(&mut Vec<UnlockSession>) -> (T, bool),
    ) -> Result<T> {
        let mut guard = self.lock()?;
        let loaded = match guard.take() {
            Some(sessions) => sessions,
            None => self.load()?,
        };

        let mut updated = loaded.clone();
        let (value, changed) = f(&mut updated);

        if changed {
            if let Err(e) = self.context.put_json(keys::SESSIONS, &updated) {
                *guard = Some(loaded);
                return Err(e);
            }
            *guard = Some(updated);
        } else {
            *guard = Some(loaded);
        }

        Ok(value)
    }

    /// Live session for `app_id` at `now`
    pub fn lookup(&self, app_id: &AppId, now: TimestampMs) -> Result<Option<UnlockSession>> {
        self.with_sessions(|sessions| {
            let found = sessions
                .iter()
                .find(|s| &s.app_id == app_id && s.is_live(now))
                .cloned();
            (found, false)
        })
    }

    /// Whether `app_id` has a live session. Storage failure means no session.
    pub fn has_live_session(&self, app_id: &AppId, now: TimestampMs) -> bool {
        match self.lookup(app_id, now) {
            Ok(session) => session.is_some(),
            Err(e) => {
                warn!(%app_id, "Session lookup failed, treating as locked: {}", e);
                false
            }
        }
    }

    /// Create or replace the session for `app_id`
    pub fn grant(
        &self,
        app_id: &AppId,
        now: TimestampMs,
        duration_ms: u64,
    ) -> Result<UnlockSession> {
        if duration_ms == 0 {
            return Err(Error::InvalidSessionTimeout);
        }

        let session = UnlockSession {
            app_id: app_id.clone(),
            granted_at: now,
            expires_at: now.saturating_add(duration_ms),
        };

        self.with_sessions(|sessions| {
            sessions.retain(|s| &s.app_id != app_id);
            sessions.push(session.clone());
            ((), true)
        })?;

        info!(%app_id, expires_at = session.expires_at, "Session granted");
        Ok(session)
    }

    /// Remove the session for `app_id` (explicit re-lock)
    pub fn invalidate(&self, app_id: &AppId) -> Result<bool> {
        let removed = self.with_sessions(|sessions| {
            let before = sessions.len();
            sessions.retain(|s| &s.app_id != app_id);
            let removed = sessions.len() != before;
            (removed, removed)
        })?;

        if removed {
            debug!(%app_id, "Session invalidated");
        }
        Ok(removed)
    }

    /// Remove every session
    pub fn invalidate_all(&self) -> Result<usize> {
        let mut guard = self.lock()?;
        let count = match guard.as_ref() {
            Some(sessions) => sessions.len(),
            None => self.load().map(|s| s.len()).unwrap_or(0),
        };

        // Written unconditionally so a corrupt ledger is overwritten too
        self.context
            .put_json(keys::SESSIONS, &Vec::<UnlockSession>::new())?;
        *guard = Some(Vec::new());

        info!(count, "All sessions invalidated");
        Ok(count)
    }

    /// Remove sessions that have expired at `now`
    pub fn sweep_expired(&self, now: TimestampMs) -> Result<usize> {
        let swept = self.with_sessions(|sessions| {
            let before = sessions.len();
            sessions.retain(|s| s.is_live(now));
            let swept = before - sessions.len();
            (swept, swept > 0)
        })?;

        if swept > 0 {
            debug!(swept, "Swept expired sessions");
        }
        Ok(swept)
    }

    /// All sessions live at `now`
    pub fn live_sessions(&self, now: TimestampMs) -> Result<Vec<UnlockSession>> {
        self.with_sessions(|sessions| {
            let live = sessions.iter().filter(|s| s.is_live(now)).cloned().collect();
            (live, false)
        })
    }
}
