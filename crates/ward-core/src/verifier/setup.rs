//! Two-step credential setup (create, then confirm)

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::credential::{CredentialDigest, CredentialStore};
use crate::error::Result;
use crate::types::AuthMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Create,
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// First entry captured; waiting for confirmation
    AwaitConfirm,
    /// Confirmation differed; back to the create step, nothing written
    Mismatch,
    /// Credential written and made authoritative
    Complete(CredentialDigest),
}

/// In-memory setup state for one credential
pub struct SetupFlow {
    mode: AuthMode,
    first: Option<Zeroizing<Vec<u8>>>,
}

impl SetupFlow {
    pub fn new(mode: AuthMode) -> Self {
        Self { mode, first: None }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn step(&self) -> SetupStep {
        if self.first.is_some() {
            SetupStep::Confirm
        } else {
            SetupStep::Create
        }
    }

    /// Submit one complete entry (PIN digits or pattern node indices)
    ///
    /// An entry that violates the credential rules at the create step is an
    /// error and leaves the flow at the create step.
    pub fn submit(&mut self, entry: &[u8], credentials: &CredentialStore) -> Result<SetupOutcome> {
        let Some(first) = self.first.take() else {
            match self.mode {
                AuthMode::Pin => credentials.rules().validate_pin(entry)?,
                AuthMode::Pattern => credentials.rules().validate_pattern(entry)?,
            }
            self.first = Some(Zeroizing::new(entry.to_vec()));
            debug!(mode = %self.mode, "Setup entry captured, awaiting confirmation");
            return Ok(SetupOutcome::AwaitConfirm);
        };

        if first.as_slice() != entry {
            info!(mode = %self.mode, "Setup confirmation mismatch, restarting");
            return Ok(SetupOutcome::Mismatch);
        }

        let digest = credentials.create_digest(self.mode, entry)?;
        credentials.set_authoritative(self.mode, &digest)?;
        Ok(SetupOutcome::Complete(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialRules;
    use crate::storage::{MemoryStore, StorageContext};
    use std::sync::Arc;

    fn credentials() -> CredentialStore {
        let context = Arc::new(StorageContext::with_backend(Arc::new(MemoryStore::new())));
        CredentialStore::new(context, CredentialRules::default())
    }

    #[test]
    fn test_matching_confirmation_writes_credential() {
        let credentials = credentials();
        let mut flow = SetupFlow::new(AuthMode::Pin);

        assert_eq!(flow.submit(b"1234", &credentials).unwrap(), SetupOutcome::AwaitConfirm);
        assert_eq!(flow.step(), SetupStep::Confirm);
        assert!(matches!(
            flow.submit(b"1234", &credentials).unwrap(),
            SetupOutcome::Complete(_)
        ));

        assert_eq!(credentials.auth_mode().unwrap(), AuthMode::Pin);
        assert!(credentials.verify(AuthMode::Pin, b"1234"));
    }

    #[test]
    fn test_mismatch_restarts_without_writing() {
        let credentials = credentials();
        let mut flow = SetupFlow::new(AuthMode::Pin);

        flow.submit(b"1234", &credentials).unwrap();
        assert_eq!(flow.submit(b"5678", &credentials).unwrap(), SetupOutcome::Mismatch);
        assert_eq!(flow.step(), SetupStep::Create);
        assert!(!credentials.is_configured().unwrap());
    }

    #[test]
    fn test_invalid_first_entry_stays_at_create() {
        let credentials = credentials();
        let mut flow = SetupFlow::new(AuthMode::Pattern);

        assert!(flow.submit(&[0, 1, 2], &credentials).is_err());
        assert_eq!(flow.step(), SetupStep::Create);

        assert_eq!(
            flow.submit(&[0, 1, 2, 5], &credentials).unwrap(),
            SetupOutcome::AwaitConfirm
        );
        assert!(matches!(
            flow.submit(&[0, 1, 2, 5], &credentials).unwrap(),
            SetupOutcome::Complete(_)
        ));
        assert_eq!(credentials.auth_mode().unwrap(), AuthMode::Pattern);
    }
}
