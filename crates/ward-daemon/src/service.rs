//! Guard service
//!
//! Owns the single [`Guard`] instance. Observer events and UI input from
//! every connection are applied one at a time under an async mutex, in
//! arrival order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use ward_core::{FileStore, Guard, StorageContext, TimestampMs};

use crate::config::DaemonConfig;
use crate::error::Result;
use crate::platform::{ChannelPlatform, UiBiometric, UiCommand};

/// Guard as hosted by the daemon
pub type DaemonGuard = Guard<ChannelPlatform, UiBiometric>;

/// Buffered UI commands per subscriber
const UI_CHANNEL_CAPACITY: usize = 64;

/// Current wall-clock time in milliseconds
pub fn now_ms() -> TimestampMs {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

pub struct GuardService {
    guard: Mutex<DaemonGuard>,
    events: broadcast::Sender<UiCommand>,
}

impl GuardService {
    /// Open the file store from `config` and build the guard over it
    pub fn open(config: &DaemonConfig) -> Result<Self> {
        let context = Arc::new(StorageContext::new());
        context.initialize(Arc::new(FileStore::open(&config.store_path)?))?;
        info!("Store opened at {:?}", config.store_path);
        Self::with_context(context, config)
    }

    /// Build the guard over an already initialized storage context
    pub fn with_context(context: Arc<StorageContext>, config: &DaemonConfig) -> Result<Self> {
        let platform = ChannelPlatform::new(UI_CHANNEL_CAPACITY);
        let events = platform.sender();
        let guard = Guard::new(
            context,
            config.guard_config(),
            Box::new(config.classifier()),
            platform,
            UiBiometric::default(),
        )?;

        Ok(Self {
            guard: Mutex::new(guard),
            events,
        })
    }

    /// Exclusive access to the guard
    pub async fn guard(&self) -> MutexGuard<'_, DaemonGuard> {
        self.guard.lock().await
    }

    /// Stream of UI commands from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UiCommand> {
        self.events.subscribe()
    }

    /// Remove expired sessions from the ledger
    pub async fn sweep(&self, now: TimestampMs) -> usize {
        match self.guard().await.sweep_expired(now) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Session sweep failed: {}", e);
                0
            }
        }
    }

    /// Periodic eager sweep; expiry is still checked on every lookup
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = self.sweep(now_ms()).await;
            if removed > 0 {
                debug!(removed, "Expired sessions swept");
            }
        }
    }
}
