//! Client sync engine.
//!
//! The engine keeps three pieces of state: the last watermark the server
//! handed out, a dirty flag set by every local save, and a guard that lets
//! only one sync run at a time.
//!
//! A sync sends every local record whose watermark is `0`, then stores every
//! record the server returns and adopts the returned watermark. Nothing local
//! changes unless the whole exchange succeeds.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use ledger_core::{Item, LocalStore, Watermark};
use ledger_sync_protocol::SyncRequest;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Receives a notification whenever the local store changes.
pub trait ChangeListener: Send + Sync {
    /// Called after a local record was saved.
    fn local_change(&self);
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Number of syncs that reached the server and succeeded.
    pub syncs_completed: u64,
    /// Number of calls skipped because nothing was dirty.
    pub syncs_skipped: u64,
    /// Number of failed syncs.
    pub failures: u64,
    /// Number of retries performed by [`SyncEngine::sync_with_retry`].
    pub retries: u64,
    /// Total number of records sent.
    pub records_sent: u64,
    /// Total number of records received.
    pub records_received: u64,
    /// Last successful sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of [`SyncEngine::sync_if_needed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing was dirty; no request was sent.
    Skipped {
        /// The current watermark.
        watermark: Watermark,
    },
    /// A request was exchanged with the server.
    Synced {
        /// The watermark adopted from the response.
        watermark: Watermark,
        /// Number of local records sent.
        sent: usize,
        /// Number of records the server returned.
        received: usize,
    },
}

impl SyncOutcome {
    /// The watermark after this sync.
    pub fn watermark(&self) -> Watermark {
        match self {
            SyncOutcome::Skipped { watermark } | SyncOutcome::Synced { watermark, .. } => {
                *watermark
            }
        }
    }

    /// Returns true if a request was sent.
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }
}

/// Clears the in-flight flag when a sync ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The sync engine manages synchronization with a remote server.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    store: Arc<LocalStore>,
    watermark: Mutex<Option<Watermark>>,
    dirty: AtomicBool,
    in_flight: AtomicBool,
    stats: RwLock<SyncStats>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    ///
    /// A new engine starts dirty so its first sync always reaches the server.
    pub fn new(config: SyncConfig, transport: T, store: Arc<LocalStore>) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            store,
            watermark: Mutex::new(None),
            dirty: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true if local changes are waiting for a sync.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Returns true while a sync is running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Flags local changes for the next sync.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// The watermark to send next.
    ///
    /// Computed once from the local store's highest non-zero watermark, then
    /// taken from each successful response.
    pub fn watermark(&self) -> Watermark {
        let mut watermark = self.watermark.lock();
        *watermark.get_or_insert_with(|| {
            let seeded = self.store.max_watermark().unwrap_or(Watermark::UNSYNCED);
            debug!(watermark = %seeded, "seeded watermark from local store");
            seeded
        })
    }

    /// Syncs with the server if anything changed locally.
    ///
    /// Returns [`SyncError::InProgress`] without sending anything when
    /// another sync is running. On failure the local store is untouched and
    /// the engine stays dirty.
    pub fn sync_if_needed(&self) -> SyncResult<SyncOutcome> {
        let _guard = InFlight::acquire(&self.in_flight).ok_or(SyncError::InProgress)?;

        if !self.dirty.swap(false, Ordering::SeqCst) {
            self.stats.write().syncs_skipped += 1;
            return Ok(SyncOutcome::Skipped {
                watermark: self.watermark(),
            });
        }

        match self.exchange() {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.mark_dirty();
                warn!(error = %e, "sync failed");
                let mut stats = self.stats.write();
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Performs [`SyncEngine::sync_if_needed`] with retry on transient
    /// errors.
    pub fn sync_with_retry(&self) -> SyncResult<SyncOutcome> {
        let retry_config = &self.config.retry;
        let attempts = retry_config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                std::thread::sleep(retry_config.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.sync_if_needed() {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    debug!(attempt, error = %e, "retrying sync");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn exchange(&self) -> SyncResult<SyncOutcome> {
        let watermark = self.watermark();
        let pending = self.store.unsynced();
        let request = SyncRequest {
            record_type: self.config.kind.clone(),
            last_updated: watermark,
            values: pending,
        };
        debug!(%watermark, pending = request.values.len(), "sending sync request");

        let response = self.transport.sync(&request)?;

        if response.record_type != request.record_type {
            return Err(SyncError::Protocol(format!(
                "expected {} in response, got {}",
                request.record_type, response.record_type
            )));
        }
        if response.last_updated < watermark {
            return Err(SyncError::Protocol(format!(
                "watermark went backwards: {} < {}",
                response.last_updated, watermark
            )));
        }

        let received = response.values.len();
        self.apply(&request.values, response.values)?;
        *self.watermark.lock() = Some(response.last_updated);

        let outcome = SyncOutcome::Synced {
            watermark: response.last_updated,
            sent: request.values.len(),
            received,
        };
        {
            let mut stats = self.stats.write();
            stats.syncs_completed += 1;
            stats.records_sent += request.values.len() as u64;
            stats.records_received += received as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }
        info!(
            watermark = %response.last_updated,
            sent = request.values.len(),
            received,
            "sync complete"
        );
        Ok(outcome)
    }

    /// Stores the server's records.
    ///
    /// A record edited locally while the request was in flight keeps its
    /// local version; the edit already marked the engine dirty and goes out
    /// with the next sync.
    fn apply(&self, sent: &[Item], received: Vec<Item>) -> SyncResult<()> {
        for id in self.store.save_synced(received, sent)? {
            debug!(%id, "keeping local edit made during sync");
        }
        Ok(())
    }
}

impl<T: SyncTransport> ChangeListener for SyncEngine<T> {
    fn local_change(&self) {
        self.mark_dirty();
    }
}

impl<T: SyncTransport> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("watermark", &*self.watermark.lock())
            .field("dirty", &self.is_dirty())
            .field("syncing", &self.is_syncing())
            .finish()
    }
}
