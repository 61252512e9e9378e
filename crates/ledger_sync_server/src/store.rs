//! Transactional server record store.
//!
//! Committed records live in memory, keyed by id and indexed per owner by
//! watermark. Durability comes from a [`RecordLog`] of commit frames; a commit
//! is flushed to the log before it becomes visible.
//!
//! ## Concurrency
//!
//! Transactions are optimistic. Reads go straight to the committed state and
//! record what they observed: point reads remember the version of the id,
//! owner scans remember the owner's last commit. At commit, under a single
//! lock, every observation is checked against the current state. Any change
//! fails the commit with [`ServerError::TransactionConflict`] so the caller
//! can rerun it.
//!
//! ## Watermarks
//!
//! Each commit, read-only ones included, is assigned one tick from the
//! [`WatermarkClock`] while the commit lock is held. Ticks are unique and
//! follow commit order, so a client that has seen tick `W` has seen every
//! version stamped `<= W`.
//!
//! ## Compaction
//!
//! Read-only commits still write a frame, so the log grows with every sync.
//! Once it holds twice as many frames as the last compaction left behind
//! (and at least [`DEFAULT_COMPACTION_THRESHOLD`]), the commit that crosses
//! the mark rewrites it down to one frame per live tick.

use crate::clock::{Clock, SystemClock, WatermarkClock};
use crate::error::{ServerError, ServerResult};
use ledger_core::{Item, Owner, RecordId, RecordLog, Watermark};
use ledger_storage::{InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Position of a commit in the store's history.
type Sequence = u64;

/// Fewest log frames that trigger an automatic compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: u64 = 1024;

#[derive(Debug, Clone)]
struct StoredRecord {
    owner: Owner,
    item: Item,
    sequence: Sequence,
}

#[derive(Debug, Default)]
struct Committed {
    records: HashMap<RecordId, StoredRecord>,
    by_owner: HashMap<Owner, BTreeSet<(Watermark, RecordId)>>,
    owner_sequence: HashMap<Owner, Sequence>,
}

impl Committed {
    fn apply(&mut self, owner: Owner, item: Item, sequence: Sequence) {
        let id = item.id();
        if let Some(old) = self.records.get(&id) {
            if let Some(index) = self.by_owner.get_mut(&old.owner) {
                index.remove(&(old.item.last_updated(), id));
            }
        }
        self.by_owner
            .entry(owner.clone())
            .or_default()
            .insert((item.last_updated(), id));
        self.owner_sequence.insert(owner.clone(), sequence);
        self.records.insert(
            id,
            StoredRecord {
                owner,
                item,
                sequence,
            },
        );
    }
}

/// One record inside a commit frame.
#[derive(Debug, Serialize, Deserialize)]
struct FrameRecord {
    owner: Owner,
    item: Item,
}

/// The unit written to the log per commit.
#[derive(Debug, Serialize, Deserialize)]
struct CommitFrame {
    tick: Watermark,
    #[serde(default)]
    records: Vec<FrameRecord>,
}

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// An optimistic transaction over the server store.
#[derive(Debug)]
pub struct StoreTransaction {
    snapshot: Sequence,
    state: TransactionState,
    /// Point reads: id -> sequence of the version observed (None if absent).
    reads: HashMap<RecordId, Option<Sequence>>,
    /// Owner scans: owner -> that owner's last commit when scanned.
    scans: HashMap<Owner, Option<Sequence>>,
    writes: BTreeMap<RecordId, (Owner, Item)>,
}

impl StoreTransaction {
    fn new(snapshot: Sequence) -> Self {
        Self {
            snapshot,
            state: TransactionState::Active,
            reads: HashMap::new(),
            scans: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Commit sequence the transaction started at.
    #[must_use]
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Stages a record for `owner`. The watermark is assigned at commit.
    pub fn put(&mut self, owner: Owner, item: Item) -> ServerResult<()> {
        self.ensure_active()?;
        self.writes.insert(item.id(), (owner, item));
        Ok(())
    }

    /// Number of staged records.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    fn ensure_active(&self) -> ServerResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => {
                Err(ServerError::Internal("transaction already committed".into()))
            }
            TransactionState::Aborted => {
                Err(ServerError::Internal("transaction already aborted".into()))
            }
        }
    }
}

/// What a successful commit produced.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// The tick assigned to the commit.
    pub tick: Watermark,
    /// The commit's sequence number.
    pub sequence: u64,
    /// The written records, stamped with `tick`.
    pub written: Vec<Item>,
}

struct CommitState {
    log: RecordLog,
    clock: WatermarkClock,
    compact_min: u64,
    compact_at: u64,
}

impl CommitState {
    fn new(log: RecordLog, clock: WatermarkClock, live_frames: u64) -> Self {
        let mut state = Self {
            log,
            clock,
            compact_min: DEFAULT_COMPACTION_THRESHOLD,
            compact_at: 0,
        };
        state.schedule_compaction(live_frames);
        state
    }

    fn schedule_compaction(&mut self, live_frames: u64) {
        self.compact_at = live_frames.saturating_mul(2).max(self.compact_min);
    }
}

/// The authoritative record store.
pub struct ServerStore {
    committed: RwLock<Committed>,
    commit: Mutex<CommitState>,
    committed_seq: AtomicU64,
}

impl ServerStore {
    /// Creates an empty in-memory store on the system clock.
    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty in-memory store on the given clock.
    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            committed: RwLock::new(Committed::default()),
            commit: Mutex::new(CommitState::new(
                RecordLog::empty(Box::new(InMemoryBackend::new())),
                WatermarkClock::new(clock),
                0,
            )),
            committed_seq: AtomicU64::new(0),
        }
    }

    /// Opens a durable store, replaying its commit log.
    ///
    /// The watermark clock resumes after the highest tick in the log.
    pub fn open(backend: Box<dyn StorageBackend>, clock: Arc<dyn Clock>) -> ServerResult<Self> {
        let (log, payloads) = RecordLog::open(backend)?;

        let mut committed = Committed::default();
        let mut ticks = WatermarkClock::new(clock);
        let mut sequence = 0;
        for payload in &payloads {
            let frame: CommitFrame = serde_json::from_slice(payload)
                .map_err(|e| ServerError::Storage(format!("undecodable commit frame: {e}")))?;
            sequence += 1;
            ticks.observe(frame.tick);
            for record in frame.records {
                committed.apply(record.owner, record.item, sequence);
            }
        }

        // One frame per distinct tick plus the clock frame, as compaction writes.
        let live_frames = committed
            .records
            .values()
            .map(|stored| stored.item.last_updated())
            .collect::<BTreeSet<_>>()
            .len() as u64
            + 1;

        info!(
            records = committed.records.len(),
            commits = sequence,
            last_tick = %ticks.last_issued(),
            "server store opened"
        );

        Ok(Self {
            committed: RwLock::new(committed),
            commit: Mutex::new(CommitState::new(log, ticks, live_frames)),
            committed_seq: AtomicU64::new(sequence),
        })
    }

    /// Sets the fewest log frames that trigger an automatic compaction.
    #[must_use]
    pub fn with_compaction_threshold(mut self, frames: u64) -> Self {
        let commit = self.commit.get_mut();
        commit.compact_min = frames.max(1);
        commit.schedule_compaction(0);
        self
    }

    /// Begins a transaction at the current commit sequence.
    pub fn begin(&self) -> StoreTransaction {
        StoreTransaction::new(self.committed_seq.load(Ordering::SeqCst))
    }

    /// Returns `owner`'s records with `last_updated >= since`, ascending.
    ///
    /// The scan is recorded so a concurrent commit for `owner` fails this
    /// transaction.
    pub fn changed_since(
        &self,
        txn: &mut StoreTransaction,
        owner: &Owner,
        since: Watermark,
    ) -> ServerResult<Vec<Item>> {
        txn.ensure_active()?;
        let committed = self.committed.read();
        txn.scans
            .insert(owner.clone(), committed.owner_sequence.get(owner).copied());

        let Some(index) = committed.by_owner.get(owner) else {
            return Ok(Vec::new());
        };
        Ok(index
            .range((since, RecordId::MIN)..)
            .filter_map(|(_, id)| committed.records.get(id))
            .map(|stored| stored.item.clone())
            .collect())
    }

    /// Looks up a record by id across all owners.
    pub fn lookup(
        &self,
        txn: &mut StoreTransaction,
        id: RecordId,
    ) -> ServerResult<Option<(Owner, Item)>> {
        txn.ensure_active()?;
        let committed = self.committed.read();
        let stored = committed.records.get(&id);
        txn.reads.insert(id, stored.map(|s| s.sequence));
        Ok(stored.map(|s| (s.owner.clone(), s.item.clone())))
    }

    /// Commits a transaction.
    ///
    /// `check` sees the tick the commit would get and may veto it; a veto
    /// aborts the transaction without consuming the tick. On success the
    /// staged records are stamped, logged, flushed, then made visible.
    pub fn commit<F>(&self, txn: &mut StoreTransaction, check: F) -> ServerResult<CommitOutcome>
    where
        F: FnOnce(Watermark) -> ServerResult<()>,
    {
        txn.ensure_active()?;
        let mut commit = self.commit.lock();

        if !self.validate(txn) {
            debug!(snapshot = txn.snapshot, "commit validation failed");
            txn.state = TransactionState::Aborted;
            return Err(ServerError::TransactionConflict);
        }

        let tick = commit.clock.peek();
        if let Err(err) = check(tick) {
            txn.state = TransactionState::Aborted;
            return Err(err);
        }

        let writes = std::mem::take(&mut txn.writes);
        let records: Vec<FrameRecord> = writes
            .into_values()
            .map(|(owner, item)| FrameRecord {
                owner,
                item: item.stamped(tick),
            })
            .collect();
        let frame = CommitFrame { tick, records };

        let payload = serde_json::to_vec(&frame)
            .map_err(|e| ServerError::Internal(format!("commit frame encoding: {e}")))?;
        if let Err(err) = commit.log.append(&payload) {
            error!(error = %err, %tick, "failed to persist commit");
            txn.state = TransactionState::Aborted;
            return Err(err.into());
        }
        commit.clock.observe(tick);

        let sequence = self.committed_seq.load(Ordering::SeqCst) + 1;
        let mut written = Vec::with_capacity(frame.records.len());
        {
            let mut committed = self.committed.write();
            for record in frame.records {
                written.push(record.item.clone());
                committed.apply(record.owner, record.item, sequence);
            }
        }
        self.committed_seq.store(sequence, Ordering::SeqCst);
        txn.state = TransactionState::Committed;

        if commit.log.frame_count() >= commit.compact_at {
            // The commit is already durable; a failed rewrite is retried
            // at the next threshold.
            if let Err(err) = self.compact_locked(&mut commit) {
                warn!(error = %err, "automatic compaction failed");
                let frames = commit.log.frame_count();
                commit.schedule_compaction(frames);
            }
        }

        debug!(%tick, sequence, records = written.len(), "transaction committed");
        Ok(CommitOutcome {
            tick,
            sequence,
            written,
        })
    }

    /// Aborts a transaction, discarding staged records.
    pub fn abort(&self, txn: &mut StoreTransaction) {
        if txn.is_active() {
            txn.writes.clear();
            txn.state = TransactionState::Aborted;
        }
    }

    fn validate(&self, txn: &StoreTransaction) -> bool {
        // Nothing committed since the transaction began.
        if self.committed_seq.load(Ordering::SeqCst) == txn.snapshot {
            return true;
        }

        let committed = self.committed.read();
        let reads_ok = txn
            .reads
            .iter()
            .all(|(id, seen)| committed.records.get(id).map(|s| s.sequence) == *seen);
        let scans_ok = txn
            .scans
            .iter()
            .all(|(owner, seen)| committed.owner_sequence.get(owner).copied() == *seen);
        reads_ok && scans_ok
    }

    /// Reads a record outside any transaction.
    pub fn get(&self, id: RecordId) -> Option<(Owner, Item)> {
        self.committed
            .read()
            .records
            .get(&id)
            .map(|s| (s.owner.clone(), s.item.clone()))
    }

    /// Number of stored records, deleted ones included.
    pub fn record_count(&self) -> usize {
        self.committed.read().records.len()
    }

    /// Sequence number of the latest commit.
    pub fn committed_seq(&self) -> u64 {
        self.committed_seq.load(Ordering::SeqCst)
    }

    /// The latest tick issued.
    pub fn last_watermark(&self) -> Watermark {
        self.commit.lock().clock.last_issued()
    }

    /// Rewrites the log with one frame per distinct tick still in use.
    ///
    /// The last issued tick is kept so the clock resumes correctly.
    pub fn compact(&self) -> ServerResult<()> {
        let mut commit = self.commit.lock();
        self.compact_locked(&mut commit)
    }

    /// Number of frames in the commit log.
    pub fn log_frames(&self) -> u64 {
        self.commit.lock().log.frame_count()
    }

    fn compact_locked(&self, commit: &mut CommitState) -> ServerResult<()> {
        let committed = self.committed.read();

        let mut by_tick: BTreeMap<Watermark, Vec<FrameRecord>> = BTreeMap::new();
        for stored in committed.records.values() {
            by_tick
                .entry(stored.item.last_updated())
                .or_default()
                .push(FrameRecord {
                    owner: stored.owner.clone(),
                    item: stored.item.clone(),
                });
        }
        by_tick.entry(commit.clock.last_issued()).or_default();

        let payloads = by_tick
            .into_iter()
            .map(|(tick, records)| serde_json::to_vec(&CommitFrame { tick, records }))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServerError::Internal(format!("commit frame encoding: {e}")))?;
        commit.log.rewrite(&payloads)?;
        commit.schedule_compaction(payloads.len() as u64);
        info!(frames = payloads.len(), "server store compacted");
        Ok(())
    }
}

impl std::fmt::Debug for ServerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStore")
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}
