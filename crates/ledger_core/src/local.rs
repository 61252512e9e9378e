//! Device-side record store.

use crate::error::CoreResult;
use crate::id::RecordId;
use crate::item::Item;
use crate::log::RecordLog;
use crate::watermark::Watermark;
use ledger_storage::{InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// In-memory state: records by id plus the watermark index.
#[derive(Debug, Default)]
struct Records {
    by_id: HashMap<RecordId, Item>,
    by_watermark: BTreeSet<(Watermark, RecordId)>,
}

impl Records {
    fn put(&mut self, item: Item) {
        let id = item.id();
        if let Some(old) = self.by_id.get(&id) {
            self.by_watermark.remove(&(old.last_updated(), id));
        }
        self.by_watermark.insert((item.last_updated(), id));
        self.by_id.insert(id, item);
    }
}

/// The client's keyed record store.
///
/// Records are keyed by id and indexed by watermark. Every save is appended
/// to a [`RecordLog`] and flushed before it becomes visible, so a store
/// reopened on the same backend sees exactly the saves that returned `Ok`.
///
/// # Example
///
/// ```rust
/// use ledger_core::{Item, LedgerDate, LocalStore, Watermark};
///
/// let store = LocalStore::in_memory();
/// let item = Item::new(LedgerDate::today(), "rent", 90_000);
/// store.save(item.clone().stamped(Watermark::new(10))).unwrap();
///
/// assert_eq!(store.max_watermark(), Some(Watermark::new(10)));
/// assert!(store.unsynced().is_empty());
/// ```
#[derive(Debug)]
pub struct LocalStore {
    records: RwLock<Records>,
    log: Mutex<RecordLog>,
}

impl LocalStore {
    /// Opens a store on a backend, replaying its log.
    ///
    /// When a record appears in several frames the last one wins.
    pub fn open(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let (log, payloads) = RecordLog::open(backend)?;

        let mut records = Records::default();
        for payload in &payloads {
            let item: Item = serde_json::from_slice(payload)?;
            records.put(item);
        }

        info!(
            records = records.by_id.len(),
            frames = payloads.len(),
            "local store opened"
        );

        Ok(Self {
            records: RwLock::new(records),
            log: Mutex::new(log),
        })
    }

    /// Creates an empty store backed by memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(Records::default()),
            log: Mutex::new(RecordLog::empty(Box::new(InMemoryBackend::new()))),
        }
    }

    /// Inserts or replaces a record by id.
    pub fn save(&self, item: Item) -> CoreResult<()> {
        self.save_all(vec![item])
    }

    /// Inserts or replaces several records with one durable write.
    pub fn save_all(&self, items: Vec<Item>) -> CoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let payloads = items
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()?;

        // Hold the log lock across the apply so replay order matches memory.
        let mut log = self.log.lock();
        log.append_all(&payloads)?;

        let mut records = self.records.write();
        for item in items {
            debug!(id = %item.id(), last_updated = %item.last_updated(), "saved record");
            records.put(item);
        }
        Ok(())
    }

    /// Stores records returned by the server, keeping local edits made since
    /// `sent` was read.
    ///
    /// A received record is skipped when the local copy is unsynced and is
    /// no longer the copy that was sent (or was never sent). The check and
    /// the write happen under the log lock, which every save holds, so no
    /// save can slip in between them. Returns the ids that kept their local
    /// version.
    pub fn save_synced(&self, received: Vec<Item>, sent: &[Item]) -> CoreResult<Vec<RecordId>> {
        let sent: HashMap<RecordId, &Item> = sent.iter().map(|item| (item.id(), item)).collect();

        let mut log = self.log.lock();

        let mut kept = Vec::new();
        let mut updates = Vec::with_capacity(received.len());
        {
            let records = self.records.read();
            for item in received {
                let edited = records.by_id.get(&item.id()).is_some_and(|local| {
                    local.is_unsynced()
                        && sent
                            .get(&item.id())
                            .map_or(true, |before| !before.same_content(local))
                });
                if edited {
                    kept.push(item.id());
                } else {
                    updates.push(item);
                }
            }
        }

        if !updates.is_empty() {
            let payloads = updates
                .iter()
                .map(serde_json::to_vec)
                .collect::<Result<Vec<_>, _>>()?;
            log.append_all(&payloads)?;

            let mut records = self.records.write();
            for item in updates {
                debug!(id = %item.id(), last_updated = %item.last_updated(), "saved synced record");
                records.put(item);
            }
        }
        Ok(kept)
    }

    /// Looks up a record by id.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<Item> {
        self.records.read().by_id.get(&id).cloned()
    }

    /// Returns every record, deleted ones included.
    #[must_use]
    pub fn load_all(&self) -> Vec<Item> {
        self.records.read().by_id.values().cloned().collect()
    }

    /// Returns records with `last_updated >= watermark`, ascending.
    #[must_use]
    pub fn records_with_watermark_at_least(&self, watermark: Watermark) -> Vec<Item> {
        let records = self.records.read();
        records
            .by_watermark
            .range((watermark, RecordId::MIN)..)
            .filter_map(|(_, id)| records.by_id.get(id).cloned())
            .collect()
    }

    /// Returns records the server has not yet accepted.
    #[must_use]
    pub fn unsynced(&self) -> Vec<Item> {
        let records = self.records.read();
        records
            .by_watermark
            .range((Watermark::UNSYNCED, RecordId::MIN)..(Watermark::new(1), RecordId::MIN))
            .filter_map(|(_, id)| records.by_id.get(id).cloned())
            .collect()
    }

    /// Highest non-zero watermark in the store.
    ///
    /// Reads the top of the index; unsynced records never count.
    #[must_use]
    pub fn max_watermark(&self) -> Option<Watermark> {
        self.records
            .read()
            .by_watermark
            .iter()
            .next_back()
            .map(|(w, _)| *w)
            .filter(|w| !w.is_unsynced())
    }

    /// Returns records that are not soft-deleted.
    #[must_use]
    pub fn list_active(&self) -> Vec<Item> {
        self.records
            .read()
            .by_id
            .values()
            .filter(|item| !item.is_deleted())
            .cloned()
            .collect()
    }

    /// Number of records, deleted ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().by_id.len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the log with one frame per record.
    ///
    /// Returns the number of frames dropped.
    pub fn compact(&self) -> CoreResult<u64> {
        let mut log = self.log.lock();
        let records = self.records.read();

        let mut items: Vec<&Item> = records.by_id.values().collect();
        items.sort_by_key(|item| (item.last_updated(), item.id()));
        let payloads = items
            .into_iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()?;

        let before = log.frame_count();
        log.rewrite(&payloads)?;
        let dropped = before.saturating_sub(log.frame_count());
        info!(dropped, kept = log.frame_count(), "local store compacted");
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::LedgerDate;
    use proptest::prelude::*;

    fn item(subject: &str, watermark: u64) -> Item {
        Item::new(LedgerDate::parse("2024-03-01").unwrap(), subject, 100)
            .stamped(Watermark::new(watermark))
    }

    #[test]
    fn save_synced_keeps_newer_local_edits() {
        let store = LocalStore::in_memory();
        let sent_coffee = item("coffee", 0);
        let sent_tea = item("tea", 0);
        store.save_all(vec![sent_coffee.clone(), sent_tea.clone()]).unwrap();

        // Edited after the request went out.
        let mut edited_tea = sent_tea.clone();
        edited_tea.amount = 700;
        edited_tea.mark_modified();
        store.save(edited_tea.clone()).unwrap();
        // Created after the request went out, with an id the server also knows.
        let fresh = item("juice", 0);
        store.save(fresh.clone()).unwrap();

        let received = vec![
            sent_coffee.clone().stamped(Watermark::new(5)),
            sent_tea.clone().stamped(Watermark::new(5)),
            fresh.clone().stamped(Watermark::new(5)),
            item("cake", 5),
        ];
        let mut kept = store
            .save_synced(received, &[sent_coffee.clone(), sent_tea.clone()])
            .unwrap();
        kept.sort();

        let mut expected = vec![sent_tea.id(), fresh.id()];
        expected.sort();
        assert_eq!(kept, expected);
        assert_eq!(store.get(sent_coffee.id()).unwrap().last_updated(), Watermark::new(5));
        assert_eq!(store.get(sent_tea.id()), Some(edited_tea));
        assert!(store.get(fresh.id()).unwrap().is_unsynced());
        assert_eq!(store.len(), 4);
        assert_eq!(store.unsynced().len(), 2);
    }

    #[test]
    fn save_synced_races_with_local_saves() {
        use std::sync::Arc;

        let store = Arc::new(LocalStore::in_memory());
        let sent = item("coffee", 0);
        store.save(sent.clone()).unwrap();

        let editor = {
            let store = Arc::clone(&store);
            let mut edit = sent.clone();
            std::thread::spawn(move || {
                for amount in 1..=200 {
                    edit.amount = amount;
                    store.save(edit.clone()).unwrap();
                }
            })
        };
        for tick in 1..=200 {
            store
                .save_synced(vec![sent.clone().stamped(Watermark::new(tick))], &[sent.clone()])
                .unwrap();
        }
        editor.join().unwrap();

        // The last local edit always survives the server copies.
        let last = store.get(sent.id()).unwrap();
        assert_eq!(last.amount, 200);
        assert!(last.is_unsynced());
    }

    #[test]
    fn save_and_get() {
        let store = LocalStore::in_memory();
        let coffee = item("coffee", 0);
        store.save(coffee.clone()).unwrap();

        assert_eq!(store.get(coffee.id()), Some(coffee));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn save_overwrites_by_id_and_reindexes() {
        let store = LocalStore::in_memory();
        let coffee = item("coffee", 0);
        store.save(coffee.clone()).unwrap();
        store.save(coffee.clone().stamped(Watermark::new(12))).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.unsynced().is_empty());
        assert_eq!(store.max_watermark(), Some(Watermark::new(12)));
        assert_eq!(store.records_with_watermark_at_least(Watermark::new(12)).len(), 1);
    }

    #[test]
    fn max_watermark_ignores_unsynced() {
        let store = LocalStore::in_memory();
        assert_eq!(store.max_watermark(), None);

        store.save(item("a", 0)).unwrap();
        assert_eq!(store.max_watermark(), None);

        store.save(item("b", 5)).unwrap();
        store.save(item("c", 9)).unwrap();
        store.save(item("d", 0)).unwrap();
        assert_eq!(store.max_watermark(), Some(Watermark::new(9)));
    }

    #[test]
    fn watermark_range_is_inclusive_and_ascending() {
        let store = LocalStore::in_memory();
        for w in [3, 7, 5, 0, 10] {
            store.save(item("x", w)).unwrap();
        }

        let found: Vec<u64> = store
            .records_with_watermark_at_least(Watermark::new(5))
            .iter()
            .map(|i| i.last_updated().as_u64())
            .collect();
        assert_eq!(found, vec![5, 7, 10]);
    }

    #[test]
    fn list_active_skips_deleted() {
        let store = LocalStore::in_memory();
        let keep = item("keep", 1);
        let mut gone = item("gone", 1);
        gone.destroy();
        store.save_all(vec![keep.clone(), gone]).unwrap();

        assert_eq!(store.list_active(), vec![keep]);
        assert_eq!(store.load_all().len(), 2);
    }

    #[test]
    fn reopen_replays_last_write() {
        let backend = InMemoryBackend::new();
        let coffee = item("coffee", 0);
        {
            let store = LocalStore::open(Box::new(backend.clone())).unwrap();
            store.save(coffee.clone()).unwrap();
            store.save(coffee.clone().stamped(Watermark::new(4))).unwrap();
        }

        let store = LocalStore::open(Box::new(backend)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(coffee.id()).unwrap().last_updated(), Watermark::new(4));
        assert_eq!(store.max_watermark(), Some(Watermark::new(4)));
    }

    #[test]
    fn failed_save_is_not_visible() {
        let backend = InMemoryBackend::new();
        let store = LocalStore::open(Box::new(backend.clone())).unwrap();

        backend.fail_writes(true);
        let coffee = item("coffee", 0);
        assert!(store.save(coffee.clone()).is_err());
        assert!(store.get(coffee.id()).is_none());
    }

    #[test]
    fn compact_keeps_one_frame_per_record() {
        let backend = InMemoryBackend::new();
        let coffee = item("coffee", 0);
        {
            let store = LocalStore::open(Box::new(backend.clone())).unwrap();
            for w in 1..=5 {
                store.save(coffee.clone().stamped(Watermark::new(w))).unwrap();
            }
            assert_eq!(store.compact().unwrap(), 4);
        }

        let store = LocalStore::open(Box::new(backend)).unwrap();
        assert_eq!(store.get(coffee.id()).unwrap().last_updated(), Watermark::new(5));
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.log");
        let coffee = item("coffee", 3);
        {
            let backend = ledger_storage::FileBackend::open(&path).unwrap();
            let store = LocalStore::open(Box::new(backend)).unwrap();
            store.save(coffee.clone()).unwrap();
        }

        let backend = ledger_storage::FileBackend::open(&path).unwrap();
        let store = LocalStore::open(Box::new(backend)).unwrap();
        assert_eq!(store.get(coffee.id()), Some(coffee));
    }

    proptest! {
        #[test]
        fn index_agrees_with_full_scan(watermarks in proptest::collection::vec(0u64..20, 0..40)) {
            let store = LocalStore::in_memory();
            for w in &watermarks {
                store.save(item("p", *w)).unwrap();
            }

            let expected_max = watermarks.iter().copied().filter(|w| *w > 0).max();
            prop_assert_eq!(store.max_watermark().map(Watermark::as_u64), expected_max);

            let unsynced = watermarks.iter().filter(|w| **w == 0).count();
            prop_assert_eq!(store.unsynced().len(), unsynced);

            let at_least_ten = watermarks.iter().filter(|w| **w >= 10).count();
            prop_assert_eq!(store.records_with_watermark_at_least(Watermark::new(10)).len(), at_least_ten);
        }
    }
}
