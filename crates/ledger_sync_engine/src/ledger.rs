//! Ledger operations on top of the local store.

use crate::error::{SyncError, SyncResult};
use crate::state::ChangeListener;
use ledger_core::{Amount, Item, LedgerDate, LocalStore, RecordId};
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// A partial edit of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemUpdate {
    /// New booking date.
    pub date: Option<LedgerDate>,
    /// New subject.
    pub subject: Option<String>,
    /// New amount.
    pub amount: Option<Amount>,
}

impl ItemUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the date.
    pub fn with_date(mut self, date: LedgerDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the amount.
    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.subject.is_none() && self.amount.is_none()
    }
}

/// The items of one month and their sum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthSummary {
    /// Year.
    pub year: i32,
    /// Month, `1..=12`.
    pub month: u32,
    /// Active items of the month, sorted like [`Ledger::list`].
    pub items: Vec<Item>,
    /// Sum of the items' amounts.
    pub total: Amount,
}

/// The user-facing ledger.
///
/// Every mutation is validated, written to the local store with watermark
/// `0`, and reported to the change listener so the next sync picks it up.
pub struct Ledger {
    store: Arc<LocalStore>,
    listener: Option<Arc<dyn ChangeListener>>,
}

impl Ledger {
    /// Creates a ledger over a local store.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            listener: None,
        }
    }

    /// Notifies `listener` after every mutation.
    pub fn with_listener(mut self, listener: Arc<dyn ChangeListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Records a new item.
    pub fn create(
        &self,
        date: LedgerDate,
        subject: impl Into<String>,
        amount: Amount,
    ) -> SyncResult<Item> {
        let item = Item::new(date, subject, amount);
        self.save(item)
    }

    /// Edits an active item.
    pub fn update(&self, id: RecordId, update: ItemUpdate) -> SyncResult<Item> {
        let mut item = self.active(id)?;
        if let Some(date) = update.date {
            item.date = date;
        }
        if let Some(subject) = update.subject {
            item.subject = subject;
        }
        if let Some(amount) = update.amount {
            item.amount = amount;
        }
        item.mark_modified();
        self.save(item)
    }

    /// Soft-deletes an active item.
    pub fn destroy(&self, id: RecordId) -> SyncResult<Item> {
        let mut item = self.active(id)?;
        item.destroy();
        self.save(item)
    }

    /// Looks up an item, deleted ones included.
    pub fn get(&self, id: RecordId) -> Option<Item> {
        self.store.get(id)
    }

    /// Active items sorted by date, subject and amount.
    pub fn list(&self) -> Vec<Item> {
        let mut items = self.store.list_active();
        sort_items(&mut items);
        items
    }

    /// Active items booked in the given month.
    pub fn month(&self, year: i32, month: u32) -> MonthSummary {
        let items: Vec<Item> = self
            .list()
            .into_iter()
            .filter(|item| item.date.year() == year && item.date.month() == month)
            .collect();
        let total = items.iter().map(|item| item.amount).sum();
        MonthSummary {
            year,
            month,
            items,
            total,
        }
    }

    /// First days of the months that have active items, newest first.
    pub fn year_months(&self) -> Vec<LedgerDate> {
        let mut months: Vec<LedgerDate> = self
            .store
            .list_active()
            .iter()
            .map(|item| item.date.year_month())
            .collect();
        months.sort_unstable_by(|a, b| b.cmp(a));
        months.dedup();
        months
    }

    /// Writes active items as CSV rows of `date,subject,amount`.
    ///
    /// Returns the number of rows written.
    pub fn export_csv<W: Write>(&self, mut out: W) -> SyncResult<usize> {
        let items = self.list();
        for item in &items {
            write_csv_row(&mut out, &item.csv_fields())?;
        }
        out.flush()?;
        Ok(items.len())
    }

    fn active(&self, id: RecordId) -> SyncResult<Item> {
        self.store
            .get(id)
            .filter(|item| !item.is_deleted())
            .ok_or(SyncError::NotFound { id })
    }

    fn save(&self, item: Item) -> SyncResult<Item> {
        item.validate()
            .map_err(|e| SyncError::InvalidItem(e.to_string()))?;
        self.store.save(item.clone())?;
        debug!(id = %item.id(), deleted = item.is_deleted(), "ledger item saved");
        if let Some(listener) = &self.listener {
            listener.local_change();
        }
        Ok(item)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("records", &self.store.len())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

fn sort_items(items: &mut [Item]) {
    items.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.subject.cmp(&b.subject))
            .then_with(|| a.amount.cmp(&b.amount))
            .then_with(|| a.id().cmp(&b.id()))
    });
}

/// Writes one RFC 4180 row, quoting fields that need it.
fn write_csv_row<W: Write>(out: &mut W, fields: &[String]) -> std::io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        let needs_quotes = field.starts_with(' ')
            || field.contains(|c: char| matches!(c, ',' | '"' | '\r' | '\n'));
        if needs_quotes {
            write!(out, "\"{}\"", field.replace('"', "\"\""))?;
        } else {
            out.write_all(field.as_bytes())?;
        }
    }
    out.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::Watermark;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener(AtomicUsize);

    impl ChangeListener for CountingListener {
        fn local_change(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn date(text: &str) -> LedgerDate {
        LedgerDate::parse(text).unwrap()
    }

    fn ledger() -> (Ledger, Arc<CountingListener>) {
        let listener = Arc::new(CountingListener::default());
        let ledger = Ledger::new(Arc::new(LocalStore::in_memory()))
            .with_listener(Arc::clone(&listener) as Arc<dyn ChangeListener>);
        (ledger, listener)
    }

    #[test]
    fn create_saves_unsynced_item() {
        let (ledger, listener) = ledger();
        let item = ledger.create(date("2024-03-01"), "coffee", 500).unwrap();

        assert_eq!(item.last_updated(), Watermark::UNSYNCED);
        assert_eq!(ledger.get(item.id()), Some(item.clone()));
        assert_eq!(ledger.store().unsynced(), vec![item]);
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn create_rejects_blank_subject() {
        let (ledger, listener) = ledger();
        let result = ledger.create(date("2024-03-01"), "  ", 500);

        assert!(matches!(result, Err(SyncError::InvalidItem(_))));
        assert!(ledger.store().is_empty());
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn update_resets_watermark() {
        let (ledger, _) = ledger();
        let item = ledger.create(date("2024-03-01"), "coffee", 500).unwrap();
        ledger.store().save(item.clone().stamped(Watermark::new(10))).unwrap();

        let updated = ledger
            .update(item.id(), ItemUpdate::new().with_amount(600))
            .unwrap();
        assert_eq!(updated.amount, 600);
        assert_eq!(updated.subject, "coffee");
        assert!(updated.is_unsynced());
        assert_eq!(ledger.get(item.id()), Some(updated));
    }

    #[test]
    fn update_revalidates() {
        let (ledger, _) = ledger();
        let item = ledger.create(date("2024-03-01"), "coffee", 500).unwrap();

        let result = ledger.update(item.id(), ItemUpdate::new().with_subject(""));
        assert!(matches!(result, Err(SyncError::InvalidItem(_))));
        assert_eq!(ledger.get(item.id()), Some(item));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let (ledger, _) = ledger();
        let id = RecordId::generate();
        assert!(matches!(
            ledger.update(id, ItemUpdate::new().with_amount(1)),
            Err(SyncError::NotFound { .. })
        ));
        assert!(matches!(ledger.destroy(id), Err(SyncError::NotFound { .. })));
    }

    #[test]
    fn destroy_keeps_tombstone() {
        let (ledger, listener) = ledger();
        let item = ledger.create(date("2024-03-01"), "coffee", 500).unwrap();

        let deleted = ledger.destroy(item.id()).unwrap();
        assert!(deleted.is_deleted());
        assert!(deleted.is_unsynced());
        assert!(ledger.list().is_empty());
        assert_eq!(ledger.get(item.id()), Some(deleted));
        assert_eq!(listener.0.load(Ordering::SeqCst), 2);

        assert!(matches!(
            ledger.destroy(item.id()),
            Err(SyncError::NotFound { .. })
        ));
    }

    #[test]
    fn list_sorts_by_date_subject_amount() {
        let (ledger, _) = ledger();
        ledger.create(date("2024-03-02"), "bread", 300).unwrap();
        ledger.create(date("2024-03-01"), "coffee", 500).unwrap();
        ledger.create(date("2024-03-01"), "coffee", 400).unwrap();
        ledger.create(date("2024-03-01"), "apples", 900).unwrap();

        let rows: Vec<(String, i64)> = ledger
            .list()
            .into_iter()
            .map(|i| (i.subject, i.amount))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("apples".to_string(), 900),
                ("coffee".to_string(), 400),
                ("coffee".to_string(), 500),
                ("bread".to_string(), 300),
            ]
        );
    }

    #[test]
    fn month_summary() {
        let (ledger, _) = ledger();
        ledger.create(date("2024-03-01"), "coffee", 500).unwrap();
        ledger.create(date("2024-03-31"), "rent", 80_000).unwrap();
        ledger.create(date("2024-04-01"), "coffee", 450).unwrap();
        let gone = ledger.create(date("2024-03-15"), "taxi", 2_000).unwrap();
        ledger.destroy(gone.id()).unwrap();

        let march = ledger.month(2024, 3);
        assert_eq!(march.items.len(), 2);
        assert_eq!(march.total, 80_500);

        assert!(ledger.month(2023, 3).items.is_empty());
    }

    #[test]
    fn year_months_newest_first() {
        let (ledger, _) = ledger();
        ledger.create(date("2023-12-24"), "gifts", 10_000).unwrap();
        ledger.create(date("2024-03-01"), "coffee", 500).unwrap();
        ledger.create(date("2024-03-20"), "coffee", 500).unwrap();
        ledger.create(date("2024-01-05"), "books", 3_000).unwrap();

        assert_eq!(
            ledger.year_months(),
            vec![date("2024-03-01"), date("2024-01-01"), date("2023-12-01")]
        );
    }

    #[test]
    fn export_csv_quotes_when_needed() {
        let (ledger, _) = ledger();
        ledger.create(date("2024-03-01"), "coffee", 500).unwrap();
        ledger.create(date("2024-03-02"), "milk, eggs", 420).unwrap();
        ledger.create(date("2024-03-03"), "the \"good\" tea", 900).unwrap();

        let mut out = Vec::new();
        assert_eq!(ledger.export_csv(&mut out).unwrap(), 3);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "2024-03-01,coffee,500\n\
             2024-03-02,\"milk, eggs\",420\n\
             2024-03-03,\"the \"\"good\"\" tea\",900\n"
        );
    }
}
