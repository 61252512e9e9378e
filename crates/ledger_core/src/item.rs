//! Ledger items and their metadata header.

use crate::date::LedgerDate;
use crate::error::{CoreError, CoreResult};
use crate::id::RecordId;
use crate::watermark::{self, Watermark};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monetary amount in the smallest currency unit.
pub type Amount = i64;

/// The caller identity a record belongs to.
///
/// Owners are assigned and enforced by the server only. They are never part of
/// the wire format and never taken from a client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(String);

impl Owner {
    /// Creates an owner from an authenticated caller identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Returns the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sync metadata carried by every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Stable identifier.
    pub id: RecordId,
    /// Server-assigned watermark; `0` until the server accepts the record.
    #[serde(with = "watermark::decimal", default)]
    pub last_updated: Watermark,
    /// Soft deletion flag.
    #[serde(default)]
    pub is_deleted: bool,
}

impl Meta {
    /// Creates metadata for a brand-new record.
    #[must_use]
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            last_updated: Watermark::UNSYNCED,
            is_deleted: false,
        }
    }
}

/// A ledger entry.
///
/// A live item must have a non-empty subject. A deleted item keeps only its
/// id and deletion flag; its payload is cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Sync metadata.
    pub meta: Meta,
    /// Booking date.
    #[serde(default)]
    pub date: LedgerDate,
    /// What the money was spent on.
    #[serde(default)]
    pub subject: String,
    /// Amount in the smallest currency unit.
    #[serde(default)]
    pub amount: Amount,
}

impl Item {
    /// Creates a new unsynced item with a fresh identifier.
    pub fn new(date: LedgerDate, subject: impl Into<String>, amount: Amount) -> Self {
        Self::with_id(RecordId::generate(), date, subject, amount)
    }

    /// Creates an unsynced item with a known identifier.
    pub fn with_id(
        id: RecordId,
        date: LedgerDate,
        subject: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self {
            meta: Meta::new(id),
            date,
            subject: subject.into(),
            amount,
        }
    }

    /// The record identifier.
    #[must_use]
    pub fn id(&self) -> RecordId {
        self.meta.id
    }

    /// The record's watermark.
    #[must_use]
    pub fn last_updated(&self) -> Watermark {
        self.meta.last_updated
    }

    /// Whether the record is soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.meta.is_deleted
    }

    /// Whether the record has local changes the server has not accepted.
    #[must_use]
    pub fn is_unsynced(&self) -> bool {
        self.meta.last_updated.is_unsynced()
    }

    /// Checks the validity invariant.
    pub fn validate(&self) -> CoreResult<()> {
        if self.meta.is_deleted {
            return Ok(());
        }
        if self.subject.trim().is_empty() {
            return Err(CoreError::invalid_record(self.id(), "subject is empty"));
        }
        Ok(())
    }

    /// Returns true if [`Item::validate`] passes.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Marks the item as locally modified.
    pub fn mark_modified(&mut self) {
        self.meta.last_updated = Watermark::UNSYNCED;
    }

    /// Soft-deletes the item.
    ///
    /// Keeps the identifier, sets the deletion flag, zeroes the payload and
    /// resets the watermark so the deletion syncs like any other edit.
    pub fn destroy(&mut self) {
        *self = Self {
            meta: Meta {
                id: self.meta.id,
                last_updated: Watermark::UNSYNCED,
                is_deleted: true,
            },
            date: LedgerDate::default(),
            subject: String::new(),
            amount: 0,
        };
    }

    /// Returns a copy stamped with a server watermark.
    #[must_use]
    pub fn stamped(mut self, watermark: Watermark) -> Self {
        self.meta.last_updated = watermark;
        self
    }

    /// Compares everything except the watermark.
    #[must_use]
    pub fn same_content(&self, other: &Item) -> bool {
        self.meta.id == other.meta.id
            && self.meta.is_deleted == other.meta.is_deleted
            && self.date == other.date
            && self.subject == other.subject
            && self.amount == other.amount
    }

    /// The item as a `date, subject, amount` row for export.
    #[must_use]
    pub fn csv_fields(&self) -> [String; 3] {
        [
            self.date.to_string(),
            self.subject.clone(),
            self.amount.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coffee() -> Item {
        Item::new(LedgerDate::parse("2024-03-01").unwrap(), "coffee", 500)
    }

    #[test]
    fn new_item_is_unsynced_and_valid() {
        let item = coffee();
        assert!(item.is_unsynced());
        assert!(!item.is_deleted());
        assert!(item.is_valid());
    }

    #[test]
    fn empty_subject_is_invalid() {
        let mut item = coffee();
        item.subject = "   ".into();
        assert!(matches!(
            item.validate(),
            Err(CoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn destroy_clears_payload() {
        let mut item = coffee().stamped(Watermark::new(77));
        let id = item.id();
        item.destroy();

        assert_eq!(item.id(), id);
        assert!(item.is_deleted());
        assert!(item.is_unsynced());
        assert!(item.subject.is_empty());
        assert_eq!(item.amount, 0);
        assert_eq!(item.date, LedgerDate::default());
        assert!(item.is_valid());
    }

    #[test]
    fn json_shape() {
        let id = RecordId::parse("6ba7b810-9dad-41d1-80b4-00c04fd430c8").unwrap();
        let item = Item::with_id(id, LedgerDate::parse("2024-03-01").unwrap(), "coffee", 500)
            .stamped(Watermark::new(1_700_000_000));

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "meta": {
                    "id": "6ba7b810-9dad-41d1-80b4-00c04fd430c8",
                    "last_updated": "1700000000",
                    "is_deleted": false
                },
                "date": "2024-03-01",
                "subject": "coffee",
                "amount": 500
            })
        );

        let back: Item = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn deleted_item_decodes_with_missing_payload() {
        let json = r#"{"meta":{"id":"6ba7b810-9dad-41d1-80b4-00c04fd430c8","last_updated":"0","is_deleted":true}}"#;
        let item: Item = serde_json::from_str(json).unwrap();
        assert!(item.is_deleted());
        assert!(item.is_valid());
        assert_eq!(item.date, LedgerDate::default());
    }

    #[test]
    fn owner_is_not_serialized_with_items() {
        let json = serde_json::to_string(&coffee()).unwrap();
        assert!(!json.contains("owner"));
    }

    #[test]
    fn same_content_ignores_watermark() {
        let item = coffee();
        let synced = item.clone().stamped(Watermark::new(5));
        assert!(item.same_content(&synced));
        assert_ne!(item, synced);
    }
}
