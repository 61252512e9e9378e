//! # Ledger Core
//!
//! Record model and client-side storage for ledger sync.
//!
//! This crate provides:
//! - [`RecordId`]: client-generated version-4 identifiers
//! - [`Watermark`]: the server-assigned logical "last updated" tick
//! - [`Item`]: a ledger entry with its [`Meta`] header
//! - [`RecordLog`]: a checksummed, append-only frame log over a storage backend
//! - [`LocalStore`]: the device-side keyed record store with a watermark index
//!
//! ## Lifecycle
//!
//! An item is created with watermark `0` (unsynced). The first sync assigns a
//! positive watermark; every local edit resets it to `0` until the next sync.
//! Deletion is a soft transition ([`Item::destroy`]) that clears the payload.
//!
//! ```rust
//! use ledger_core::{Item, LedgerDate, LocalStore};
//!
//! let store = LocalStore::in_memory();
//! let date = LedgerDate::parse("2024-03-01").unwrap();
//! let item = Item::new(date, "coffee", 500);
//! store.save(item.clone()).unwrap();
//!
//! assert_eq!(store.unsynced().len(), 1);
//! assert_eq!(store.max_watermark(), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod date;
mod error;
mod id;
mod item;
mod local;
mod log;
mod watermark;

pub use date::LedgerDate;
pub use error::{CoreError, CoreResult};
pub use id::RecordId;
pub use item::{Amount, Item, Meta, Owner};
pub use local::LocalStore;
pub use log::{compute_crc32, encode_frame, RecordLog, FRAME_HEADER_SIZE, FRAME_MAGIC, FRAME_VERSION};
pub use watermark::Watermark;
