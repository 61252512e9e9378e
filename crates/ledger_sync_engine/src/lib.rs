//! # Ledger Sync Engine
//!
//! The client end of the watermark sync protocol.
//!
//! This crate provides:
//! - [`SyncEngine`]: dirty tracking, one sync in flight, watermark adoption
//! - [`Ledger`]: create/update/destroy, month summaries and CSV export over a
//!   [`ledger_core::LocalStore`]
//! - [`SyncPoller`]: a tokio task that syncs on an interval and on demand
//! - Transports: [`HttpTransport`] over `reqwest` or an in-process loopback,
//!   and [`MockTransport`] for tests
//!
//! ## Sync cycle
//!
//! 1. Skip unless something changed locally (a fresh engine always syncs once)
//! 2. Send the watermark `W` and every record whose watermark is `0`
//! 3. Store every record the server returns, overwriting by id
//! 4. Adopt the returned watermark
//!
//! A failed exchange leaves the local store and the watermark as they were,
//! so the same records go out again on the next attempt.
//!
//! ## Example
//!
//! ```rust
//! use ledger_core::{LedgerDate, LocalStore};
//! use ledger_sync_engine::{Ledger, MockTransport, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//!
//! let store = Arc::new(LocalStore::in_memory());
//! let engine = Arc::new(SyncEngine::new(
//!     SyncConfig::default(),
//!     MockTransport::new(),
//!     Arc::clone(&store),
//! ));
//! let ledger = Ledger::new(store).with_listener(engine.clone());
//!
//! let item = ledger
//!     .create(LedgerDate::from_ymd(2024, 3, 1).unwrap(), "coffee", 500)
//!     .unwrap();
//! assert!(item.is_unsynced());
//! assert!(engine.is_dirty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod ledger;
mod poller;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{
    ClientCredentials, HttpClient, HttpTransport, LoopbackClient, LoopbackServer, ReqwestClient,
    CALLER_HEADER, SYNC_PATH,
};
pub use ledger::{ItemUpdate, Ledger, MonthSummary};
pub use poller::{SyncPoller, SyncPollerHandle};
pub use state::{ChangeListener, SyncEngine, SyncOutcome, SyncStats};
pub use transport::{MockTransport, SyncTransport};
