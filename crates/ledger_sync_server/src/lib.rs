//! # Ledger Sync Server
//!
//! The authoritative end of the watermark sync protocol.
//!
//! This crate provides:
//! - The merge algorithm ([`SyncHandler`]): last-writer-wins reconciliation of
//!   a client batch against the caller's records
//! - A transactional, log-backed record store ([`ServerStore`])
//! - Strictly increasing watermark ticks ([`WatermarkClock`])
//! - Session tokens (HMAC-SHA256) and a caller allow-list
//! - The `POST /sync` HTTP endpoint ([`router`], [`serve`])
//!
//! # Protocol
//!
//! A client sends its watermark `W` and the records it changed. In one
//! transaction the server:
//! 1. Reads the caller's records with `last_updated >= W`
//! 2. Drops candidates whose server copy is newer than `W` (the server copy
//!    is echoed back instead)
//! 3. Rejects the request if a candidate id belongs to another caller
//! 4. Stamps the rest with a fresh tick and stores them for the caller
//! 5. Answers with the window plus the accepted records and the new tick
//!
//! # Authentication
//!
//! ```rust
//! use ledger_sync_server::{Credentials, ServerConfig, SyncServer};
//!
//! let config = ServerConfig::default().with_auth(b"a-long-random-secret".to_vec());
//! let server = SyncServer::new(config);
//!
//! let token = server.issue_token("alice@example.com").unwrap();
//! let caller = server.authenticate(&Credentials::Bearer(token)).unwrap();
//! assert_eq!(caller.as_str(), "alice@example.com");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code must not panic on bad input or storage failures.
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod clock;
mod config;
mod error;
mod handler;
mod http;
mod server;
mod store;

pub use auth::{AuthConfig, SessionAuthenticator};
pub use clock::{Clock, ManualClock, SystemClock, WatermarkClock};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::SyncHandler;
pub use http::{router, serve, CALLER_HEADER};
pub use server::{Credentials, SyncServer};
pub use store::{
    CommitOutcome, ServerStore, StoreTransaction, TransactionState, DEFAULT_COMPACTION_THRESHOLD,
};
