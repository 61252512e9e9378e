//! # Ledger Sync Protocol
//!
//! Wire types for the watermark sync protocol.
//!
//! This crate provides:
//! - [`SyncRequest`] / [`SyncResponse`]: the `{type, last_updated, values}` envelope
//! - [`KindRegistry`]: the closed table of record kinds and their codecs
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod kind;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use kind::{KindCodec, KindRegistry, ITEMS_KIND};
pub use messages::{DecodedRequest, SyncRequest, SyncResponse};
