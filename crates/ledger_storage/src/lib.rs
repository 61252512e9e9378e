//! # Ledger Storage
//!
//! Append-only byte stores for the ledger record logs.
//!
//! Both the client Local Store and the server store keep their durable state
//! as a log of framed records. This crate provides the byte stores underneath
//! those logs. Backends are **opaque**: they never look inside the bytes they
//! hold; framing, checksums and replay belong to `ledger_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral stores (supports fault injection)
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use ledger_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(b"frame-1").unwrap();
//! backend.append(b"frame-2").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"frame-1frame-2");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
