//! CLI command implementations.

pub mod compact;
pub mod items;
pub mod serve;
pub mod sync;
pub mod token;

use ledger_core::LocalStore;
use ledger_storage::FileBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result type shared by the commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Local item log inside the data directory.
pub fn local_log_path(dir: &Path) -> PathBuf {
    dir.join("items.log")
}

/// Server record log inside the data directory.
pub fn server_log_path(dir: &Path) -> PathBuf {
    dir.join("server.log")
}

/// Opens the local store, creating the data directory if needed.
pub fn open_local_store(dir: &Path) -> CommandResult<Arc<LocalStore>> {
    let backend = FileBackend::open_with_create_dirs(&local_log_path(dir))?;
    Ok(Arc::new(LocalStore::open(Box::new(backend))?))
}
