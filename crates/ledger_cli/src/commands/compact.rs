//! Compact command implementation.

use super::{open_local_store, server_log_path, CommandResult};
use ledger_storage::FileBackend;
use ledger_sync_server::{ServerStore, SystemClock};
use std::path::Path;
use std::sync::Arc;

/// Runs the compact command.
pub fn run(dir: &Path, server: bool) -> CommandResult {
    if server {
        let path = server_log_path(dir);
        if !path.exists() {
            return Err(format!("no server log at {}", path.display()).into());
        }
        let store = ServerStore::open(Box::new(FileBackend::open(&path)?), Arc::new(SystemClock))?;
        store.compact()?;
        println!("Compacted {} record(s)", store.record_count());
    } else {
        let store = open_local_store(dir)?;
        let dropped = store.compact()?;
        println!("Dropped {dropped} superseded frame(s), kept {}", store.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Item, LedgerDate};

    #[test]
    fn compacts_local_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_local_store(dir.path()).unwrap();
            let mut item = Item::new(LedgerDate::from_ymd(2024, 3, 1).unwrap(), "coffee", 500);
            store.save(item.clone()).unwrap();
            item.amount = 600;
            store.save(item).unwrap();
        }

        run(dir.path(), false).unwrap();
        let store = open_local_store(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load_all()[0].amount, 600);
    }

    #[test]
    fn missing_server_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(dir.path(), true).is_err());
    }
}
