//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store holding one record log.
///
/// # Invariants
///
/// - `append` writes at the end and returns the offset of the first byte
/// - `read_all` returns every byte appended since the last `replace`/`truncate`
/// - after `flush` returns, appended bytes survive process termination
/// - `replace` swaps the whole contents atomically: a reader sees either the
///   old log or the new one, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads the whole contents.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Drops every byte after `new_size`.
    ///
    /// Used by log recovery to cut off a torn trailing frame.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole contents with `data`.
    ///
    /// Used by log compaction.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
