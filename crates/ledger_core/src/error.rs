//! Error types for the ledger core.

use crate::id::RecordId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the record model and the local store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] ledger_storage::StorageError),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Text is not a canonical version-4 identifier.
    #[error("invalid identifier: {value:?}")]
    InvalidId {
        /// The rejected text.
        value: String,
    },

    /// Text is not a `YYYY-MM-DD` calendar date.
    #[error("invalid date: {value:?}")]
    InvalidDate {
        /// The rejected text.
        value: String,
    },

    /// Text is not a decimal watermark.
    #[error("invalid watermark: {value:?}")]
    InvalidWatermark {
        /// The rejected text.
        value: String,
    },

    /// A record violates the validity invariant.
    #[error("invalid record {id}: {reason}")]
    InvalidRecord {
        /// The offending record.
        id: RecordId,
        /// Which rule it breaks.
        reason: String,
    },

    /// The record log is corrupted.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected in a log frame.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the frame.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },
}

impl CoreError {
    /// Creates an invalid identifier error.
    pub fn invalid_id(value: impl Into<String>) -> Self {
        Self::InvalidId {
            value: value.into(),
        }
    }

    /// Creates an invalid date error.
    pub fn invalid_date(value: impl Into<String>) -> Self {
        Self::InvalidDate {
            value: value.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(id: RecordId, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            id,
            reason: reason.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Returns true if the error comes from the data rather than the device.
    ///
    /// Storage failures are environmental and may succeed on retry;
    /// everything else is a property of the input.
    #[must_use]
    pub fn is_data_error(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}
