//! Protocol errors.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or encoding sync messages.
///
/// Every variant is the sender's fault; none is retryable.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The `type` discriminator names no registered record kind.
    #[error("unknown record type: {name:?}")]
    UnknownType {
        /// The discriminator as received.
        name: String,
    },

    /// The message is not a well-formed envelope.
    #[error("malformed message: {message}")]
    Malformed {
        /// What was wrong.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates a malformed message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}
