//! Error types for the sync server.

use ledger_core::{CoreError, Watermark};
use ledger_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
///
/// Client errors reject the whole request with no effects. Server errors
/// abort the transaction; the client may retry.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format or size.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The `type` discriminator names no known record kind.
    #[error("unknown record type: {0}")]
    UnknownType(String),

    /// The client claims a watermark from the server's future.
    #[error("stale clock: client watermark {claimed} is ahead of server tick {now}")]
    StaleClock {
        /// Watermark claimed by the client.
        claimed: Watermark,
        /// The tick the server would have assigned.
        now: Watermark,
    },

    /// A record id already belongs to another caller.
    #[error("ownership violation")]
    OwnershipViolation,

    /// Missing, malformed, expired or forged session.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Authenticated caller is not allowed to sync.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Optimistic validation failed at commit.
    #[error("transaction conflict")]
    TransactionConflict,

    /// Persistent storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::UnknownType(_)
                | ServerError::StaleClock { .. }
                | ServerError::OwnershipViolation
                | ServerError::AuthenticationFailed(_)
                | ServerError::NotAuthorized(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::TransactionConflict | ServerError::Storage(_) | ServerError::Internal(_)
        )
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::AuthenticationFailed(_) => 401,
            ServerError::NotAuthorized(_) => 403,
            e if e.is_client_error() => 400,
            _ => 500,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownType { name } => ServerError::UnknownType(name),
            ProtocolError::Malformed { message } => ServerError::InvalidRequest(message),
        }
    }
}

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        ServerError::Storage(err.to_string())
    }
}
