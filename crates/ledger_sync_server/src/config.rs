//! Server configuration.

use crate::auth::AuthConfig;
use std::collections::BTreeSet;
use std::net::SocketAddr;

/// Configuration for the sync server.
///
/// Built once at start-up and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum number of records accepted in one request.
    pub max_batch: usize,
    /// How many times a conflicting transaction is retried before the
    /// request fails.
    pub max_txn_retries: u32,
    /// Whether a valid session token is required.
    pub require_auth: bool,
    /// Token settings (if auth enabled).
    pub auth: Option<AuthConfig>,
    /// Callers allowed to sync. Empty means everyone who authenticates.
    pub permitted_callers: BTreeSet<String>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_batch: 1000,
            max_txn_retries: 5,
            require_auth: false,
            auth: None,
            permitted_callers: BTreeSet::new(),
        }
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch(mut self, max: usize) -> Self {
        self.max_batch = max;
        self
    }

    /// Sets the transaction retry limit.
    pub fn with_max_txn_retries(mut self, retries: u32) -> Self {
        self.max_txn_retries = retries;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth = Some(AuthConfig::new(secret));
        self
    }

    /// Enables authentication with a full token configuration.
    pub fn with_auth_config(mut self, auth: AuthConfig) -> Self {
        self.require_auth = true;
        self.auth = Some(auth);
        self
    }

    /// Restricts syncing to the given callers.
    pub fn with_permitted_callers<I, S>(mut self, callers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permitted_callers = callers.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if the caller may sync.
    #[must_use]
    pub fn is_permitted(&self, caller: &str) -> bool {
        self.permitted_callers.is_empty() || self.permitted_callers.contains(caller)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
