//! HTTP transport implementation.
//!
//! [`HttpTransport`] speaks the JSON protocol to `POST {base_url}/sync`. The
//! actual HTTP client is abstracted via [`HttpClient`] so the same transport
//! runs over `reqwest` ([`ReqwestClient`]) or straight into an in-process
//! server ([`LoopbackClient`]).

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use ledger_sync_protocol::{KindRegistry, SyncRequest, SyncResponse};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Path of the sync endpoint.
pub const SYNC_PATH: &str = "/sync";

/// Header carrying a trusted caller identity when the server runs without
/// session tokens.
pub const CALLER_HEADER: &str = "x-caller-id";

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Failures must
/// already be classified: unreachable servers as [`SyncError::Transport`],
/// error statuses as [`SyncError::Server`].
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> SyncResult<Vec<u8>>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport using JSON bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://ledger.example.com").
    base_url: String,
    client: C,
    registry: KindRegistry,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            registry: KindRegistry::new(),
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), SYNC_PATH)
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        if !self.is_connected() {
            return Err(SyncError::transport_fatal("transport is closed"));
        }

        let body = request.encode(&self.registry)?;
        let url = self.endpoint();
        debug!(%url, bytes = body.len(), "posting sync request");

        let response_body = self.client.post(&url, body).map_err(|e| {
            *self.last_error.write() = Some(e.to_string());
            e
        })?;
        *self.last_error.write() = None;

        Ok(SyncResponse::decode(&response_body, &self.registry)?)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// How [`ReqwestClient`] identifies its caller to the server.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    /// No credentials.
    Anonymous,
    /// A session token, sent as `Authorization: Bearer`.
    Bearer(String),
    /// A caller identity, sent in [`CALLER_HEADER`].
    Caller(String),
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientCredentials::Anonymous => f.write_str("Anonymous"),
            ClientCredentials::Bearer(_) => f.write_str("Bearer([redacted])"),
            ClientCredentials::Caller(id) => f.debug_tuple("Caller").field(id).finish(),
        }
    }
}

/// A blocking `reqwest` client.
///
/// Must not be created or dropped on an async runtime thread; the poller runs
/// syncs on the blocking pool.
#[derive(Debug)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
    credentials: ClientCredentials,
}

impl ReqwestClient {
    /// Creates a client with the given request timeout.
    pub fn new(timeout: Duration, credentials: ClientCredentials) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

impl HttpClient for ReqwestClient {
    fn post(&self, url: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let request = match &self.credentials {
            ClientCredentials::Anonymous => request,
            ClientCredentials::Bearer(token) => request.bearer_auth(token),
            ClientCredentials::Caller(identity) => request.header(CALLER_HEADER, identity),
        };

        let response = request.send().map_err(|e| {
            if e.is_builder() {
                SyncError::transport_fatal(e.to_string())
            } else {
                SyncError::transport_retryable(e.to_string())
            }
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .map_err(|e| SyncError::transport_retryable(e.to_string()))?;

        if !status.is_success() {
            return Err(SyncError::server(status.as_u16(), error_message(&bytes)));
        }
        Ok(bytes.to_vec())
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Extracts `message` from a `{"error": .., "message": ..}` body.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> SyncResult<Vec<u8>>;
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        let path = url.rfind(SYNC_PATH).map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
