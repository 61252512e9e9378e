//! Main sync server.

use crate::auth::SessionAuthenticator;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::SyncHandler;
use crate::store::ServerStore;
use ledger_core::{Owner, Watermark};
use ledger_storage::StorageBackend;
use ledger_sync_protocol::{KindRegistry, SyncRequest, SyncResponse};
use std::sync::Arc;
use tracing::warn;

/// How a request identifies its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A session token from `Authorization: Bearer`.
    Bearer(String),
    /// An identity asserted by a trusted front end (auth disabled only).
    Trusted(String),
    /// Nothing was supplied.
    Anonymous,
}

/// The sync server.
///
/// Owns the configuration, the record store, the kind registry and the
/// session authenticator. Transport layers resolve the caller with
/// [`SyncServer::authenticate`] and then call [`SyncServer::handle_sync`]
/// or [`SyncServer::handle_bytes`].
///
/// # Example
///
/// ```
/// use ledger_core::{Item, LedgerDate, Owner, Watermark};
/// use ledger_sync_protocol::SyncRequest;
/// use ledger_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let caller = Owner::new("alice@example.com");
/// let item = Item::new(LedgerDate::today(), "coffee", 500);
///
/// let response = server
///     .handle_sync(&caller, SyncRequest::items(Watermark::UNSYNCED, vec![item]))
///     .unwrap();
/// assert!(response.last_updated > Watermark::UNSYNCED);
/// ```
pub struct SyncServer {
    config: Arc<ServerConfig>,
    store: Arc<ServerStore>,
    registry: KindRegistry,
    handler: SyncHandler,
    authenticator: Option<SessionAuthenticator>,
}

impl SyncServer {
    /// Creates a sync server with an in-memory store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(ServerStore::in_memory()))
    }

    /// Creates a sync server with a durable store on `backend`.
    pub fn open(
        config: ServerConfig,
        backend: Box<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> ServerResult<Self> {
        let store = ServerStore::open(backend, clock)?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Creates a sync server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        let config = Arc::new(config);
        let registry = KindRegistry::new();
        let authenticator = config.auth.clone().map(SessionAuthenticator::new);
        let handler = SyncHandler::new(Arc::clone(&config), Arc::clone(&store), registry.clone());

        Self {
            config,
            store,
            registry,
            handler,
            authenticator,
        }
    }

    /// Resolves the caller of a request.
    ///
    /// With auth required only a valid bearer token is accepted. Without it a
    /// trusted identity is taken as is. Either way the caller must be on the
    /// allow-list when one is configured.
    pub fn authenticate(&self, credentials: &Credentials) -> ServerResult<Owner> {
        let caller = if self.config.require_auth {
            let auth = self.authenticator.as_ref().ok_or_else(|| {
                ServerError::Internal("authentication required but no secret configured".into())
            })?;
            match credentials {
                Credentials::Bearer(token) => auth.validate(token)?,
                _ => {
                    return Err(ServerError::AuthenticationFailed(
                        "missing session token".into(),
                    ))
                }
            }
        } else {
            match (credentials, &self.authenticator) {
                (Credentials::Bearer(token), Some(auth)) => auth.validate(token)?,
                (Credentials::Bearer(_), None) => {
                    return Err(ServerError::AuthenticationFailed(
                        "session tokens are not enabled".into(),
                    ))
                }
                (Credentials::Trusted(identity), _) if !identity.trim().is_empty() => {
                    Owner::new(identity.trim())
                }
                _ => {
                    return Err(ServerError::AuthenticationFailed(
                        "missing caller identity".into(),
                    ))
                }
            }
        };

        if !self.config.is_permitted(caller.as_str()) {
            warn!(%caller, "caller is not permitted");
            return Err(ServerError::NotAuthorized("caller is not permitted".into()));
        }
        Ok(caller)
    }

    /// Issues a session token for `identity`.
    pub fn issue_token(&self, identity: &str) -> ServerResult<String> {
        match &self.authenticator {
            Some(auth) => auth.create_token(identity),
            None => Err(ServerError::InvalidRequest(
                "session tokens are not enabled".into(),
            )),
        }
    }

    /// Handles a decoded sync request.
    pub fn handle_sync(&self, caller: &Owner, request: SyncRequest) -> ServerResult<SyncResponse> {
        self.handler.handle(caller, request)
    }

    /// Handles a JSON-encoded sync request and returns the JSON response.
    pub fn handle_bytes(&self, caller: &Owner, body: &[u8]) -> ServerResult<Vec<u8>> {
        let decoded = SyncRequest::decode_lenient(body, &self.registry)?;
        if decoded.batch_len() > self.config.max_batch {
            return Err(ServerError::InvalidRequest(format!(
                "too many records: {} > {}",
                decoded.batch_len(),
                self.config.max_batch
            )));
        }
        for (index, error) in &decoded.rejected {
            warn!(%caller, index, %error, "skipping undecodable record");
        }
        let response = self.handle_sync(caller, decoded.request)?;
        response
            .encode(&self.registry)
            .map_err(|e| ServerError::Internal(e.to_string()))
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<ServerStore> {
        &self.store
    }

    /// The latest watermark issued.
    pub fn watermark(&self) -> Watermark {
        self.store.last_watermark()
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use ledger_core::{Item, LedgerDate};
    use ledger_storage::InMemoryBackend;

    fn body(values: serde_json::Value, since: u64) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": "items",
            "last_updated": since,
            "values": values,
        }))
        .unwrap()
    }

    #[test]
    fn trusted_identity_without_auth() {
        let server = SyncServer::new(ServerConfig::default());
        let caller = server
            .authenticate(&Credentials::Trusted("alice".into()))
            .unwrap();
        assert_eq!(caller, Owner::new("alice"));

        assert!(matches!(
            server.authenticate(&Credentials::Anonymous),
            Err(ServerError::AuthenticationFailed(_))
        ));
        assert!(server.issue_token("alice").is_err());
    }

    #[test]
    fn bearer_required_with_auth() {
        let server = SyncServer::new(ServerConfig::default().with_auth(b"secret".to_vec()));
        let token = server.issue_token("alice").unwrap();

        assert_eq!(
            server.authenticate(&Credentials::Bearer(token)).unwrap(),
            Owner::new("alice")
        );
        assert!(matches!(
            server.authenticate(&Credentials::Trusted("alice".into())),
            Err(ServerError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            server.authenticate(&Credentials::Bearer("forged".into())),
            Err(ServerError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn allow_list_is_enforced() {
        let server = SyncServer::new(
            ServerConfig::default()
                .with_auth(b"secret".to_vec())
                .with_permitted_callers(["alice"]),
        );
        let token = server.issue_token("mallory").unwrap();
        assert!(matches!(
            server.authenticate(&Credentials::Bearer(token)),
            Err(ServerError::NotAuthorized(_))
        ));
    }

    #[test]
    fn handle_bytes_round_trip() {
        let server = SyncServer::new(ServerConfig::default());
        let caller = Owner::new("alice");
        let values = serde_json::json!([{
            "meta": {"id": "6ba7b810-9dad-41d1-80b4-00c04fd430c8", "last_updated": "0", "is_deleted": false},
            "date": "2024-03-01",
            "subject": "coffee",
            "amount": 500
        }]);

        let response = server.handle_bytes(&caller, &body(values, 0)).unwrap();
        let response: serde_json::Value = serde_json::from_slice(&response).unwrap();

        assert_eq!(response["type"], "items");
        assert!(response["last_updated"].as_u64().unwrap() > 0);
        assert_eq!(response["values"][0]["subject"], "coffee");
        assert_ne!(response["values"][0]["meta"]["last_updated"], "0");
        assert!(response["values"][0].get("owner").is_none());
    }

    #[test]
    fn handle_bytes_maps_protocol_errors() {
        let server = SyncServer::new(ServerConfig::default());
        let caller = Owner::new("alice");

        let unknown = br#"{"type":"notes","last_updated":0,"values":[]}"#;
        assert!(matches!(
            server.handle_bytes(&caller, unknown),
            Err(ServerError::UnknownType(_))
        ));
        assert!(matches!(
            server.handle_bytes(&caller, b"{"),
            Err(ServerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn undecodable_record_does_not_sink_the_batch() {
        let server = SyncServer::new(ServerConfig::default());
        let caller = Owner::new("alice");
        let values = serde_json::json!([
            {
                "meta": {"id": "6ba7b810-9dad-41d1-80b4-00c04fd430c8", "last_updated": "0", "is_deleted": false},
                "date": "2024-03-01",
                "subject": "coffee",
                "amount": 500
            },
            {
                "meta": {"id": "7c9e6679-7425-40de-944b-e07fc1f90ae7", "last_updated": "0", "is_deleted": false},
                "date": "2024-13-45",
                "subject": "tea",
                "amount": 300
            }
        ]);

        let response = server.handle_bytes(&caller, &body(values, 0)).unwrap();
        let response: serde_json::Value = serde_json::from_slice(&response).unwrap();

        assert_eq!(response["values"].as_array().unwrap().len(), 1);
        assert_eq!(response["values"][0]["subject"], "coffee");
        assert_eq!(server.store().record_count(), 1);
    }

    #[test]
    fn undecodable_records_count_toward_the_batch_limit() {
        let server = SyncServer::new(ServerConfig::default().with_max_batch(1));
        let values = serde_json::json!([{"meta": {"id": "x"}}, {"meta": {"id": "y"}}]);
        assert!(matches!(
            server.handle_bytes(&Owner::new("alice"), &body(values, 0)),
            Err(ServerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn durable_server_keeps_records_across_restart() {
        let backend = InMemoryBackend::new();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(100));
        let caller = Owner::new("alice");
        let item = Item::new(LedgerDate::parse("2024-03-01").unwrap(), "coffee", 500);

        let t1 = {
            let server = SyncServer::open(ServerConfig::default(), Box::new(backend.clone()), Arc::clone(&clock)).unwrap();
            server
                .handle_sync(&caller, SyncRequest::items(Watermark::UNSYNCED, vec![item.clone()]))
                .unwrap()
                .last_updated
        };

        let server = SyncServer::open(ServerConfig::default(), Box::new(backend), clock).unwrap();
        assert_eq!(server.watermark(), t1);
        let response = server
            .handle_sync(&caller, SyncRequest::items(Watermark::UNSYNCED, vec![]))
            .unwrap();
        assert_eq!(response.values.len(), 1);
        assert!(response.last_updated > t1);
    }
}
