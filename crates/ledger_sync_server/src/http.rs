//! HTTP surface: `POST /sync`.
//!
//! | Outcome | Status |
//! |---|---|
//! | success | 200 |
//! | invalid request, unknown type, stale clock, ownership violation | 400 |
//! | missing or invalid session | 401 |
//! | caller not permitted | 403 |
//! | storage failure | 500 |

use crate::error::{ServerError, ServerResult};
use crate::server::{Credentials, SyncServer};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Header carrying an already-authenticated identity when sessions are off.
pub const CALLER_HEADER: &str = "x-caller-id";

/// Builds the sync router.
pub fn router(server: Arc<SyncServer>) -> Router {
    Router::new()
        .route("/sync", post(sync))
        .with_state(server)
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, server: Arc<SyncServer>, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Internal(format!("listener address: {e}")))?;
    info!(%addr, "sync server listening");

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Internal(format!("http server: {e}")))
}

async fn sync(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServerError> {
    let credentials = credentials(&headers);

    // The store does blocking I/O under its commit lock.
    let encoded = tokio::task::spawn_blocking(move || {
        let caller = server.authenticate(&credentials)?;
        server.handle_bytes(&caller, &body)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("sync task failed: {e}")))??;

    Ok(([(header::CONTENT_TYPE, "application/json")], encoded).into_response())
}

fn credentials(headers: &HeaderMap) -> Credentials {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    if let Some(token) = bearer {
        return Credentials::Bearer(token);
    }

    match headers.get(CALLER_HEADER).and_then(|v| v.to_str().ok()) {
        Some(identity) => Credentials::Trusted(identity.to_string()),
        None => Credentials::Anonymous,
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let (kind, message) = match &self {
            ServerError::InvalidRequest(_) => ("invalid_request", self.to_string()),
            ServerError::UnknownType(_) => ("unknown_type", self.to_string()),
            ServerError::StaleClock { .. } => ("stale_clock", self.to_string()),
            ServerError::OwnershipViolation => ("ownership_violation", self.to_string()),
            ServerError::AuthenticationFailed(_) => ("unauthenticated", self.to_string()),
            ServerError::NotAuthorized(_) => ("forbidden", self.to_string()),
            ServerError::TransactionConflict | ServerError::Storage(_) => {
                error!(error = %self, "sync failed on storage");
                ("storage_error", "storage failure, retry later".to_string())
            }
            ServerError::Internal(_) => {
                error!(error = %self, "sync failed");
                ("internal_error", "an internal error occurred".to_string())
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: kind,
                message,
            }),
        )
            .into_response()
    }
}
