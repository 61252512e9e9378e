//! Serve command implementation.

use super::{server_log_path, CommandResult};
use ledger_storage::FileBackend;
use ledger_sync_server::{serve, ServerConfig, SyncServer, SystemClock};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds the server configuration from command-line flags.
pub fn server_config(
    bind: SocketAddr,
    secret: Option<String>,
    permitted: Vec<String>,
    max_batch: usize,
) -> ServerConfig {
    let mut config = ServerConfig::new(bind)
        .with_max_batch(max_batch)
        .with_permitted_callers(permitted);
    if let Some(secret) = secret {
        config = config.with_auth(secret.into_bytes());
    }
    config
}

/// Runs the serve command.
pub fn run(
    dir: &Path,
    bind: SocketAddr,
    secret: Option<String>,
    permitted: Vec<String>,
    max_batch: usize,
) -> CommandResult {
    let config = server_config(bind, secret, permitted, max_batch);
    if !config.require_auth {
        warn!("no secret configured; callers are trusted from the x-caller-id header");
    }

    let backend = FileBackend::open_with_create_dirs(&server_log_path(dir))?;
    let server = Arc::new(SyncServer::open(config, Box::new(backend), Arc::new(SystemClock))?);
    info!(
        records = server.store().record_count(),
        watermark = %server.watermark(),
        "server store opened"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(bind).await?;
        serve(listener, server, async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
            }
        })
        .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
