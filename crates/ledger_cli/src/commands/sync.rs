//! Sync command implementation.

use super::{open_local_store, CommandResult};
use ledger_sync_engine::{
    ClientCredentials, HttpTransport, ReqwestClient, SyncConfig, SyncEngine, SyncOutcome,
    SyncPoller,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Arguments of the sync command.
#[derive(Debug)]
pub struct SyncArgs {
    /// Server URL.
    pub server: String,
    /// Session token.
    pub token: Option<String>,
    /// Trusted caller identity.
    pub caller: Option<String>,
    /// Keep polling until interrupted.
    pub watch: bool,
    /// Polling interval in seconds.
    pub interval: u64,
}

/// Picks the credentials to send.
pub fn credentials(token: Option<String>, caller: Option<String>) -> ClientCredentials {
    match (token, caller) {
        (Some(token), _) => ClientCredentials::Bearer(token),
        (None, Some(caller)) => ClientCredentials::Caller(caller),
        (None, None) => ClientCredentials::Anonymous,
    }
}

/// Runs the sync command.
pub fn run(dir: &Path, args: SyncArgs) -> CommandResult {
    let config = SyncConfig::new(args.server.clone())
        .with_sync_interval(Duration::from_secs(args.interval.max(1)));
    let client = ReqwestClient::new(config.timeout, credentials(args.token, args.caller))?;
    let transport = HttpTransport::new(args.server, client);
    let store = open_local_store(dir)?;
    let engine = Arc::new(SyncEngine::new(config, transport, store));

    if !args.watch {
        report(&engine.sync_with_retry()?);
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let interval = engine.config().sync_interval;
        let poller = SyncPoller::spawn(Arc::clone(&engine), interval);
        info!("watching for changes, press Ctrl-C to stop");
        let result = tokio::signal::ctrl_c().await;
        poller.shutdown().await;
        result
    })?;

    let stats = engine.stats();
    println!(
        "Synced {} time(s), sent {} record(s), received {} record(s)",
        stats.syncs_completed, stats.records_sent, stats.records_received
    );
    Ok(())
}

fn report(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Skipped { watermark } => println!("Nothing to sync (watermark {watermark})"),
        SyncOutcome::Synced {
            watermark,
            sent,
            received,
        } => println!("Sent {sent}, received {received}, watermark {watermark}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_wins_over_caller() {
        assert_eq!(
            credentials(Some("t".into()), Some("alice".into())),
            ClientCredentials::Bearer("t".into())
        );
        assert_eq!(
            credentials(None, Some("alice".into())),
            ClientCredentials::Caller("alice".into())
        );
        assert_eq!(credentials(None, None), ClientCredentials::Anonymous);
    }
}
