//! Token command implementation.

use super::CommandResult;
use ledger_sync_server::{AuthConfig, SessionAuthenticator};
use std::time::Duration;

/// Runs the token command.
pub fn run(identity: &str, secret: &str, expiry_hours: u64) -> CommandResult {
    let config = AuthConfig::new(secret.as_bytes().to_vec())
        .with_expiry(Duration::from_secs(expiry_hours.saturating_mul(3600)));
    let token = SessionAuthenticator::new(config).create_token(identity)?;
    println!("{token}");
    Ok(())
}
