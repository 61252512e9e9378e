//! Session authentication for the sync server.
//!
//! Sessions are HMAC-SHA256 tokens that bind a caller identity to the time
//! they were issued.
//!
//! ## Token Format
//!
//! - 2 bytes: identity length (big-endian)
//! - N bytes: identity (UTF-8)
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over everything before it
//!
//! The bytes are base64url-encoded (no padding) for the `Authorization`
//! header.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use ledger_core::Owner;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;
const TIMESTAMP_LEN: usize = 8;
const LENGTH_LEN: usize = 2;

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Issues and validates session tokens.
#[derive(Clone, Debug)]
pub struct SessionAuthenticator {
    config: AuthConfig,
}

impl SessionAuthenticator {
    /// Creates a new authenticator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `identity`, valid from now.
    pub fn create_token(&self, identity: &str) -> ServerResult<String> {
        self.create_token_at(identity, now_millis())
    }

    /// Issues a token with an explicit issue time.
    pub fn create_token_at(&self, identity: &str, issued_at_millis: u64) -> ServerResult<String> {
        let identity_len = u16::try_from(identity.len())
            .map_err(|_| ServerError::InvalidRequest("identity too long".into()))?;
        if identity.is_empty() {
            return Err(ServerError::InvalidRequest("empty identity".into()));
        }

        let mut data = Vec::with_capacity(LENGTH_LEN + identity.len() + TIMESTAMP_LEN);
        data.extend_from_slice(&identity_len.to_be_bytes());
        data.extend_from_slice(identity.as_bytes());
        data.extend_from_slice(&issued_at_millis.to_be_bytes());

        let signature = self.mac(&data)?.finalize().into_bytes();
        data.extend_from_slice(&signature);
        Ok(URL_SAFE_NO_PAD.encode(data))
    }

    /// Validates a token and returns the caller it was issued to.
    pub fn validate(&self, token: &str) -> ServerResult<Owner> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| reject("token is not base64url"))?;

        if bytes.len() < LENGTH_LEN + TIMESTAMP_LEN + SIGNATURE_LEN {
            return Err(reject("token too short"));
        }
        let identity_len = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
        let signed_len = LENGTH_LEN + identity_len + TIMESTAMP_LEN;
        if bytes.len() != signed_len + SIGNATURE_LEN {
            return Err(reject("invalid token length"));
        }

        let (signed, signature) = bytes.split_at(signed_len);
        self.mac(signed)?
            .verify_slice(signature)
            .map_err(|_| reject("invalid signature"))?;

        let identity = std::str::from_utf8(&signed[LENGTH_LEN..LENGTH_LEN + identity_len])
            .map_err(|_| reject("identity is not UTF-8"))?;

        let mut timestamp = [0u8; TIMESTAMP_LEN];
        timestamp.copy_from_slice(&signed[LENGTH_LEN + identity_len..]);
        let issued_at = u64::from_be_bytes(timestamp);

        let expiry_millis = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(reject("token expired"));
        }

        Ok(Owner::new(identity))
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

fn reject(reason: &str) -> ServerError {
    ServerError::AuthenticationFailed(reason.to_string())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> SessionAuthenticator {
        SessionAuthenticator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let auth = authenticator();
        let token = auth.create_token("alice@example.com").unwrap();
        assert_eq!(auth.validate(&token).unwrap(), Owner::new("alice@example.com"));
    }

    #[test]
    fn reject_tampered_token() {
        let auth = authenticator();
        let token = auth.create_token("alice@example.com").unwrap();

        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        bytes[3] ^= 0x01; // alter the identity
        let forged = URL_SAFE_NO_PAD.encode(bytes);

        assert!(matches!(
            auth.validate(&forged),
            Err(ServerError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn reject_other_secret() {
        let token = authenticator().create_token("alice").unwrap();
        let other = SessionAuthenticator::new(AuthConfig::new(b"another-secret".to_vec()));
        assert!(other.validate(&token).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let auth = SessionAuthenticator::new(
            AuthConfig::new(b"secret".to_vec()).with_expiry(Duration::from_secs(60)),
        );
        let token = auth
            .create_token_at("alice", now_millis() - 61_000)
            .unwrap();
        assert!(auth.validate(&token).is_err());
    }

    #[test]
    fn reject_garbage() {
        let auth = authenticator();
        for token in ["", "!!!", "c2hvcnQ", "AAAA"] {
            assert!(auth.validate(token).is_err(), "accepted {token:?}");
        }
    }

    #[test]
    fn empty_identity_cannot_be_issued() {
        assert!(authenticator().create_token("").is_err());
    }

    #[test]
    fn debug_hides_secret() {
        let text = format!("{:?}", AuthConfig::new(b"hunter2".to_vec()));
        assert!(!text.contains("hunter2"));
    }
}
