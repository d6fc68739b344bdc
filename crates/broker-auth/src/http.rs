//! Outbound HTTP clients
//!
//! Token exchanges, userinfo lookups and JWKS fetches all run inside a
//! login request. Every client built here carries a request timeout so a
//! stalled provider fails the login instead of holding the handler open.

use broker_core::{AuthError, AuthResult};
use std::time::Duration;

/// Timeout used when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Client with `timeout` applied to connecting and to the whole request.
///
/// # Errors
///
/// `ConfigError` if the TLS backend cannot be initialized.
pub fn client(timeout: Duration) -> AuthResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| AuthError::ConfigError(format!("failed to build HTTP client: {}", e)))
}

/// Client for token endpoints. Redirects are not followed.
pub fn token_client(timeout: Duration) -> AuthResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AuthError::ConfigError(format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}
