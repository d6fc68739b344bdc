//! Error types for broker operations
//!
//! This module defines every failure a login attempt can end in, grouped
//! the same way callers are expected to react to them: configuration
//! problems stop startup, CSRF/replay and upstream protocol failures end
//! the attempt, collaborator failures are reported but never retried here,
//! and session failures send the user back to login.

use thiserror::Error;

/// Errors raised by state, nonce and session stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Stored value could not be encoded or decoded
    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Authentication error types.
///
/// Every protocol adapter funnels its failures through this type.
/// None of them are retried by the broker itself.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or invalid setting, detected at construction time
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Callback arrived without a state parameter
    #[error("Missing state parameter")]
    MissingState,

    /// State is unknown, expired or already consumed
    #[error("Invalid or expired state parameter")]
    InvalidState,

    /// Launch token carries no nonce claim
    #[error("Missing nonce claim")]
    MissingNonce,

    /// Nonce is unknown, expired or already consumed
    #[error("Nonce has already been used or has expired")]
    NonceReplay,

    /// SAML assertion ID was already accepted once
    #[error("SAML assertion has already been used")]
    AssertionReplay,

    /// Provider reported an `error` parameter on the callback
    #[error("Provider returned an error: {0}")]
    ProviderError(String),

    /// Authorization code could not be exchanged for a token
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// SAML response carried a non-success status
    #[error("SAML authentication failed with status {status}: {message}")]
    SamlStatus {
        /// Status code URI reported by the IdP
        status: String,
        /// Optional status message reported by the IdP
        message: String,
    },

    /// SAML response is malformed or fails validation
    #[error("SAML error: {0}")]
    SamlError(String),

    /// SAML assertion `NotOnOrAfter` has passed
    #[error("SAML assertion has expired")]
    AssertionExpired,

    /// SAML assertion `NotBefore` is still in the future
    #[error("SAML assertion is not yet valid")]
    AssertionNotYetValid,

    /// JWT is malformed or fails validation
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Signature did not verify against the registered key
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Audience does not name this client
    #[error("Audience mismatch: {0}")]
    AudienceMismatch(String),

    /// Issuer is not a registered, trusted party
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    /// No registered key matches the token
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    /// Token or assertion is missing a required claim
    #[error("Missing required claim: {0}")]
    MissingClaim(String),

    /// Backing store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Identity fetcher failed
    #[error("Identity fetch failed: {0}")]
    IdentityFetch(String),

    /// No session cookie, or the session no longer exists
    #[error("Not authenticated")]
    Unauthenticated,

    /// Session exists but has expired
    #[error("Session expired")]
    SessionExpired,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Check if this error should be logged at error level.
    ///
    /// Rejected logins are expected traffic and are logged as warnings.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            AuthError::Internal(_) | AuthError::ConfigError(_) | AuthError::Store(_)
        )
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        if self.is_server_error() {
            500
        } else {
            401
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::ConfigError(_) => "CONFIG_ERROR",
            AuthError::MissingState => "MISSING_STATE",
            AuthError::InvalidState => "INVALID_STATE",
            AuthError::MissingNonce => "MISSING_NONCE",
            AuthError::NonceReplay => "NONCE_REPLAY",
            AuthError::AssertionReplay => "ASSERTION_REPLAY",
            AuthError::ProviderError(_) => "PROVIDER_ERROR",
            AuthError::TokenExchange(_) => "TOKEN_EXCHANGE_FAILED",
            AuthError::SamlStatus { .. } => "SAML_STATUS",
            AuthError::SamlError(_) => "SAML_ERROR",
            AuthError::AssertionExpired => "ASSERTION_EXPIRED",
            AuthError::AssertionNotYetValid => "ASSERTION_NOT_YET_VALID",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::InvalidSignature(_) => "INVALID_SIGNATURE",
            AuthError::AudienceMismatch(_) => "AUDIENCE_MISMATCH",
            AuthError::UnknownIssuer(_) => "UNKNOWN_ISSUER",
            AuthError::KeyNotFound(_) => "KEY_NOT_FOUND",
            AuthError::MissingClaim(_) => "MISSING_CLAIM",
            AuthError::Store(_) => "STORE_ERROR",
            AuthError::IdentityFetch(_) => "IDENTITY_FETCH_FAILED",
            AuthError::Unauthenticated => "UNAUTHORIZED",
            AuthError::SessionExpired => "SESSION_EXPIRED",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
