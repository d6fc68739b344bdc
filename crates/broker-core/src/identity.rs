//! Normalized identity
//!
//! [`User`] is the protocol-independent record every adapter produces.
//! Vendor-specific values live in the open-ended `extra` and `raw` maps
//! rather than in a closed set of fields, since every new provider brings
//! its own vocabulary.

use crate::error::AuthResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Authenticated end user.
///
/// `credentials` is never serialized: a session read back from a store
/// carries everything except the provider tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Provider-scoped subject identifier
    pub id: String,

    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether the provider vouches for the email address
    #[serde(default)]
    pub email_verified: bool,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// Tag of the adapter or provider that authenticated the user
    pub provider: String,

    /// Normalized provider-specific attributes
    #[serde(default)]
    pub extra: HashMap<String, String>,

    /// Unprocessed claims as received
    #[serde(default)]
    pub raw: HashMap<String, serde_json::Value>,

    /// Provider tokens, kept in memory only
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl User {
    /// Create a user with a subject id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the email address.
    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a normalized attribute.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Stamp the provider tag and attach transient credentials.
    ///
    /// Adapters call this after the fetcher returns, so a fetcher can never
    /// choose its own provider tag.
    pub fn stamp(&mut self, provider: &str, credentials: Option<Credentials>) {
        self.provider = provider.to_string();
        self.credentials = credentials;
    }

    /// Look up a normalized attribute.
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

/// Provider tokens attached to a freshly authenticated user.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    /// Access token
    pub access_token: String,
    /// Refresh token, if issued
    pub refresh_token: Option<String>,
    /// Access token expiry, if reported
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token set returned by an authorization-code exchange.
#[derive(Clone)]
pub struct TokenSet {
    /// Access token
    pub access_token: String,
    /// Token type (usually "Bearer")
    pub token_type: String,
    /// Refresh token, if issued
    pub refresh_token: Option<String>,
    /// Absolute expiry computed from `expires_in`
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes, if the provider echoed them
    pub scopes: Vec<String>,
}

impl TokenSet {
    /// Create a bearer token set.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_at: None,
            scopes: Vec::new(),
        }
    }

    /// Credential snapshot to attach to a user.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Turns a provider token into a normalized user.
///
/// One implementation per vendor, supplied at construction time.
/// Implementations must not keep the token after the call returns, and
/// must leave `provider` for the adapter to set.
#[async_trait]
pub trait IdentityFetcher: Send + Sync {
    /// Fetch the identity the token belongs to.
    async fn fetch_identity(&self, token: &TokenSet) -> AuthResult<User>;
}
