//! OAuth 2.0 provider configuration
//!
//! Known providers supply default endpoints and scopes; anything else is
//! configured as [`OAuthPreset::Custom`] with explicit URLs.

use crate::config::{require, require_url};
use broker_core::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Provider presets with well-known endpoints.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OAuthPreset {
    /// Google accounts
    Google,
    /// GitHub
    GitHub,
    /// Microsoft identity platform (Azure AD, common tenant)
    Microsoft,
    /// Slack (Sign in with Slack, OpenID)
    Slack,
    /// Explicit endpoints
    #[default]
    Custom,
}

impl OAuthPreset {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "google" => Some(OAuthPreset::Google),
            "github" => Some(OAuthPreset::GitHub),
            "microsoft" | "azure" | "azuread" => Some(OAuthPreset::Microsoft),
            "slack" => Some(OAuthPreset::Slack),
            "custom" => Some(OAuthPreset::Custom),
            _ => None,
        }
    }

    /// Default authorization endpoint.
    pub fn auth_url(&self) -> Option<&'static str> {
        match self {
            OAuthPreset::Google => Some("https://accounts.google.com/o/oauth2/v2/auth"),
            OAuthPreset::GitHub => Some("https://github.com/login/oauth/authorize"),
            OAuthPreset::Microsoft => {
                Some("https://login.microsoftonline.com/common/oauth2/v2.0/authorize")
            }
            OAuthPreset::Slack => Some("https://slack.com/openid/connect/authorize"),
            OAuthPreset::Custom => None,
        }
    }

    /// Default token endpoint.
    pub fn token_url(&self) -> Option<&'static str> {
        match self {
            OAuthPreset::Google => Some("https://oauth2.googleapis.com/token"),
            OAuthPreset::GitHub => Some("https://github.com/login/oauth/access_token"),
            OAuthPreset::Microsoft => {
                Some("https://login.microsoftonline.com/common/oauth2/v2.0/token")
            }
            OAuthPreset::Slack => Some("https://slack.com/api/openid.connect.token"),
            OAuthPreset::Custom => None,
        }
    }

    /// Default OpenID userinfo endpoint, for providers that have one.
    pub fn userinfo_url(&self) -> Option<&'static str> {
        match self {
            OAuthPreset::Google => Some("https://openidconnect.googleapis.com/v1/userinfo"),
            OAuthPreset::Microsoft => Some("https://graph.microsoft.com/oidc/userinfo"),
            OAuthPreset::Slack => Some("https://slack.com/api/openid.connect.userInfo"),
            OAuthPreset::GitHub | OAuthPreset::Custom => None,
        }
    }

    /// Default scopes.
    pub fn default_scopes(&self) -> &'static [&'static str] {
        match self {
            OAuthPreset::Google => &["openid", "email", "profile"],
            OAuthPreset::GitHub => &["read:user", "user:email"],
            OAuthPreset::Microsoft => &["openid", "email", "profile"],
            OAuthPreset::Slack => &["openid", "email", "profile"],
            OAuthPreset::Custom => &[],
        }
    }
}

/// OAuth 2.0 authorization-code client configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Provider tag stamped on every user this client authenticates
    pub name: String,

    /// Endpoint preset
    #[serde(default)]
    pub preset: OAuthPreset,

    /// Client ID
    pub client_id: String,

    /// Client secret
    pub client_secret: String,

    /// Authorization endpoint (defaults from the preset)
    #[serde(default)]
    pub auth_url: Option<String>,

    /// Token endpoint (defaults from the preset)
    #[serde(default)]
    pub token_url: Option<String>,

    /// Userinfo endpoint (defaults from the preset)
    #[serde(default)]
    pub userinfo_url: Option<String>,

    /// Callback URL registered with the provider
    pub redirect_url: String,

    /// Scopes to request
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Additional authorization parameters (e.g. `prompt`, `hd`)
    #[serde(default)]
    pub extra_params: HashMap<String, String>,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("name", &self.name)
            .field("preset", &self.preset)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl OAuthConfig {
    /// Create a configuration from a preset with its default scopes.
    pub fn new(
        name: impl Into<String>,
        preset: OAuthPreset,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            preset,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: None,
            token_url: None,
            userinfo_url: None,
            redirect_url: redirect_url.into(),
            scopes: preset.default_scopes().iter().map(|s| s.to_string()).collect(),
            extra_params: HashMap::new(),
        }
    }

    /// Set explicit authorization and token endpoints.
    pub fn with_endpoints(mut self, auth_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.auth_url = Some(auth_url.into());
        self.token_url = Some(token_url.into());
        self
    }

    /// Set the userinfo endpoint.
    pub fn with_userinfo_url(mut self, url: impl Into<String>) -> Self {
        self.userinfo_url = Some(url.into());
        self
    }

    /// Replace the requested scopes.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Add an authorization parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.insert(key.into(), value.into());
        self
    }

    /// Get the authorization URL.
    pub fn get_auth_url(&self) -> AuthResult<String> {
        self.auth_url
            .clone()
            .or_else(|| self.preset.auth_url().map(String::from))
            .ok_or_else(|| AuthError::ConfigError("Authorization URL not configured".to_string()))
    }

    /// Get the token URL.
    pub fn get_token_url(&self) -> AuthResult<String> {
        self.token_url
            .clone()
            .or_else(|| self.preset.token_url().map(String::from))
            .ok_or_else(|| AuthError::ConfigError("Token URL not configured".to_string()))
    }

    /// Get the userinfo URL.
    pub fn get_userinfo_url(&self) -> AuthResult<String> {
        self.userinfo_url
            .clone()
            .or_else(|| self.preset.userinfo_url().map(String::from))
            .ok_or_else(|| AuthError::ConfigError("Userinfo URL not configured".to_string()))
    }

    /// Validate required settings.
    pub fn validate(&self) -> AuthResult<()> {
        require(&self.name, "OAuth provider name")?;
        require(&self.client_id, "OAuth client_id")?;
        require(&self.client_secret, "OAuth client_secret")?;
        require_url(&self.redirect_url, "OAuth redirect_url")?;
        require_url(&self.get_auth_url()?, "OAuth auth_url")?;
        require_url(&self.get_token_url()?, "OAuth token_url")?;
        Ok(())
    }
}
