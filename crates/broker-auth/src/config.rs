//! Cookie and session policy shared by every adapter
//!
//! Adapter-specific settings live next to each adapter (`OAuthConfig`,
//! `SamlConfig`, `LtiConfig`). Everything here is identical across
//! protocols: how the session cookie is written and how long sessions,
//! CSRF state values and nonces live.

use axum_extra::extract::cookie::SameSite;
use broker_core::{AuthError, AuthResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "broker_session";

/// `SameSite` attribute of the session cookie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    /// Never sent on cross-site requests
    Strict,
    /// Sent on top-level navigations
    #[default]
    Lax,
    /// Always sent; requires `Secure`
    None,
}

impl SameSitePolicy {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Some(SameSitePolicy::Strict),
            "lax" => Some(SameSitePolicy::Lax),
            "none" => Some(SameSitePolicy::None),
            _ => None,
        }
    }
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// How the session cookie is written.
///
/// The cookie is always `HttpOnly`; its value is the session id and
/// nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookiePolicy {
    /// Cookie name
    pub name: String,

    /// Cookie path
    pub path: String,

    /// Cookie domain (host-only when absent)
    #[serde(default)]
    pub domain: Option<String>,

    /// Whether the `Secure` attribute is set
    pub secure: bool,

    /// `SameSite` attribute
    #[serde(default)]
    pub same_site: SameSitePolicy,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            path: "/".to_string(),
            domain: None,
            secure: true,
            same_site: SameSitePolicy::Lax,
        }
    }
}

impl CookiePolicy {
    /// Policy for launches embedded in a third-party iframe
    /// (`SameSite=None; Secure`).
    pub fn cross_site() -> Self {
        Self {
            same_site: SameSitePolicy::None,
            secure: true,
            ..Self::default()
        }
    }

    /// Set the cookie name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the cookie path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the cookie domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the `Secure` attribute.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the `SameSite` attribute.
    pub fn with_same_site(mut self, same_site: SameSitePolicy) -> Self {
        self.same_site = same_site;
        self
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an empty name or path, or for
    /// `SameSite=None` without `Secure` (browsers drop such cookies).
    pub fn validate(&self) -> AuthResult<()> {
        if self.name.is_empty() {
            return Err(AuthError::ConfigError("Cookie name is empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(AuthError::ConfigError(format!(
                "Cookie path must start with '/': {}",
                self.path
            )));
        }
        if self.same_site == SameSitePolicy::None && !self.secure {
            return Err(AuthError::ConfigError(
                "SameSite=None requires a Secure cookie".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifetimes and navigation targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Session lifetime in seconds
    pub session_duration_secs: i64,

    /// CSRF state lifetime in seconds
    pub state_ttl_secs: i64,

    /// Launch nonce lifetime in seconds
    pub nonce_ttl_secs: i64,

    /// Where unauthenticated browsers are sent
    pub login_path: String,

    /// Where browsers land after login or logout when no success callback is set
    pub landing_path: String,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            session_duration_secs: 24 * 60 * 60,
            state_ttl_secs: 10 * 60,
            nonce_ttl_secs: 10 * 60,
            login_path: "/login".to_string(),
            landing_path: "/".to_string(),
        }
    }
}

impl SessionPolicy {
    /// Session lifetime.
    pub fn session_duration(&self) -> Duration {
        Duration::seconds(self.session_duration_secs)
    }

    /// CSRF state lifetime.
    pub fn state_ttl(&self) -> Duration {
        Duration::seconds(self.state_ttl_secs)
    }

    /// Nonce lifetime.
    pub fn nonce_ttl(&self) -> Duration {
        Duration::seconds(self.nonce_ttl_secs)
    }

    /// Set the session lifetime.
    pub fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration_secs = duration.num_seconds();
        self
    }

    /// Set the login path.
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Set the landing path.
    pub fn with_landing_path(mut self, path: impl Into<String>) -> Self {
        self.landing_path = path.into();
        self
    }

    /// Validate the policy.
    pub fn validate(&self) -> AuthResult<()> {
        for (name, secs) in [
            ("session duration", self.session_duration_secs),
            ("state TTL", self.state_ttl_secs),
            ("nonce TTL", self.nonce_ttl_secs),
        ] {
            if secs <= 0 {
                return Err(AuthError::ConfigError(format!("{} must be positive", name)));
            }
        }
        if self.login_path.is_empty() || self.landing_path.is_empty() {
            return Err(AuthError::ConfigError(
                "Login and landing paths are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Require a non-empty setting.
pub(crate) fn require(value: &str, name: &str) -> AuthResult<()> {
    if value.trim().is_empty() {
        return Err(AuthError::ConfigError(format!("{} is required", name)));
    }
    Ok(())
}

/// Require a setting that parses as an absolute URL.
pub(crate) fn require_url(value: &str, name: &str) -> AuthResult<url::Url> {
    require(value, name)?;
    url::Url::parse(value)
        .map_err(|e| AuthError::ConfigError(format!("{} is not a valid URL: {}", name, e)))
}
