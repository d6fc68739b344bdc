//! Server settings
//!
//! Everything is read from environment variables, with defaults suitable
//! for local development. A protocol is enabled by setting its anchor
//! variable (`OAUTH_CLIENT_ID`, `SAML_SP_ENTITY_ID`, `LTI_LAUNCH_URL`);
//! the rest of that protocol's variables are then validated.
//!
//! ## General
//!
//! - `BIND_ADDR`: listen address (default: `0.0.0.0:8080`)
//! - `REDIS_URL`: use Redis stores instead of in-memory ones
//! - `SESSION_DURATION_SECS`: session lifetime (default: 86400)
//! - `LOGIN_PATH`: where unauthenticated browsers go (default: `/login`)
//! - `LANDING_PATH`: post-login and post-logout target (default: `/`)
//! - `HTTP_TIMEOUT_SECS`: timeout for calls to providers, IdPs and
//!   platforms (default: 10)
//!
//! ## Cookie
//!
//! - `COOKIE_NAME` (default: `broker_session`)
//! - `COOKIE_DOMAIN`: host-only when unset
//! - `COOKIE_SECURE`: `false` or `0` disables `Secure` (default: true)
//! - `COOKIE_SAME_SITE`: `lax`, `strict` or `none` (default: `lax`;
//!   LTI launches always use `none`)
//!
//! ## OAuth 2.0
//!
//! - `OAUTH_CLIENT_ID`, `OAUTH_CLIENT_SECRET`, `OAUTH_REDIRECT_URL`
//! - `OAUTH_PROVIDER`: `google`, `github`, `microsoft`, `slack` or
//!   `custom` (default: `custom`)
//! - `OAUTH_NAME`: provider tag stamped on users (default: the preset name)
//! - `OAUTH_AUTH_URL`, `OAUTH_TOKEN_URL`: required for `custom`
//! - `OAUTH_USERINFO_URL`: required when the preset has none
//! - `OAUTH_SCOPES`: comma-separated, replaces the preset scopes
//!
//! ## SAML 2.0
//!
//! - `SAML_SP_ENTITY_ID`, `SAML_ACS_URL`, `SAML_IDP_SSO_URL`
//! - `SAML_IDP_ENTITY_ID`: expected assertion issuer
//! - `SAML_IDP_CERT_FILE`: IdP signing certificate (PEM)
//! - `SAML_SP_CERT_FILE`, `SAML_SP_KEY_FILE`: SP credentials; enables
//!   signed AuthnRequests
//! - `SAML_WANT_ASSERTIONS_SIGNED` (default: true)
//! - `SAML_NAME_ID_FORMAT`
//!
//! ## LTI 1.3
//!
//! - `LTI_LAUNCH_URL`
//! - `LTI_PLATFORMS_FILE`: JSON array of platform registrations, or a
//!   single platform from `LTI_PLATFORM_ISSUER`, `LTI_CLIENT_ID`,
//!   `LTI_AUTH_ENDPOINT`, one of `LTI_JWKS_URL` / `LTI_PLATFORM_KEY_FILE`,
//!   and optional comma-separated `LTI_DEPLOYMENT_IDS`
//! - `LTI_TOOL_KEY_FILE`, `LTI_TOOL_KID` (default: `tool-1`)

use broker_auth::lti::{LtiConfig, PlatformConfig, PlatformKey};
use broker_auth::oauth::{OAuthConfig, OAuthPreset};
use broker_auth::http::DEFAULT_TIMEOUT_SECS;
use broker_auth::saml::SamlConfig;
use broker_auth::{CookiePolicy, SameSitePolicy, SessionPolicy};
use std::env::VarError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Settings errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Missing required environment variable.
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    /// Invalid value.
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// A referenced file could not be read.
    #[error("cannot read {path} (from {var}): {message}")]
    Unreadable {
        var: String,
        path: String,
        message: String,
    },
}

/// Complete server settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub bind_addr: SocketAddr,
    pub redis_url: Option<String>,
    pub http_timeout_secs: u64,
    pub cookie: CookiePolicy,
    pub session: SessionPolicy,
    pub oauth: Option<OAuthConfig>,
    pub saml: Option<SamlConfig>,
    pub lti: Option<LtiConfig>,
}

type Reader<'a> = &'a dyn Fn(&str) -> Result<String, VarError>;

fn optional(reader: Reader<'_>, key: &str) -> Option<String> {
    reader(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(reader: Reader<'_>, key: &str) -> Result<String, SettingsError> {
    optional(reader, key).ok_or_else(|| SettingsError::MissingVar(key.to_string()))
}

fn flag(reader: Reader<'_>, key: &str, default: bool) -> bool {
    optional(reader, key)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

fn file(reader: Reader<'_>, key: &str) -> Result<Option<String>, SettingsError> {
    let Some(path) = optional(reader, key) else {
        return Ok(None);
    };
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|e| SettingsError::Unreadable {
            var: key.to_string(),
            path,
            message: e.to_string(),
        })
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl BrokerSettings {
    /// Load settings from environment variables.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_reader(&|key: &str| std::env::var(key))
    }

    /// Load settings from a custom variable reader.
    pub fn from_reader(reader: Reader<'_>) -> Result<Self, SettingsError> {
        let bind_addr = optional(reader, "BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| SettingsError::InvalidValue("BIND_ADDR".into(), e.to_string()))?;

        let http_timeout_secs = match optional(reader, "HTTP_TIMEOUT_SECS") {
            Some(value) => value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| SettingsError::InvalidValue("HTTP_TIMEOUT_SECS".into(), value.clone()))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            bind_addr,
            redis_url: optional(reader, "REDIS_URL"),
            http_timeout_secs,
            cookie: cookie_policy(reader)?,
            session: session_policy(reader)?,
            oauth: oauth_config(reader)?,
            saml: saml_config(reader)?,
            lti: lti_config(reader)?,
        })
    }

    /// Timeout for outbound HTTP calls.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Whether at least one login protocol is configured.
    pub fn has_protocol(&self) -> bool {
        self.oauth.is_some() || self.saml.is_some() || self.lti.is_some()
    }

    /// Cookie policy for LTI launches, which arrive cross-site from an
    /// LMS iframe.
    pub fn lti_cookie(&self) -> CookiePolicy {
        self.cookie
            .clone()
            .with_same_site(SameSitePolicy::None)
            .with_secure(true)
    }
}

fn cookie_policy(reader: Reader<'_>) -> Result<CookiePolicy, SettingsError> {
    let mut cookie = CookiePolicy::default();
    if let Some(name) = optional(reader, "COOKIE_NAME") {
        cookie = cookie.with_name(name);
    }
    if let Some(domain) = optional(reader, "COOKIE_DOMAIN") {
        cookie = cookie.with_domain(domain);
    }
    cookie = cookie.with_secure(flag(reader, "COOKIE_SECURE", true));
    if let Some(value) = optional(reader, "COOKIE_SAME_SITE") {
        let same_site = SameSitePolicy::parse(&value)
            .ok_or_else(|| SettingsError::InvalidValue("COOKIE_SAME_SITE".into(), value.clone()))?;
        cookie = cookie.with_same_site(same_site);
    }
    Ok(cookie)
}

fn session_policy(reader: Reader<'_>) -> Result<SessionPolicy, SettingsError> {
    let mut policy = SessionPolicy::default();
    if let Some(value) = optional(reader, "SESSION_DURATION_SECS") {
        policy.session_duration_secs = value
            .parse()
            .map_err(|_| SettingsError::InvalidValue("SESSION_DURATION_SECS".into(), value.clone()))?;
    }
    if let Some(path) = optional(reader, "LOGIN_PATH") {
        policy = policy.with_login_path(path);
    }
    if let Some(path) = optional(reader, "LANDING_PATH") {
        policy = policy.with_landing_path(path);
    }
    Ok(policy)
}

fn oauth_config(reader: Reader<'_>) -> Result<Option<OAuthConfig>, SettingsError> {
    let Some(client_id) = optional(reader, "OAUTH_CLIENT_ID") else {
        return Ok(None);
    };

    let preset_name = optional(reader, "OAUTH_PROVIDER").unwrap_or_else(|| "custom".to_string());
    let preset = OAuthPreset::parse(&preset_name)
        .ok_or_else(|| SettingsError::InvalidValue("OAUTH_PROVIDER".into(), preset_name.clone()))?;
    let name = optional(reader, "OAUTH_NAME").unwrap_or_else(|| preset_name.to_lowercase());

    let mut config = OAuthConfig::new(
        name,
        preset,
        client_id,
        required(reader, "OAUTH_CLIENT_SECRET")?,
        required(reader, "OAUTH_REDIRECT_URL")?,
    );
    match (optional(reader, "OAUTH_AUTH_URL"), optional(reader, "OAUTH_TOKEN_URL")) {
        (Some(auth), Some(token)) => config = config.with_endpoints(auth, token),
        (None, None) => {}
        (Some(_), None) => return Err(SettingsError::MissingVar("OAUTH_TOKEN_URL".into())),
        (None, Some(_)) => return Err(SettingsError::MissingVar("OAUTH_AUTH_URL".into())),
    }
    if let Some(url) = optional(reader, "OAUTH_USERINFO_URL") {
        config = config.with_userinfo_url(url);
    }
    if let Some(scopes) = optional(reader, "OAUTH_SCOPES") {
        config = config.with_scopes(list(&scopes));
    }

    Ok(Some(config))
}

fn saml_config(reader: Reader<'_>) -> Result<Option<SamlConfig>, SettingsError> {
    let Some(sp_entity_id) = optional(reader, "SAML_SP_ENTITY_ID") else {
        return Ok(None);
    };

    let mut config = SamlConfig::new(
        sp_entity_id,
        required(reader, "SAML_ACS_URL")?,
        required(reader, "SAML_IDP_SSO_URL")?,
    )
    .with_signed_assertions(flag(reader, "SAML_WANT_ASSERTIONS_SIGNED", true));

    if let Some(entity_id) = optional(reader, "SAML_IDP_ENTITY_ID") {
        config = config.with_idp_entity_id(entity_id);
    }
    if let Some(pem) = file(reader, "SAML_IDP_CERT_FILE")? {
        config = config.with_idp_certificate(pem);
    }
    match (file(reader, "SAML_SP_CERT_FILE")?, file(reader, "SAML_SP_KEY_FILE")?) {
        (Some(cert), Some(key)) => config = config.with_sp_credentials(cert, key),
        (None, None) => {}
        (Some(_), None) => return Err(SettingsError::MissingVar("SAML_SP_KEY_FILE".into())),
        (None, Some(_)) => return Err(SettingsError::MissingVar("SAML_SP_CERT_FILE".into())),
    }
    if let Some(format) = optional(reader, "SAML_NAME_ID_FORMAT") {
        config = config.with_name_id_format(format);
    }

    Ok(Some(config))
}

fn lti_config(reader: Reader<'_>) -> Result<Option<LtiConfig>, SettingsError> {
    let Some(launch_url) = optional(reader, "LTI_LAUNCH_URL") else {
        return Ok(None);
    };
    let mut config = LtiConfig::new(launch_url);

    let platforms = match file(reader, "LTI_PLATFORMS_FILE")? {
        Some(json) => serde_json::from_str::<Vec<PlatformConfig>>(&json)
            .map_err(|e| SettingsError::InvalidValue("LTI_PLATFORMS_FILE".into(), e.to_string()))?,
        None => vec![single_platform(reader)?],
    };
    for platform in platforms {
        config = config.with_platform(platform);
    }

    if let Some(pem) = file(reader, "LTI_TOOL_KEY_FILE")? {
        let kid = optional(reader, "LTI_TOOL_KID").unwrap_or_else(|| "tool-1".to_string());
        config = config.with_tool_key(kid, pem);
    }

    Ok(Some(config))
}

fn single_platform(reader: Reader<'_>) -> Result<PlatformConfig, SettingsError> {
    let key = match (optional(reader, "LTI_JWKS_URL"), file(reader, "LTI_PLATFORM_KEY_FILE")?) {
        (Some(url), _) => PlatformKey::JwksUrl(url),
        (None, Some(pem)) => PlatformKey::Pem(pem),
        (None, None) => return Err(SettingsError::MissingVar("LTI_JWKS_URL".into())),
    };

    let mut platform = PlatformConfig::new(
        required(reader, "LTI_PLATFORM_ISSUER")?,
        required(reader, "LTI_CLIENT_ID")?,
        required(reader, "LTI_AUTH_ENDPOINT")?,
        key,
    );
    if let Some(ids) = optional(reader, "LTI_DEPLOYMENT_IDS") {
        for id in list(&ids) {
            platform = platform.with_deployment(id);
        }
    }
    Ok(platform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<BrokerSettings, SettingsError> {
        let owned: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BrokerSettings::from_reader(&move |key: &str| owned.get(key).cloned().ok_or(VarError::NotPresent))
    }

    #[test]
    fn test_defaults() {
        let settings = load(&[]).unwrap();
        assert_eq!(settings.bind_addr.to_string(), "0.0.0.0:8080");
        assert!(settings.redis_url.is_none());
        assert_eq!(settings.cookie.name, "broker_session");
        assert!(settings.cookie.secure);
        assert_eq!(settings.session.session_duration_secs, 86400);
        assert_eq!(settings.http_timeout(), Duration::from_secs(10));
        assert!(!settings.has_protocol());
    }

    #[test]
    fn test_http_timeout() {
        let settings = load(&[("HTTP_TIMEOUT_SECS", "3")]).unwrap();
        assert_eq!(settings.http_timeout(), Duration::from_secs(3));

        for bad in ["0", "soon"] {
            let err = load(&[("HTTP_TIMEOUT_SECS", bad)]).unwrap_err();
            assert!(err.to_string().contains("HTTP_TIMEOUT_SECS"));
        }
    }

    #[test]
    fn test_invalid_bind_addr() {
        let err = load(&[("BIND_ADDR", "nowhere")]).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(..)));
        assert!(err.to_string().contains("BIND_ADDR"));
    }

    #[test]
    fn test_cookie_overrides() {
        let settings = load(&[
            ("COOKIE_NAME", "sso"),
            ("COOKIE_SECURE", "false"),
            ("COOKIE_SAME_SITE", "strict"),
        ])
        .unwrap();
        assert_eq!(settings.cookie.name, "sso");
        assert!(!settings.cookie.secure);
        assert_eq!(settings.cookie.same_site, SameSitePolicy::Strict);

        let lti = settings.lti_cookie();
        assert_eq!(lti.same_site, SameSitePolicy::None);
        assert!(lti.secure);
        assert_eq!(lti.name, "sso");
    }

    #[test]
    fn test_oauth_requires_secret() {
        let err = load(&[("OAUTH_CLIENT_ID", "abc")]).unwrap_err();
        assert!(err.to_string().contains("OAUTH_CLIENT_SECRET"));
    }

    #[test]
    fn test_oauth_preset() {
        let settings = load(&[
            ("OAUTH_PROVIDER", "google"),
            ("OAUTH_CLIENT_ID", "abc"),
            ("OAUTH_CLIENT_SECRET", "s3cret"),
            ("OAUTH_REDIRECT_URL", "https://app.example.com/auth/oauth/callback"),
            ("OAUTH_SCOPES", "openid, email"),
        ])
        .unwrap();

        let oauth = settings.oauth.unwrap();
        assert_eq!(oauth.name, "google");
        assert_eq!(oauth.scopes, vec!["openid", "email"]);
        assert!(oauth.validate().is_ok());
    }

    #[test]
    fn test_saml_requires_acs() {
        let err = load(&[("SAML_SP_ENTITY_ID", "https://sp.example.edu")]).unwrap_err();
        assert!(err.to_string().contains("SAML_ACS_URL"));
    }

    #[test]
    fn test_lti_single_platform() {
        let settings = load(&[
            ("LTI_LAUNCH_URL", "https://tool.example.com/auth/lti/launch"),
            ("LTI_PLATFORM_ISSUER", "https://canvas.example.edu"),
            ("LTI_CLIENT_ID", "10000000000042"),
            ("LTI_AUTH_ENDPOINT", "https://canvas.example.edu/api/lti/authorize_redirect"),
            ("LTI_JWKS_URL", "https://canvas.example.edu/api/lti/security/jwks"),
            ("LTI_DEPLOYMENT_IDS", "1:abc,2:def"),
        ])
        .unwrap();

        let lti = settings.lti.unwrap();
        let platform = lti.platform("https://canvas.example.edu").unwrap();
        assert_eq!(platform.deployment_ids, vec!["1:abc", "2:def"]);
        assert!(lti.validate().is_ok());
    }

    #[test]
    fn test_unreadable_file() {
        let err = load(&[
            ("SAML_SP_ENTITY_ID", "https://sp.example.edu"),
            ("SAML_ACS_URL", "https://sp.example.edu/acs"),
            ("SAML_IDP_SSO_URL", "https://idp.example.edu/sso"),
            ("SAML_IDP_CERT_FILE", "/nonexistent/idp.pem"),
        ])
        .unwrap_err();
        assert!(matches!(err, SettingsError::Unreadable { .. }));
    }
}
