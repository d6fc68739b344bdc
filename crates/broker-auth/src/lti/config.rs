//! LTI 1.3 tool configuration
//!
//! A tool has one client registration per platform. Platforms are keyed by
//! issuer; the table is the trust boundary for every launch, so a launch
//! from an issuer missing here is rejected before anything else happens.

use crate::config::{require, require_url};
use broker_core::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a platform's public signing keys come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKey {
    /// A single RSA public key (PEM)
    Pem(String),
    /// A JWKS endpoint, fetched on demand and cached
    JwksUrl(String),
}

/// One trusted LMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Issuer (`iss`) the platform signs with
    pub issuer: String,

    /// Client ID the platform issued to this tool
    pub client_id: String,

    /// OIDC authorization endpoint
    pub auth_endpoint: String,

    /// Signing key source
    pub key: PlatformKey,

    /// Accepted deployment IDs; empty accepts any
    #[serde(default)]
    pub deployment_ids: Vec<String>,
}

impl PlatformConfig {
    /// Create a platform registration.
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        auth_endpoint: impl Into<String>,
        key: PlatformKey,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            auth_endpoint: auth_endpoint.into(),
            key,
            deployment_ids: Vec::new(),
        }
    }

    /// Accept `deployment_id` (restricts launches to the listed deployments).
    pub fn with_deployment(mut self, deployment_id: impl Into<String>) -> Self {
        self.deployment_ids.push(deployment_id.into());
        self
    }

    /// Whether `deployment_id` may launch this tool.
    pub fn accepts_deployment(&self, deployment_id: Option<&str>) -> bool {
        if self.deployment_ids.is_empty() {
            return true;
        }
        deployment_id.is_some_and(|id| self.deployment_ids.iter().any(|d| d == id))
    }

    fn validate(&self) -> AuthResult<()> {
        require(&self.issuer, "LTI platform issuer")?;
        require(&self.client_id, "LTI platform client_id")?;
        require_url(&self.auth_endpoint, "LTI platform auth_endpoint")?;
        match &self.key {
            PlatformKey::Pem(pem) => require(pem, "LTI platform public key"),
            PlatformKey::JwksUrl(url) => require_url(url, "LTI platform JWKS URL").map(|_| ()),
        }
    }
}

/// Tool signing key.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolKey {
    /// Key ID published in the tool JWKS
    pub kid: String,
    /// RSA private key (PKCS#1 or PKCS#8 PEM)
    pub private_key_pem: String,
}

impl std::fmt::Debug for ToolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolKey")
            .field("kid", &self.kid)
            .field("private_key_pem", &"[REDACTED]")
            .finish()
    }
}

/// LTI 1.3 tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LtiConfig {
    /// Provider tag stamped on launched users
    #[serde(default = "default_provider_name")]
    pub provider_name: String,

    /// Launch URL registered with every platform (the OIDC `redirect_uri`)
    pub launch_url: String,

    /// Trusted platforms by issuer
    #[serde(default)]
    pub platforms: HashMap<String, PlatformConfig>,

    /// Tool signing key, needed for the JWKS endpoint and Deep Linking
    #[serde(default)]
    pub tool_key: Option<ToolKey>,

    /// How long a fetched platform JWKS is reused, in seconds
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl_secs: u64,
}

fn default_provider_name() -> String {
    "lti".to_string()
}

fn default_jwks_cache_ttl() -> u64 {
    3600
}

impl LtiConfig {
    /// Create a configuration with no platforms.
    pub fn new(launch_url: impl Into<String>) -> Self {
        Self {
            provider_name: default_provider_name(),
            launch_url: launch_url.into(),
            platforms: HashMap::new(),
            tool_key: None,
            jwks_cache_ttl_secs: default_jwks_cache_ttl(),
        }
    }

    /// Trust `platform`.
    pub fn with_platform(mut self, platform: PlatformConfig) -> Self {
        self.platforms.insert(platform.issuer.clone(), platform);
        self
    }

    /// Set the tool signing key.
    pub fn with_tool_key(mut self, kid: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        self.tool_key = Some(ToolKey {
            kid: kid.into(),
            private_key_pem: private_key_pem.into(),
        });
        self
    }

    /// Set the provider tag.
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    /// Look up a trusted platform.
    pub fn platform(&self, issuer: &str) -> AuthResult<&PlatformConfig> {
        self.platforms
            .get(issuer)
            .ok_or_else(|| AuthError::UnknownIssuer(issuer.to_string()))
    }

    /// Validate required settings.
    pub fn validate(&self) -> AuthResult<()> {
        require(&self.provider_name, "LTI provider name")?;
        require_url(&self.launch_url, "LTI launch_url")?;

        if self.platforms.is_empty() {
            return Err(AuthError::ConfigError(
                "at least one LTI platform is required".to_string(),
            ));
        }
        for (issuer, platform) in &self.platforms {
            if issuer != &platform.issuer {
                return Err(AuthError::ConfigError(format!(
                    "LTI platform registered under {} declares issuer {}",
                    issuer, platform.issuer
                )));
            }
            platform.validate()?;
        }

        if let Some(key) = &self.tool_key {
            require(&key.kid, "LTI tool key id")?;
            require(&key.private_key_pem, "LTI tool private key")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> PlatformConfig {
        PlatformConfig::new(
            "https://canvas.example.edu",
            "10000000000001",
            "https://canvas.example.edu/api/lti/authorize_redirect",
            PlatformKey::JwksUrl("https://canvas.example.edu/api/lti/security/jwks".to_string()),
        )
    }

    #[test]
    fn test_valid_config() {
        let config = LtiConfig::new("https://tool.example.com/auth/lti/launch").with_platform(platform());
        assert!(config.validate().is_ok());
        assert_eq!(config.provider_name, "lti");
        assert!(config.platform("https://canvas.example.edu").is_ok());
    }

    #[test]
    fn test_unknown_platform() {
        let config = LtiConfig::new("https://tool.example.com/launch").with_platform(platform());
        assert!(matches!(
            config.platform("https://evil.example.org"),
            Err(AuthError::UnknownIssuer(_))
        ));
    }

    #[test]
    fn test_requires_platform() {
        let config = LtiConfig::new("https://tool.example.com/launch");
        assert!(matches!(config.validate(), Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn test_mismatched_registration_key() {
        let mut config = LtiConfig::new("https://tool.example.com/launch");
        config.platforms.insert("https://other.example.edu".to_string(), platform());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deployment_filter() {
        let open = platform();
        assert!(open.accepts_deployment(None));
        assert!(open.accepts_deployment(Some("any")));

        let restricted = platform().with_deployment("1:abc");
        assert!(restricted.accepts_deployment(Some("1:abc")));
        assert!(!restricted.accepts_deployment(Some("2:def")));
        assert!(!restricted.accepts_deployment(None));
    }

    #[test]
    fn test_tool_key_debug_redacted() {
        let config = LtiConfig::new("https://tool.example.com/launch").with_tool_key("k1", "SECRET");
        assert!(!format!("{:?}", config).contains("SECRET"));
    }
}
