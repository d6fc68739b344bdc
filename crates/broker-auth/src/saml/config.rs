//! SAML 2.0 service provider configuration

use crate::config::{require, require_url};
use crate::saml::attributes::default_attribute_map;
use broker_core::{AuthError, AuthResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Service provider settings and the trusted identity provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct SamlConfig {
    /// Provider tag stamped on every user this adapter authenticates
    #[serde(default = "default_provider_name")]
    pub provider_name: String,

    /// SP entity ID (also the expected audience)
    pub sp_entity_id: String,

    /// Assertion Consumer Service URL (HTTP-POST binding)
    pub acs_url: String,

    /// IdP single sign-on URL (HTTP-Redirect binding)
    pub idp_sso_url: String,

    /// IdP entity ID; assertions from any other issuer are rejected
    #[serde(default)]
    pub idp_entity_id: Option<String>,

    /// IdP signing certificate (PEM)
    #[serde(default)]
    pub idp_certificate: Option<String>,

    /// SP certificate (PEM), published in metadata
    #[serde(default)]
    pub sp_certificate: Option<String>,

    /// SP private key (PEM), signs AuthnRequests
    #[serde(default)]
    pub sp_private_key: Option<String>,

    /// Sign AuthnRequests
    #[serde(default)]
    pub sign_requests: bool,

    /// Reject responses without a verified signature
    #[serde(default = "default_true")]
    pub want_assertions_signed: bool,

    /// Requested NameID format
    #[serde(default)]
    pub name_id_format: Option<String>,

    /// Tolerance for `NotBefore` / `NotOnOrAfter`, in seconds
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// Attribute name (or friendly name) to internal key
    #[serde(default = "default_attribute_map")]
    pub attribute_map: HashMap<String, String>,
}

fn default_provider_name() -> String {
    "saml".to_string()
}

fn default_true() -> bool {
    true
}

fn default_clock_skew() -> i64 {
    120
}

impl std::fmt::Debug for SamlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlConfig")
            .field("provider_name", &self.provider_name)
            .field("sp_entity_id", &self.sp_entity_id)
            .field("acs_url", &self.acs_url)
            .field("idp_sso_url", &self.idp_sso_url)
            .field("idp_entity_id", &self.idp_entity_id)
            .field("idp_certificate", &self.idp_certificate.is_some())
            .field("sp_certificate", &self.sp_certificate.is_some())
            .field("sp_private_key", &self.sp_private_key.as_ref().map(|_| "[REDACTED]"))
            .field("sign_requests", &self.sign_requests)
            .field("want_assertions_signed", &self.want_assertions_signed)
            .field("clock_skew_secs", &self.clock_skew_secs)
            .finish()
    }
}

impl SamlConfig {
    /// Create a configuration with the default attribute table.
    ///
    /// Assertions must be signed unless [`with_signed_assertions`](Self::with_signed_assertions)
    /// turns that off.
    pub fn new(
        sp_entity_id: impl Into<String>,
        acs_url: impl Into<String>,
        idp_sso_url: impl Into<String>,
    ) -> Self {
        Self {
            provider_name: default_provider_name(),
            sp_entity_id: sp_entity_id.into(),
            acs_url: acs_url.into(),
            idp_sso_url: idp_sso_url.into(),
            idp_entity_id: None,
            idp_certificate: None,
            sp_certificate: None,
            sp_private_key: None,
            sign_requests: false,
            want_assertions_signed: true,
            name_id_format: None,
            clock_skew_secs: default_clock_skew(),
            attribute_map: default_attribute_map(),
        }
    }

    /// Set the provider tag.
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    /// Trust only assertions issued by `entity_id`.
    pub fn with_idp_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.idp_entity_id = Some(entity_id.into());
        self
    }

    /// Set the IdP signing certificate.
    pub fn with_idp_certificate(mut self, pem: impl Into<String>) -> Self {
        self.idp_certificate = Some(pem.into());
        self
    }

    /// Set the SP key pair and sign AuthnRequests with it.
    pub fn with_sp_credentials(mut self, certificate_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        self.sp_certificate = Some(certificate_pem.into());
        self.sp_private_key = Some(key_pem.into());
        self.sign_requests = true;
        self
    }

    /// Require (or stop requiring) signed responses.
    pub fn with_signed_assertions(mut self, required: bool) -> Self {
        self.want_assertions_signed = required;
        self
    }

    /// Set the requested NameID format.
    pub fn with_name_id_format(mut self, format: impl Into<String>) -> Self {
        self.name_id_format = Some(format.into());
        self
    }

    /// Map an additional attribute name to an internal key.
    pub fn with_attribute(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.attribute_map.insert(name.into(), key.into());
        self
    }

    /// Clock skew tolerance.
    pub fn clock_skew(&self) -> Duration {
        Duration::seconds(self.clock_skew_secs)
    }

    /// Validate required settings.
    pub fn validate(&self) -> AuthResult<()> {
        require(&self.provider_name, "SAML provider name")?;
        require(&self.sp_entity_id, "SAML sp_entity_id")?;
        require_url(&self.acs_url, "SAML acs_url")?;
        require_url(&self.idp_sso_url, "SAML idp_sso_url")?;

        if self.sign_requests && self.sp_private_key.is_none() {
            return Err(AuthError::ConfigError(
                "sign_requests requires sp_private_key".to_string(),
            ));
        }
        if self.clock_skew_secs < 0 {
            return Err(AuthError::ConfigError(
                "SAML clock skew cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}
