//! SAML 2.0 Web SSO adapter
//!
//! Login redirects the browser to the IdP with a deflated AuthnRequest and
//! a single-use relay state; the request ID is derived from the relay
//! state. The IdP posts a `SAMLResponse` back to the ACS endpoint;
//! [`SamlAdapter::complete`] checks the relay state, hands the document to
//! [`validate_response`], matches `InResponseTo` against the request and
//! maps the surviving assertion onto a [`User`].
//!
//! Every accepted assertion ID is recorded in a [`ReplayCache`] until the
//! assertion expires, so a captured response is good for one login only,
//! solicited or not.

use crate::response::{Callbacks, ErrorHandler, SuccessHandler};
use crate::saml::assertion::{decode_response, validate_response, ValidatedAssertion, ValidationContext};
use crate::saml::attributes::{self, map_attributes};
use crate::saml::config::SamlConfig;
use crate::saml::metadata::sp_metadata;
use crate::saml::request::{redirect_url, request_id_for, AuthnRequest, RequestSigner};
use crate::saml::signature::SignatureVerifier;
use crate::session::SessionIssuer;
use axum_extra::extract::cookie::CookieJar;
use broker_core::{random_token, AuthError, AuthResult, ReplayCache, Session, StateStore, User};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Form fields posted to the ACS endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcsForm {
    /// Base64 response document
    #[serde(rename = "SAMLResponse", default)]
    pub saml_response: Option<String>,

    /// Relay state echoed by the IdP
    #[serde(rename = "RelayState", default)]
    pub relay_state: Option<String>,
}

/// SAML service provider for one IdP.
pub struct SamlAdapter {
    config: SamlConfig,
    states: Arc<dyn StateStore>,
    replays: Arc<dyn ReplayCache>,
    issuer: SessionIssuer,
    signer: Option<RequestSigner>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    callbacks: Callbacks<Session>,
}

impl std::fmt::Debug for SamlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlAdapter")
            .field("config", &self.config)
            .field("signer", &self.signer)
            .field("verifier", &self.verifier.is_some())
            .finish_non_exhaustive()
    }
}

impl SamlAdapter {
    /// Create an adapter.
    ///
    /// When `verifier` is `None` and the crate is built with `xmlsec`, a
    /// verifier is built from the configured IdP certificate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a setting is invalid, if the SP key cannot
    /// be loaded, or if signed assertions are required but nothing can
    /// verify them.
    pub fn new(
        config: SamlConfig,
        states: Arc<dyn StateStore>,
        replays: Arc<dyn ReplayCache>,
        issuer: SessionIssuer,
        verifier: Option<Arc<dyn SignatureVerifier>>,
    ) -> AuthResult<Self> {
        config.validate()?;
        issuer.validate()?;

        let signer = match (&config.sp_private_key, config.sign_requests) {
            (Some(pem), true) => Some(RequestSigner::from_pem(pem)?),
            _ => None,
        };

        let verifier = match verifier {
            Some(verifier) => Some(verifier),
            None => default_verifier(&config)?,
        };

        if config.want_assertions_signed && verifier.is_none() {
            return Err(AuthError::ConfigError(
                "want_assertions_signed requires a signature verifier".to_string(),
            ));
        }

        let callbacks = Callbacks::new(issuer.policy().landing_path.clone());

        Ok(Self {
            config,
            states,
            replays,
            issuer,
            signer,
            verifier,
            callbacks,
        })
    }

    /// Respond to successful logins with `handler`.
    pub fn with_on_success(mut self, handler: SuccessHandler<Session>) -> Self {
        self.callbacks.set_on_success(handler);
        self
    }

    /// Respond to failed logins with `handler`.
    pub fn with_on_error(mut self, handler: ErrorHandler) -> Self {
        self.callbacks.set_on_error(handler);
        self
    }

    /// Configuration.
    pub fn config(&self) -> &SamlConfig {
        &self.config
    }

    /// Session issuer.
    pub fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    /// Outcome hooks.
    pub fn callbacks(&self) -> &Callbacks<Session> {
        &self.callbacks
    }

    /// Store a relay state and build the IdP redirect URL.
    pub async fn login_url(&self) -> AuthResult<String> {
        let relay_state = random_token();
        let now = self.issuer.clock().now();
        self.states
            .save(&relay_state, now + self.issuer.policy().state_ttl())
            .await?;

        let request = AuthnRequest::with_id(&self.config, request_id_for(&relay_state), now);
        let url = redirect_url(
            &self.config.idp_sso_url,
            &request,
            Some(&relay_state),
            self.signer.as_ref(),
        )?;

        debug!(request_id = %request.id, signed = self.signer.is_some(), "Issued SAML AuthnRequest");
        Ok(url)
    }

    /// Validate a posted response and, if it holds up, create a session.
    ///
    /// A relay state is optional (IdP-initiated logins carry none) but is
    /// consumed exactly once when present, and the response must then
    /// answer the request issued with it. A response that names a request
    /// but arrives without a relay state is rejected.
    pub async fn complete(&self, form: &AcsForm) -> AuthResult<Session> {
        let encoded = form
            .saml_response
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AuthError::SamlError("missing SAMLResponse".to_string()))?;

        let expected_request = match form.relay_state.as_deref().filter(|r| !r.is_empty()) {
            Some(relay_state) => {
                if !self.states.validate(relay_state).await? {
                    return Err(AuthError::InvalidState);
                }
                debug!("SAML relay state validated");
                Some(request_id_for(relay_state))
            }
            None => None,
        };

        let xml = decode_response(encoded)?;
        let now = self.issuer.clock().now();
        let ctx = ValidationContext {
            sp_entity_id: &self.config.sp_entity_id,
            idp_entity_id: self.config.idp_entity_id.as_deref(),
            require_signature: self.config.want_assertions_signed,
            verifier: self.verifier.as_deref(),
            clock_skew: self.config.clock_skew(),
            now,
        };
        let assertion = validate_response(&xml, &ctx)?;

        match (expected_request.as_deref(), assertion.in_response_to.as_deref()) {
            (Some(expected), Some(actual)) if expected == actual => {}
            (Some(_), _) => {
                return Err(AuthError::SamlError(
                    "response does not answer the issued AuthnRequest".to_string(),
                ))
            }
            (None, Some(_)) => return Err(AuthError::MissingState),
            (None, None) => debug!("Accepting unsolicited SAML response"),
        }

        if assertion.assertion_id.trim().is_empty() {
            return Err(AuthError::MissingClaim("Assertion ID".to_string()));
        }
        let remember_until = assertion
            .not_on_or_after
            .map(|t| t + self.config.clock_skew())
            .unwrap_or_else(|| now + self.issuer.policy().session_duration());
        if !self
            .replays
            .first_use(&assertion.assertion_id, remember_until)
            .await?
        {
            warn!(assertion_id = %assertion.assertion_id, "Rejected replayed SAML assertion");
            return Err(AuthError::AssertionReplay);
        }

        let user = self.user_from_assertion(assertion);
        let session = self.issuer.issue(user).await?;
        info!(provider = %self.config.provider_name, user_id = %session.user.id, "SAML login completed");
        Ok(session)
    }

    /// SP metadata document.
    pub fn metadata(&self) -> String {
        sp_metadata(&self.config)
    }

    /// Delete the caller's session and clear the cookie.
    pub async fn logout(&self, jar: CookieJar) -> CookieJar {
        self.issuer.revoke(jar).await
    }

    fn user_from_assertion(&self, assertion: ValidatedAssertion) -> User {
        let mapped = map_attributes(&assertion.attributes, &self.config.attribute_map);

        let id = mapped
            .first(attributes::PRINCIPAL_NAME)
            .map(str::to_string)
            .unwrap_or_else(|| assertion.name_id.clone());

        let mut user = User::new(id);
        if let Some(email) = mapped.first(attributes::EMAIL) {
            user = user.with_email(email, true);
        }
        user.name = mapped
            .first(attributes::DISPLAY_NAME)
            .map(str::to_string)
            .or_else(|| {
                match (mapped.first(attributes::GIVEN_NAME), mapped.first(attributes::SURNAME)) {
                    (Some(given), Some(surname)) => Some(format!("{} {}", given, surname)),
                    _ => None,
                }
            })
            .or_else(|| mapped.first(attributes::COMMON_NAME).map(str::to_string));

        user.extra = mapped.extra;
        user.raw = mapped.raw;
        user.raw.insert("name_id".to_string(), Value::String(assertion.name_id));
        if let Some(format) = assertion.name_id_format {
            user.raw.insert("name_id_format".to_string(), Value::String(format));
        }
        if let Some(session_index) = assertion.session_index {
            user.raw.insert("session_index".to_string(), Value::String(session_index));
        }
        if let Some(issuer) = assertion.issuer {
            user.raw.insert("issuer".to_string(), Value::String(issuer));
        }

        user.stamp(&self.config.provider_name, None);
        user
    }
}

#[cfg(feature = "xmlsec")]
fn default_verifier(config: &SamlConfig) -> AuthResult<Option<Arc<dyn SignatureVerifier>>> {
    use crate::saml::signature::XmlSecVerifier;

    match &config.idp_certificate {
        Some(pem) => Ok(Some(Arc::new(XmlSecVerifier::new(config, pem)?))),
        None => Ok(None),
    }
}

#[cfg(not(feature = "xmlsec"))]
fn default_verifier(_config: &SamlConfig) -> AuthResult<Option<Arc<dyn SignatureVerifier>>> {
    Ok(None)
}
