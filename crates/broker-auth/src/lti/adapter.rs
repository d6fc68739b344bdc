//! LTI 1.3 launch adapter
//!
//! # Login leg
//!
//! The platform calls the login endpoint with `iss`, `login_hint` and
//! `target_link_uri`. The issuer is resolved against the trusted platform
//! table, fresh state and nonce values are stored, and the browser is sent
//! to the platform's OIDC authorization endpoint asking for an `id_token`
//! by `form_post`.
//!
//! # Launch leg
//!
//! 1. the state is consumed
//! 2. the token's issuer is read without trusting it and the platform is
//!    looked up again
//! 3. the signature is verified with that platform's key
//! 4. `aud` must name this tool's client id
//! 5. the nonce is consumed
//! 6. the deployment must be registered (when the platform lists any)
//! 7. claims become a [`LaunchRecord`] and a session is created
//!
//! Any failure ends the launch; nothing is persisted before step 7.

use crate::lti::claims::LaunchRecord;
use crate::lti::config::{LtiConfig, PlatformConfig};
use crate::lti::deep_linking::{deep_linking_response, ContentItem, DeepLinkingReturn};
use crate::lti::keys::{JwkSet, KeyResolver, ToolSigner};
use crate::response::{Callbacks, ErrorHandler, SuccessHandler};
use crate::session::SessionIssuer;
use axum_extra::extract::cookie::CookieJar;
use broker_core::{
    random_token, AuthError, AuthResult, NonceStore, Session, StateStore, User,
};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

const ACCEPTED_ALGORITHMS: &[Algorithm] = &[Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Third-party login initiation parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub login_hint: Option<String>,
    #[serde(default)]
    pub target_link_uri: Option<String>,
    #[serde(default)]
    pub lti_message_hint: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub lti_deployment_id: Option<String>,
}

/// Form posted by the platform to the launch endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LaunchForm {
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// A completed launch.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub session: Session,
    pub launch: LaunchRecord,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// LTI 1.3 tool.
pub struct LtiAdapter {
    config: LtiConfig,
    keys: KeyResolver,
    tool: Option<ToolSigner>,
    states: Arc<dyn StateStore>,
    nonces: Arc<dyn NonceStore>,
    issuer: SessionIssuer,
    callbacks: Callbacks<LaunchOutcome>,
}

impl std::fmt::Debug for LtiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LtiAdapter")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .field("tool", &self.tool)
            .finish_non_exhaustive()
    }
}

impl LtiAdapter {
    /// Create an adapter.
    ///
    /// # Errors
    ///
    /// `ConfigError` if a setting is invalid or a registered key (platform
    /// PEM or tool private key) cannot be parsed.
    pub fn new(
        config: LtiConfig,
        states: Arc<dyn StateStore>,
        nonces: Arc<dyn NonceStore>,
        issuer: SessionIssuer,
    ) -> AuthResult<Self> {
        config.validate()?;
        issuer.validate()?;

        let keys = KeyResolver::new(config.platforms.values(), config.jwks_cache_ttl_secs)?
            .with_clock(issuer.clock().clone());
        let tool = config.tool_key.as_ref().map(ToolSigner::from_key).transpose()?;
        let callbacks = Callbacks::new(issuer.policy().landing_path.clone());

        Ok(Self {
            config,
            keys,
            tool,
            states,
            nonces,
            issuer,
            callbacks,
        })
    }

    /// Use a preconfigured HTTP client for JWKS fetches.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.keys = self.keys.with_client(client);
        self
    }

    /// Respond to successful launches with `handler`.
    pub fn with_on_success(mut self, handler: SuccessHandler<LaunchOutcome>) -> Self {
        self.callbacks.set_on_success(handler);
        self
    }

    /// Respond to failed launches with `handler`.
    pub fn with_on_error(mut self, handler: ErrorHandler) -> Self {
        self.callbacks.set_on_error(handler);
        self
    }

    /// Configuration.
    pub fn config(&self) -> &LtiConfig {
        &self.config
    }

    /// Session issuer.
    pub fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    /// Outcome hooks.
    pub fn callbacks(&self) -> &Callbacks<LaunchOutcome> {
        &self.callbacks
    }

    /// Handle third-party login initiation and build the platform redirect.
    ///
    /// # Errors
    ///
    /// - `MissingClaim` if `iss`, `login_hint` or `target_link_uri` is absent
    /// - `UnknownIssuer` if `iss` is not a trusted platform
    /// - `AudienceMismatch` if `client_id` is given and is not ours
    pub async fn login_url(&self, params: &LoginParams) -> AuthResult<String> {
        let iss = present(&params.iss).ok_or_else(|| AuthError::MissingClaim("iss".to_string()))?;
        let login_hint = present(&params.login_hint)
            .ok_or_else(|| AuthError::MissingClaim("login_hint".to_string()))?;
        present(&params.target_link_uri)
            .ok_or_else(|| AuthError::MissingClaim("target_link_uri".to_string()))?;

        let platform = self.config.platform(iss)?;
        if let Some(client_id) = present(&params.client_id) {
            if client_id != platform.client_id {
                return Err(AuthError::AudienceMismatch(format!(
                    "login initiated for client {}",
                    client_id
                )));
            }
        }

        let now = self.issuer.clock().now();
        let state = random_token();
        let nonce = random_token();
        self.states
            .save(&state, now + self.issuer.policy().state_ttl())
            .await?;
        self.nonces
            .save(&nonce, now + self.issuer.policy().nonce_ttl())
            .await?;

        let mut url = url::Url::parse(&platform.auth_endpoint)
            .map_err(|e| AuthError::ConfigError(format!("invalid platform auth endpoint: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("scope", "openid")
                .append_pair("response_type", "id_token")
                .append_pair("response_mode", "form_post")
                .append_pair("prompt", "none")
                .append_pair("client_id", &platform.client_id)
                .append_pair("redirect_uri", &self.config.launch_url)
                .append_pair("login_hint", login_hint)
                .append_pair("state", &state)
                .append_pair("nonce", &nonce);
            if let Some(hint) = present(&params.lti_message_hint) {
                query.append_pair("lti_message_hint", hint);
            }
        }

        debug!(
            platform = %platform.issuer,
            deployment = ?params.lti_deployment_id,
            "Issued LTI state and nonce"
        );
        Ok(url.to_string())
    }

    /// Verify a launch and, if it holds up, create a session.
    pub async fn launch(&self, form: &LaunchForm) -> AuthResult<LaunchOutcome> {
        if let Some(error) = present(&form.error) {
            let detail = match present(&form.error_description) {
                Some(description) => format!("{}: {}", error, description),
                None => error.to_string(),
            };
            return Err(AuthError::ProviderError(detail));
        }

        let token = present(&form.id_token)
            .ok_or_else(|| AuthError::MissingClaim("id_token".to_string()))?;
        let state = present(&form.state).ok_or(AuthError::MissingState)?;

        if !self.states.validate(state).await? {
            return Err(AuthError::InvalidState);
        }

        let claimed_issuer = unverified_issuer(token)?;
        let platform = self.config.platform(&claimed_issuer)?;
        let claims = self.verify(token, platform).await?;

        check_audience(&claims, &platform.client_id)?;

        let nonce = claims
            .get("nonce")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or(AuthError::MissingNonce)?;
        if !self.nonces.consume(nonce).await? {
            return Err(AuthError::NonceReplay);
        }

        let launch = LaunchRecord::from_claims(&claims)?;
        if !platform.accepts_deployment(launch.deployment_id.as_deref()) {
            return Err(AuthError::InvalidToken(format!(
                "deployment {} is not registered",
                launch.deployment_id.as_deref().unwrap_or("(none)")
            )));
        }

        let user = self.user_from_launch(&launch, claims);
        let session = self.issuer.issue(user).await?;
        info!(
            platform = %launch.issuer,
            user_id = %session.user.id,
            message_type = %launch.message_type,
            "LTI launch completed"
        );

        Ok(LaunchOutcome { session, launch })
    }

    /// Tool public key set.
    pub fn jwks(&self) -> AuthResult<JwkSet> {
        Ok(self.signer()?.jwks())
    }

    /// Sign a Deep Linking response for a `LtiDeepLinkingRequest` launch.
    pub fn deep_linking_response(
        &self,
        launch: &LaunchRecord,
        items: &[ContentItem],
        message: Option<&str>,
    ) -> AuthResult<DeepLinkingReturn> {
        let platform = self.config.platform(&launch.issuer)?;
        deep_linking_response(
            self.signer()?,
            &platform.client_id,
            launch,
            items,
            message,
            self.issuer.clock().now(),
        )
    }

    /// Delete the caller's session and clear the cookie.
    pub async fn logout(&self, jar: CookieJar) -> CookieJar {
        self.issuer.revoke(jar).await
    }

    fn signer(&self) -> AuthResult<&ToolSigner> {
        self.tool
            .as_ref()
            .ok_or_else(|| AuthError::ConfigError("no LTI tool key configured".to_string()))
    }

    async fn verify(&self, token: &str, platform: &PlatformConfig) -> AuthResult<Map<String, Value>> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::InvalidToken(format!(
                "unsupported signing algorithm {:?}",
                header.alg
            )));
        }

        let key = self.keys.decoding_key(platform, header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&platform.issuer]);
        validation.validate_aud = false;

        let data = decode::<Map<String, Value>>(token, &key, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => AuthError::InvalidSignature("id_token signature".to_string()),
            ErrorKind::ExpiredSignature => AuthError::InvalidToken("id_token has expired".to_string()),
            ErrorKind::InvalidIssuer => AuthError::UnknownIssuer(platform.issuer.clone()),
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        debug!(platform = %platform.issuer, kid = ?header.kid, "LTI id_token signature verified");
        Ok(data.claims)
    }

    fn user_from_launch(&self, launch: &LaunchRecord, claims: Map<String, Value>) -> User {
        let mut user = User::new(launch.subject.clone());
        if let Some(email) = &launch.email {
            user = user.with_email(email.clone(), true);
        }
        user.name = launch.display_name();
        user.avatar_url = launch.picture.clone();

        user.extra.insert("issuer".to_string(), launch.issuer.clone());
        user.extra.insert("message_type".to_string(), launch.message_type.clone());
        if !launch.roles.is_empty() {
            user.extra.insert("roles".to_string(), launch.roles.join(","));
        }
        let optional = [
            ("deployment_id", launch.deployment_id.as_deref()),
            ("context_id", launch.context_id()),
            ("context_title", launch.context_title()),
            ("resource_link_id", launch.resource_link_id()),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                user.extra.insert(key.to_string(), value.to_string());
            }
        }

        user.raw = claims.into_iter().collect();
        user.stamp(&self.config.provider_name, None);
        user
    }
}

/// Read `iss` without verifying anything.
///
/// Only used to pick the trusted platform whose key then verifies the token.
fn unverified_issuer(token: &str) -> AuthResult<String> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Map<String, Value>>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    data.claims
        .get("iss")
        .and_then(Value::as_str)
        .filter(|iss| !iss.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AuthError::MissingClaim("iss".to_string()))
}

/// `aud` must be our client id, or an array containing it. With several
/// audiences, `azp` must also be our client id.
fn check_audience(claims: &Map<String, Value>, client_id: &str) -> AuthResult<()> {
    let ok = match claims.get("aud") {
        Some(Value::String(aud)) => aud == client_id,
        Some(Value::Array(auds)) => {
            let listed = auds.iter().any(|a| a.as_str() == Some(client_id));
            let azp_ok = auds.len() == 1
                || claims.get("azp").and_then(Value::as_str) == Some(client_id);
            listed && azp_ok
        }
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(AuthError::AudienceMismatch(format!(
            "id_token is not addressed to {}",
            client_id
        )))
    }
}
