//! OAuth 2.0 authorization-code engine
//!
//! One login attempt moves through these steps, strictly in order:
//!
//! 1. **Login**: a fresh state value is stored for the state TTL and the
//!    browser is redirected to the provider's authorization endpoint.
//! 2. **Callback**: a provider `error` ends the attempt. Otherwise `state`
//!    and `code` must both be present; the state is consumed exactly once.
//! 3. **Exchange**: the code is exchanged at the token endpoint.
//! 4. **Identity**: the configured [`IdentityFetcher`] turns the token into
//!    a user, which is stamped with the provider tag and the token.
//! 5. **Session**: a session is created and persisted. Only now does the
//!    attempt leave anything behind besides the consumed state.
//!
//! There is no retry. A failed attempt starts over from step 1. The token
//! exchange runs on a client with a request timeout and does not follow
//! redirects.

use crate::http;
use crate::oauth::config::OAuthConfig;
use crate::response::{Callbacks, ErrorHandler, SuccessHandler};
use crate::session::SessionIssuer;
use axum_extra::extract::cookie::CookieJar;
use broker_core::{
    random_token, AuthError, AuthResult, IdentityFetcher, Session, StateStore, TokenSet,
};
use oauth2::basic::{BasicClient, BasicErrorResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, HttpRequest,
    HttpResponse, RedirectUrl, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Query or form parameters delivered to the callback endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    #[serde(default)]
    pub code: Option<String>,

    /// State echoed by the provider
    #[serde(default)]
    pub state: Option<String>,

    /// Error code reported by the provider
    #[serde(default)]
    pub error: Option<String>,

    /// Human-readable error detail reported by the provider
    #[serde(default)]
    pub error_description: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Authorization-code flow for one provider.
pub struct OAuth2Engine {
    config: OAuthConfig,
    client: BasicClient,
    http: reqwest::Client,
    fetcher: Arc<dyn IdentityFetcher>,
    states: Arc<dyn StateStore>,
    issuer: SessionIssuer,
    callbacks: Callbacks<Session>,
}

impl std::fmt::Debug for OAuth2Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Engine")
            .field("config", &self.config)
            .field("issuer", &self.issuer)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl OAuth2Engine {
    /// Create an engine.
    ///
    /// # Arguments
    ///
    /// * `config` - Client credentials and endpoints
    /// * `fetcher` - Vendor identity fetcher
    /// * `states` - Store for CSRF state values
    /// * `issuer` - Session store and cookie policy
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any required setting is missing or invalid.
    pub fn new(
        config: OAuthConfig,
        fetcher: Arc<dyn IdentityFetcher>,
        states: Arc<dyn StateStore>,
        issuer: SessionIssuer,
    ) -> AuthResult<Self> {
        config.validate()?;
        issuer.validate()?;

        let config_error = |e: oauth2::url::ParseError| AuthError::ConfigError(e.to_string());
        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.get_auth_url()?).map_err(config_error)?,
            Some(TokenUrl::new(config.get_token_url()?).map_err(config_error)?),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_url.clone()).map_err(config_error)?)
        .set_auth_type(AuthType::RequestBody);

        let callbacks = Callbacks::new(issuer.policy().landing_path.clone());

        Ok(Self {
            config,
            client,
            http: http::token_client(http::default_timeout())?,
            fetcher,
            states,
            issuer,
            callbacks,
        })
    }

    /// Send token requests through `client`. It should not follow redirects.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Respond to successful logins with `handler` instead of the landing redirect.
    pub fn with_on_success(mut self, handler: SuccessHandler<Session>) -> Self {
        self.callbacks.set_on_success(handler);
        self
    }

    /// Respond to failed logins with `handler` instead of the generic 401.
    pub fn with_on_error(mut self, handler: ErrorHandler) -> Self {
        self.callbacks.set_on_error(handler);
        self
    }

    /// Provider tag.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Session issuer.
    pub fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    /// Outcome hooks.
    pub fn callbacks(&self) -> &Callbacks<Session> {
        &self.callbacks
    }

    /// Issue a state value and build the provider authorization URL.
    pub async fn authorization_url(&self) -> AuthResult<String> {
        let state = random_token();
        let expires_at = self.issuer.clock().now() + self.issuer.policy().state_ttl();
        self.states.save(&state, expires_at).await?;

        let mut request = self
            .client
            .authorize_url(|| CsrfToken::new(state.clone()));
        for scope in &self.config.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        for (key, value) in &self.config.extra_params {
            request = request.add_extra_param(key.clone(), value.clone());
        }
        let (url, _) = request.url();

        debug!(provider = %self.config.name, "Issued OAuth state");
        Ok(url.to_string())
    }

    /// Validate a callback and, if it holds up, create a session.
    ///
    /// # Errors
    ///
    /// - `ProviderError` if the provider reported an error
    /// - `MissingState` / `MissingClaim("code")` if a parameter is absent or empty
    /// - `InvalidState` if the state is unknown, expired or already used
    /// - `TokenExchange`, `IdentityFetch` or `Store` if a later step fails
    pub async fn complete(&self, params: &CallbackParams) -> AuthResult<Session> {
        if let Some(error) = present(&params.error) {
            let detail = match present(&params.error_description) {
                Some(description) => format!("{}: {}", error, description),
                None => error.to_string(),
            };
            return Err(AuthError::ProviderError(detail));
        }

        let state = present(&params.state).ok_or(AuthError::MissingState)?;
        let code =
            present(&params.code).ok_or_else(|| AuthError::MissingClaim("code".to_string()))?;

        if !self.states.validate(state).await? {
            return Err(AuthError::InvalidState);
        }
        debug!(provider = %self.config.name, "OAuth state validated");

        let token = self.exchange_code(code).await?;
        let mut user = self.fetcher.fetch_identity(&token).await?;
        user.stamp(&self.config.name, Some(token.credentials()));

        let session = self.issuer.issue(user).await?;
        info!(provider = %self.config.name, user_id = %session.user.id, "OAuth login completed");
        Ok(session)
    }

    /// Delete the caller's session and clear the cookie.
    pub async fn logout(&self, jar: CookieJar) -> CookieJar {
        self.issuer.revoke(jar).await
    }

    async fn exchange_code(&self, code: &str) -> AuthResult<TokenSet> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(|request| send_token_request(&self.http, request))
            .await
            .map_err(describe_exchange_error)?;

        let now = self.issuer.clock().now();
        Ok(TokenSet {
            access_token: response.access_token().secret().clone(),
            token_type: response.token_type().as_ref().to_string(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_at: response
                .expires_in()
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| now + d),
            scopes: response
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.as_str().to_string()).collect())
                .unwrap_or_default(),
        })
    }
}

async fn send_token_request(
    client: &reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let mut builder = client
        .request(request.method, request.url.as_str())
        .body(request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let response = builder.send().await?;
    let status_code = response.status();
    let headers = response.headers().to_owned();
    let body = response.bytes().await?;
    Ok(HttpResponse {
        status_code,
        headers,
        body: body.to_vec(),
    })
}

fn describe_exchange_error<RE>(e: RequestTokenError<RE, BasicErrorResponse>) -> AuthError
where
    RE: std::error::Error + 'static,
{
    let detail = match e {
        RequestTokenError::ServerResponse(response) => response.to_string(),
        RequestTokenError::Parse(err, _) => format!("unparseable token response: {}", err),
        RequestTokenError::Request(err) => format!("token request failed: {}", err),
        other => other.to_string(),
    };
    AuthError::TokenExchange(detail)
}
