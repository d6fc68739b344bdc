//! Router assembly
//!
//! | Path | Purpose |
//! |------|---------|
//! | `/health` | liveness |
//! | `/me` | current user (JSON, session required) |
//! | `/auth/oauth/*` | OAuth 2.0 login, callback, logout |
//! | `/auth/saml/*` | SAML login, ACS, metadata, logout |
//! | `/auth/lti/*` | LTI login, launch, JWKS, logout |

use crate::settings::{BrokerSettings, SettingsError};
use axum::response::Json;
use axum::routing::get;
use axum::{middleware, Router};
use broker_auth::lti::{self, LtiAdapter};
use broker_auth::oauth::{self, OAuth2Engine, UserInfoFetcher};
use broker_auth::saml::{self, SamlAdapter};
use broker_auth::{http, require_auth_json, CurrentSession, SessionIssuer};
use broker_core::{
    AuthError, MemorySessionStore, MemoryTokenStore, NonceStore, RedisSessionStore,
    RedisTokenStore, ReplayCache, SessionStore, StateStore, StoreError,
};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Settings(#[from] SettingsError),

    #[error("adapter setup failed: {0}")]
    Auth(#[from] AuthError),

    #[error("store connection failed: {0}")]
    Store(#[from] StoreError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backing stores shared by every adapter.
#[derive(Clone)]
pub struct Stores {
    pub states: Arc<dyn StateStore>,
    pub nonces: Arc<dyn NonceStore>,
    pub replays: Arc<dyn ReplayCache>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    /// In-memory stores for single-instance deployments.
    pub fn memory() -> Self {
        Self {
            states: Arc::new(MemoryTokenStore::new()),
            nonces: Arc::new(MemoryTokenStore::new()),
            replays: Arc::new(MemoryTokenStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    /// Redis stores, one key prefix per purpose.
    pub async fn redis(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            states: Arc::new(RedisTokenStore::new(redis_url, "broker:state").await?),
            nonces: Arc::new(RedisTokenStore::new(redis_url, "broker:nonce").await?),
            replays: Arc::new(RedisTokenStore::new(redis_url, "broker:saml-assertion").await?),
            sessions: Arc::new(RedisSessionStore::new(redis_url, "broker:session").await?),
        })
    }

    /// Stores selected by `settings`.
    pub async fn from_settings(settings: &BrokerSettings) -> Result<Self, StoreError> {
        match &settings.redis_url {
            Some(url) => {
                info!("Using Redis stores");
                Self::redis(url).await
            }
            None => {
                warn!("REDIS_URL not set; using in-memory stores (single instance only)");
                Ok(Self::memory())
            }
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn me(CurrentSession(session): CurrentSession) -> Json<Value> {
    Json(json!({
        "user": session.user,
        "expires_at": session.expires_at,
    }))
}

/// Build the application router.
///
/// # Errors
///
/// Any adapter whose configuration is invalid aborts startup.
pub fn build_router(settings: &BrokerSettings, stores: &Stores) -> Result<Router, StartupError> {
    let issuer = SessionIssuer::new(stores.sessions.clone())
        .with_cookie_policy(settings.cookie.clone())
        .with_session_policy(settings.session.clone());
    issuer.validate()?;

    let timeout = settings.http_timeout();
    let mut app = Router::new()
        .route("/me", get(me))
        .layer(middleware::from_fn_with_state(issuer.gate(), require_auth_json))
        .route("/health", get(health));

    if let Some(config) = &settings.oauth {
        let fetcher = UserInfoFetcher::from_config(config)?.with_client(http::client(timeout)?);
        let engine = OAuth2Engine::new(
            config.clone(),
            Arc::new(fetcher),
            stores.states.clone(),
            issuer.clone(),
        )?
        .with_http_client(http::token_client(timeout)?);
        info!(provider = %engine.name(), "OAuth 2.0 enabled at /auth/oauth");
        app = app.nest("/auth/oauth", oauth::router(Arc::new(engine)));
    }

    if let Some(config) = &settings.saml {
        let adapter = SamlAdapter::new(
            config.clone(),
            stores.states.clone(),
            stores.replays.clone(),
            issuer.clone(),
            None,
        )?;
        info!(sp = %config.sp_entity_id, "SAML 2.0 enabled at /auth/saml");
        app = app.nest("/auth/saml", saml::router(Arc::new(adapter)));
    }

    if let Some(config) = &settings.lti {
        let lti_issuer = issuer.clone().with_cookie_policy(settings.lti_cookie());
        let adapter = LtiAdapter::new(
            config.clone(),
            stores.states.clone(),
            stores.nonces.clone(),
            lti_issuer,
        )?
        .with_http_client(http::client(timeout)?);
        info!(platforms = config.platforms.len(), "LTI 1.3 enabled at /auth/lti");
        app = app.nest("/auth/lti", lti::router(Arc::new(adapter)));
    }

    if !settings.has_protocol() {
        warn!("No login protocol configured; only /health and /me are served");
    }

    Ok(app)
}
