//! # Broker Auth
//!
//! Protocol adapters for the platform SSO broker.
//!
//! ## Overview
//!
//! Each adapter runs one federated login protocol to completion and ends
//! in the same place: a verified [`broker_core::User`] inside a
//! [`broker_core::Session`], persisted through a
//! [`broker_core::SessionStore`] and handed to the browser as a cookie.
//!
//! - **OAuth 2.0**: authorization code flow with provider presets
//!   (Google, GitHub, Microsoft) and pluggable identity fetchers
//! - **SAML 2.0**: Web SSO service provider (Redirect binding out, POST
//!   binding in) with SP metadata
//! - **LTI 1.3**: OIDC third-party initiated launch, platform JWKS,
//!   Deep Linking responses
//!
//! Every adapter exposes an axum [`Router`](axum::Router); protected
//! routes are wrapped with [`require_auth`] or [`require_auth_json`].
//!
//! ## Features
//!
//! - `oauth` (default): OAuth 2.0 adapter
//! - `saml` (default): SAML 2.0 adapter
//! - `lti` (default): LTI 1.3 adapter
//! - `xmlsec`: XML-DSig verification of SAML responses through libxmlsec1
//! - `redis`: Redis-backed stores from `broker-core`
//! - `full`: All of the above except `xmlsec`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use broker_auth::oauth::{self, OAuth2Engine, OAuthConfig, OAuthPreset, UserInfoFetcher};
//! use broker_auth::{require_auth_json, SessionIssuer};
//! use broker_core::{MemorySessionStore, MemoryTokenStore};
//! use axum::{middleware, routing::get, Router};
//! use std::sync::Arc;
//!
//! # fn build() -> broker_core::AuthResult<Router> {
//! let issuer = SessionIssuer::new(Arc::new(MemorySessionStore::new()));
//! let config = OAuthConfig::new(
//!     "google",
//!     OAuthPreset::Google,
//!     "client-id",
//!     "client-secret",
//!     "https://app.example.com/auth/google/callback",
//! );
//! let fetcher = Arc::new(UserInfoFetcher::from_config(&config)?);
//! let engine = OAuth2Engine::new(config, fetcher, Arc::new(MemoryTokenStore::new()), issuer.clone())?;
//!
//! let app = Router::new()
//!     .route("/me", get(|| async { "hello" }))
//!     .layer(middleware::from_fn_with_state(issuer.gate(), require_auth_json))
//!     .nest("/auth/google", oauth::router(Arc::new(engine)));
//! # Ok(app)
//! # }
//! ```

pub mod config;
pub mod http;
pub mod middleware;
pub mod response;
pub mod session;

#[cfg(feature = "lti")]
pub mod lti;
#[cfg(feature = "oauth")]
pub mod oauth;
#[cfg(feature = "saml")]
pub mod saml;

pub use config::{CookiePolicy, SameSitePolicy, SessionPolicy, DEFAULT_COOKIE_NAME};
pub use middleware::{require_auth, require_auth_json, AuthGate, CurrentSession, CurrentUser};
pub use response::{error_body, AuthRejection, Callbacks, ErrorHandler, SuccessHandler};
pub use session::SessionIssuer;
