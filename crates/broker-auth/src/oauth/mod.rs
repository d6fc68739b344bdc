//! OAuth 2.0 authorization-code login
//!
//! [`OAuth2Engine`] drives one provider's login flow and [`router`]
//! exposes it over HTTP. Identities come from an
//! [`IdentityFetcher`](broker_core::IdentityFetcher) chosen per provider;
//! [`UserInfoFetcher`] covers providers with an OpenID userinfo endpoint.

pub mod config;
pub mod engine;
pub mod routes;
pub mod userinfo;

pub use config::{OAuthConfig, OAuthPreset};
pub use engine::{CallbackParams, OAuth2Engine};
pub use routes::router;
pub use userinfo::{user_from_claims, UserInfoFetcher};
