//! LTI 1.3 tool (OIDC third-party initiated launch)
//!
//! [`LtiAdapter`] verifies launches from trusted platforms and can sign
//! Deep Linking responses; [`router`] mounts the login, launch and JWKS
//! endpoints. Launch data is exposed as a [`LaunchRecord`].

pub mod adapter;
pub mod claims;
pub mod config;
pub mod deep_linking;
pub mod keys;
pub mod routes;

pub use adapter::{LaunchForm, LaunchOutcome, LoginParams, LtiAdapter};
pub use claims::{DeepLinkingSettings, LaunchRecord};
pub use config::{LtiConfig, PlatformConfig, PlatformKey, ToolKey};
pub use deep_linking::{ContentItem, DeepLinkingReturn};
pub use keys::{Jwk, JwkSet, KeyResolver, ToolSigner};
pub use routes::router;
