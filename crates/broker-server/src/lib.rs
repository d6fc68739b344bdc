//! # Broker Server
//!
//! Standalone deployment of the platform SSO broker: environment-driven
//! [`settings`], and an [`app`] router mounting every configured login
//! protocol next to a protected `/me` endpoint.

pub mod app;
pub mod settings;

pub use app::{build_router, StartupError, Stores};
pub use settings::{BrokerSettings, SettingsError};
