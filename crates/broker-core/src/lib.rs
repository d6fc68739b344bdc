//! # Broker Core
//!
//! Protocol-independent primitives for the platform SSO broker.
//!
//! ## Overview
//!
//! Every protocol adapter in `broker-auth` ends in the same place: a
//! normalized [`User`] embedded in a [`Session`], persisted in a
//! [`SessionStore`] and identified by an opaque cookie value. This crate
//! provides those pieces:
//!
//! - **Identity**: [`User`], [`TokenSet`] and the [`IdentityFetcher`] seam
//!   vendor adapters implement
//! - **Sessions**: [`Session`] and [`SessionId`] with open-ended expiry
//!   (`now > expires_at`)
//! - **Single-use tokens**: [`StateStore`] and [`NonceStore`] with atomic
//!   validate-and-consume
//! - **Clock/Random**: [`Clock`] and [`random_token`]
//!
//! ## Features
//!
//! In-memory stores are always available.
//!
//! - `redis`: Redis-backed stores for multi-instance deployments
//!
//! ## Usage
//!
//! ```rust
//! use broker_core::{MemoryTokenStore, StateStore, random_token};
//! use chrono::{Duration, Utc};
//!
//! # async fn example() -> broker_core::AuthResult<()> {
//! let store = MemoryTokenStore::new();
//! let state = random_token();
//! store.save(&state, Utc::now() + Duration::minutes(10)).await?;
//!
//! assert!(store.validate(&state).await?);
//! assert!(!store.validate(&state).await?);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod identity;
#[cfg(feature = "redis")]
pub mod redis;
pub mod session;
pub mod store;

pub use clock::{random_token, system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use error::{AuthError, AuthResult, StoreError, StoreResult};
pub use identity::{Credentials, IdentityFetcher, TokenSet, User};
#[cfg(feature = "redis")]
pub use redis::{RedisSessionStore, RedisTokenStore};
pub use session::{Session, SessionId};
pub use store::{
    MemorySessionStore, MemoryTokenStore, NonceStore, ReplayCache, SessionStore, StateStore,
};
