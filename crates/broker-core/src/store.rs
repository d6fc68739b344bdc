//! State, nonce and session stores
//!
//! This module provides the store abstractions every protocol adapter
//! persists through, along with in-memory implementations.
//!
//! # Single-use tokens
//!
//! CSRF state values and launch nonces share one contract: a saved token
//! validates at most once. [`StateStore::validate`] and
//! [`NonceStore::consume`] check and remove the token as one atomic step,
//! so two concurrent callbacks carrying the same value can never both
//! succeed. Absent, consumed and expired tokens all report `false`.
//!
//! [`ReplayCache`] is the inverse: it remembers identifiers issued by a
//! third party (SAML assertion IDs) and accepts each one once until its
//! record expires.
//!
//! # Sessions
//!
//! Sessions are looked up by id. Deleting a missing session is not an
//! error. Stores return sessions as saved; expiry is checked by the
//! caller on every use.

use crate::clock::{system_clock, SharedClock};
use crate::error::{StoreError, StoreResult};
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Store for single-use CSRF state values (OAuth2 state, SAML relay state).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Save a state value valid until `expires_at`.
    async fn save(&self, state: &str, expires_at: DateTime<Utc>) -> StoreResult<()>;

    /// Validate and consume a state value.
    ///
    /// Returns `true` at most once per saved value.
    async fn validate(&self, state: &str) -> StoreResult<bool>;
}

/// Store for single-use launch nonces.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Save a nonce valid until `expires_at`.
    async fn save(&self, nonce: &str, expires_at: DateTime<Utc>) -> StoreResult<()>;

    /// Check and invalidate a nonce.
    ///
    /// Returns `true` at most once per saved value.
    async fn consume(&self, nonce: &str) -> StoreResult<bool>;
}

/// Store of externally issued identifiers that may be accepted only once.
#[async_trait]
pub trait ReplayCache: Send + Sync {
    /// Record `id` as used until `expires_at`.
    ///
    /// Returns `true` on first use and `false` while an earlier record of
    /// the same `id` is still live. Check and insert are one atomic step.
    async fn first_use(&self, id: &str, expires_at: DateTime<Utc>) -> StoreResult<bool>;
}

/// Store for authenticated sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a session.
    async fn save(&self, session: &Session) -> StoreResult<()>;

    /// Load a session by id.
    async fn get(&self, id: &SessionId) -> StoreResult<Option<Session>>;

    /// Delete a session. Deleting an unknown id succeeds.
    async fn delete(&self, id: &SessionId) -> StoreResult<()>;
}

/// In-memory single-use token store.
///
/// Implements [`StateStore`], [`NonceStore`] and [`ReplayCache`]; use one instance
/// per purpose. Suitable for single-process deployments and testing.
/// For multiple instances, use the Redis backend.
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: SharedClock,
}

impl std::fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTokenStore").finish_non_exhaustive()
    }
}

impl MemoryTokenStore {
    /// Create an empty store using the wall clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of tokens currently held, including expired ones not yet pruned.
    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    /// Check whether the store holds no tokens.
    pub async fn is_empty(&self) -> bool {
        self.tokens.lock().await.is_empty()
    }

    async fn insert(&self, token: &str, expires_at: DateTime<Utc>) {
        let now = self.clock.now();
        let mut tokens = self.tokens.lock().await;
        tokens.retain(|_, exp| *exp >= now);
        tokens.insert(token.to_string(), expires_at);
    }

    async fn insert_new(&self, token: &str, expires_at: DateTime<Utc>) -> bool {
        let now = self.clock.now();
        let mut tokens = self.tokens.lock().await;
        tokens.retain(|_, exp| *exp >= now);
        if tokens.contains_key(token) {
            return false;
        }
        tokens.insert(token.to_string(), expires_at);
        true
    }

    async fn take(&self, token: &str) -> bool {
        let now = self.clock.now();
        // Removal happens under the same lock as the check.
        let removed = self.tokens.lock().await.remove(token);
        matches!(removed, Some(expires_at) if now <= expires_at)
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryTokenStore {
    async fn save(&self, state: &str, expires_at: DateTime<Utc>) -> StoreResult<()> {
        self.insert(state, expires_at).await;
        Ok(())
    }

    async fn validate(&self, state: &str) -> StoreResult<bool> {
        Ok(self.take(state).await)
    }
}

#[async_trait]
impl NonceStore for MemoryTokenStore {
    async fn save(&self, nonce: &str, expires_at: DateTime<Utc>) -> StoreResult<()> {
        self.insert(nonce, expires_at).await;
        Ok(())
    }

    async fn consume(&self, nonce: &str) -> StoreResult<bool> {
        Ok(self.take(nonce).await)
    }
}

#[async_trait]
impl ReplayCache for MemoryTokenStore {
    async fn first_use(&self, id: &str, expires_at: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self.insert_new(id, expires_at).await)
    }
}

/// In-memory session store.
///
/// Sessions are held as serialized JSON, the same shape a remote store
/// would keep, so transient credentials never survive a round trip.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, String>>>,
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore").finish_non_exhaustive()
    }
}

impl MemorySessionStore {
    /// Create an empty session store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Check whether the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &Session) -> StoreResult<()> {
        let encoded = serde_json::to_string(session)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), encoded);
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|encoded| {
                serde_json::from_str(encoded).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn delete(&self, id: &SessionId) -> StoreResult<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}
