//! Redis-backed stores for distributed deployments.
//!
//! Tokens are written with `SET NX PX` so Redis drops them at expiry, and
//! consumed with `DEL`, which reports a removed key to exactly one caller.
//! Replay records use the same `NX` write, which answers `OK` only to the
//! first writer.
//! Sessions are stored as JSON with a TTL matching their expiry.

use crate::clock::{system_clock, SharedClock};
use crate::error::{StoreError, StoreResult};
use crate::session::{Session, SessionId};
use crate::store::{NonceStore, ReplayCache, SessionStore, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

async fn connect(redis_url: &str) -> StoreResult<ConnectionManager> {
    let client = Client::open(redis_url).map_err(|e| StoreError::Connection(e.to_string()))?;
    ConnectionManager::new(client)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))
}

/// Redis single-use token store.
///
/// Implements both [`StateStore`] and [`NonceStore`]. Give each purpose
/// its own prefix.
///
/// # Example
///
/// ```rust,no_run
/// use broker_core::RedisTokenStore;
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let states = RedisTokenStore::new("redis://localhost:6379", "broker:state").await?;
///     let nonces = RedisTokenStore::new("redis://localhost:6379", "broker:nonce").await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: ConnectionManager,
    prefix: String,
    clock: SharedClock,
}

impl std::fmt::Debug for RedisTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTokenStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisTokenStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., `redis://localhost:6379`)
    /// * `prefix` - Key prefix for this store (e.g., `broker:state`)
    pub async fn new(redis_url: &str, prefix: &str) -> StoreResult<Self> {
        Ok(Self {
            conn: connect(redis_url).await?,
            prefix: prefix.to_string(),
            clock: system_clock(),
        })
    }

    fn key(&self, token: &str) -> String {
        format!("{}:{}", self.prefix, token)
    }

    /// `SET NX PX`; returns whether the key was newly written.
    async fn insert(&self, token: &str, expires_at: DateTime<Utc>) -> StoreResult<bool> {
        let ttl_ms = (expires_at - self.clock.now()).num_milliseconds();
        if ttl_ms <= 0 {
            tracing::debug!(prefix = %self.prefix, "Skipping save of already expired token");
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let written = redis::cmd("SET")
            .arg(self.key(token))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(written.is_some())
    }

    async fn take(&self, token: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(self.key(token)).await?;
        Ok(removed == 1)
    }
}

#[async_trait]
impl StateStore for RedisTokenStore {
    async fn save(&self, state: &str, expires_at: DateTime<Utc>) -> StoreResult<()> {
        self.insert(state, expires_at).await.map(|_| ())
    }

    async fn validate(&self, state: &str) -> StoreResult<bool> {
        self.take(state).await
    }
}

#[async_trait]
impl NonceStore for RedisTokenStore {
    async fn save(&self, nonce: &str, expires_at: DateTime<Utc>) -> StoreResult<()> {
        self.insert(nonce, expires_at).await.map(|_| ())
    }

    async fn consume(&self, nonce: &str) -> StoreResult<bool> {
        self.take(nonce).await
    }
}

#[async_trait]
impl ReplayCache for RedisTokenStore {
    async fn first_use(&self, id: &str, expires_at: DateTime<Utc>) -> StoreResult<bool> {
        self.insert(id, expires_at).await
    }
}

/// Redis session store.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    prefix: String,
    clock: SharedClock,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL
    /// * `prefix` - Key prefix for session records (e.g., `broker:session`)
    pub async fn new(redis_url: &str, prefix: &str) -> StoreResult<Self> {
        Ok(Self {
            conn: connect(redis_url).await?,
            prefix: prefix.to_string(),
            clock: system_clock(),
        })
    }

    fn key(&self, id: &SessionId) -> String {
        format!("{}:{}", self.prefix, id.as_str())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, session: &Session) -> StoreResult<()> {
        let encoded = serde_json::to_string(session)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        // Keep the record at least briefly so the caller can still read it back.
        let ttl_ms = (session.expires_at - self.clock.now())
            .num_milliseconds()
            .max(1);

        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(&session.id))
            .arg(encoded)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        let mut conn = self.conn.clone();
        let encoded: Option<String> = conn.get(self.key(id)).await?;
        encoded
            .map(|s| serde_json::from_str(&s).map_err(|e| StoreError::Serialization(e.to_string())))
            .transpose()
    }

    async fn delete(&self, id: &SessionId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(self.key(id)).await?;
        Ok(())
    }
}
