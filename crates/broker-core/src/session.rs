//! Authenticated sessions
//!
//! A session binds an opaque random id (the cookie value) to a snapshot
//! of the [`User`] taken at login. The snapshot is owned by the session,
//! so later changes to any identity store never alter an issued session.

use crate::clock::random_token;
use crate::error::{AuthError, AuthResult};
use crate::identity::User;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Opaque session identifier.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id with 256 bits of entropy.
    pub fn generate() -> Self {
        Self(random_token())
    }

    /// Wrap a value read from a cookie.
    ///
    /// Returns `None` for values that could not have been issued by
    /// [`SessionId::generate`], so garbage cookies never reach a store.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = !value.is_empty()
            && value.len() <= 128
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(value.to_string()))
    }

    /// The raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({}...)", self.short())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session id, also the cookie value
    pub id: SessionId,

    /// Identity snapshot taken at login
    pub user: User,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Expiry time
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session for `user` lasting `ttl` from `now`.
    ///
    /// # Errors
    ///
    /// Returns `MissingClaim` if the user has no id and `ConfigError` if the
    /// duration is not positive.
    pub fn new(user: User, ttl: Duration, now: DateTime<Utc>) -> AuthResult<Self> {
        if user.id.is_empty() {
            return Err(AuthError::MissingClaim("user id".to_string()));
        }
        if ttl <= Duration::zero() {
            return Err(AuthError::ConfigError(
                "Session duration must be positive".to_string(),
            ));
        }

        Ok(Self {
            id: SessionId::generate(),
            user,
            created_at: now,
            expires_at: now + ttl,
        })
    }

    /// Check expiry against a given instant. A session is still valid at
    /// exactly `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Check expiry against the wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User::new("user-1").with_email("user@example.edu", true)
    }

    #[test]
    fn test_session_creation() {
        let now = Utc::now();
        let session = Session::new(user(), Duration::hours(1), now).unwrap();

        assert_eq!(session.created_at, now);
        assert_eq!(session.expires_at, now + Duration::hours(1));
        assert!(session.expires_at > session.created_at);
        assert_eq!(session.id.as_str().len(), 43);
    }

    #[test]
    fn test_expiry_boundary_is_open() {
        let now = Utc::now();
        let session = Session::new(user(), Duration::minutes(30), now).unwrap();

        assert!(!session.is_expired_at(now));
        assert!(!session.is_expired_at(session.expires_at));
        assert!(session.is_expired_at(session.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn test_rejects_empty_user_id() {
        let result = Session::new(User::new(""), Duration::hours(1), Utc::now());
        assert!(matches!(result, Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        let result = Session::new(user(), Duration::zero(), Utc::now());
        assert!(matches!(result, Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn test_session_ids_unique() {
        let now = Utc::now();
        let a = Session::new(user(), Duration::hours(1), now).unwrap();
        let b = Session::new(user(), Duration::hours(1), now).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(id.as_str()), Some(id));
        assert!(SessionId::parse("").is_none());
        assert!(SessionId::parse("a b").is_none());
        assert!(SessionId::parse(&"x".repeat(200)).is_none());
    }

    #[test]
    fn test_remaining() {
        let now = Utc::now();
        let session = Session::new(user(), Duration::minutes(10), now).unwrap();
        assert_eq!(session.remaining(now), Duration::minutes(10));
        assert_eq!(session.remaining(now + Duration::hours(1)), Duration::zero());
    }
}
