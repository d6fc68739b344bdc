//! Session issuance and revocation
//!
//! Every adapter ends a successful login the same way: snapshot the user
//! into a new [`Session`], persist it, and hand the browser a cookie whose
//! value is the session id. [`SessionIssuer`] owns that last step along
//! with the cookie policy, so the three protocols cannot drift apart.

use crate::config::{CookiePolicy, SessionPolicy};
use crate::middleware::AuthGate;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use broker_core::{
    system_clock, AuthResult, SessionId, SessionStore, SharedClock, User, Session,
};
use std::sync::Arc;
use time::Duration;

/// Creates, persists and revokes sessions.
#[derive(Clone)]
pub struct SessionIssuer {
    store: Arc<dyn SessionStore>,
    cookie: CookiePolicy,
    policy: SessionPolicy,
    clock: SharedClock,
}

impl std::fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIssuer")
            .field("cookie", &self.cookie)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SessionIssuer {
    /// Create an issuer with default cookie and session policies.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            cookie: CookiePolicy::default(),
            policy: SessionPolicy::default(),
            clock: system_clock(),
        }
    }

    /// Set the cookie policy.
    pub fn with_cookie_policy(mut self, cookie: CookiePolicy) -> Self {
        self.cookie = cookie;
        self
    }

    /// Set the session policy.
    pub fn with_session_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Validate cookie and session policies.
    pub fn validate(&self) -> AuthResult<()> {
        self.cookie.validate()?;
        self.policy.validate()
    }

    /// Cookie policy.
    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.cookie
    }

    /// Session policy.
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Clock shared with the adapters.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Session store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Middleware state reading sessions written by this issuer.
    pub fn gate(&self) -> AuthGate {
        AuthGate::new(self.store.clone(), &self.cookie, &self.policy).with_clock(self.clock.clone())
    }

    /// Create and persist a session for `user`.
    ///
    /// This is the final step of every login state machine; nothing is
    /// persisted when an earlier step fails.
    pub async fn issue(&self, user: User) -> AuthResult<Session> {
        let session = Session::new(user, self.policy.session_duration(), self.clock.now())?;
        self.store.save(&session).await?;

        tracing::info!(
            provider = %session.user.provider,
            user_id = %session.user.id,
            session = %session.id.short(),
            expires_at = %session.expires_at,
            "Session issued"
        );
        Ok(session)
    }

    /// Session cookie for `session`.
    pub fn cookie(&self, session: &Session) -> Cookie<'static> {
        let mut builder = Cookie::build((self.cookie.name.clone(), session.id.to_string()))
            .http_only(true)
            .secure(self.cookie.secure)
            .same_site(self.cookie.same_site.into())
            .path(self.cookie.path.clone())
            .max_age(Duration::seconds(self.policy.session_duration_secs));
        if let Some(domain) = &self.cookie.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    /// Removal cookie matching the session cookie's name, path and domain.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut builder = Cookie::build((self.cookie.name.clone(), ""))
            .http_only(true)
            .secure(self.cookie.secure)
            .same_site(self.cookie.same_site.into())
            .path(self.cookie.path.clone())
            .max_age(Duration::ZERO);
        if let Some(domain) = &self.cookie.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    /// Delete the session named by the request cookie and clear the cookie.
    ///
    /// Never fails: a store error is logged and the cookie is cleared anyway.
    pub async fn revoke(&self, jar: CookieJar) -> CookieJar {
        let session_id = jar
            .get(&self.cookie.name)
            .and_then(|c| SessionId::parse(c.value()));

        if let Some(id) = session_id {
            match self.store.delete(&id).await {
                Ok(()) => tracing::info!(session = %id.short(), "Session revoked"),
                Err(e) => tracing::error!(
                    session = %id.short(),
                    error = %e,
                    "Failed to delete session on logout"
                ),
            }
        }

        jar.add(self.removal_cookie())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSitePolicy;
    use async_trait::async_trait;
    use broker_core::{MemorySessionStore, StoreError, StoreResult};

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn save(&self, _session: &Session) -> StoreResult<()> {
            Err(StoreError::Connection("down".to_string()))
        }
        async fn get(&self, _id: &SessionId) -> StoreResult<Option<Session>> {
            Err(StoreError::Connection("down".to_string()))
        }
        async fn delete(&self, _id: &SessionId) -> StoreResult<()> {
            Err(StoreError::Connection("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_issue_persists_session() {
        let store = Arc::new(MemorySessionStore::new());
        let issuer = SessionIssuer::new(store.clone());

        let mut user = User::new("u1");
        user.stamp("github", None);
        let session = issuer.issue(user).await.unwrap();

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.user.provider, "github");
    }

    #[tokio::test]
    async fn test_issue_propagates_store_failure() {
        let issuer = SessionIssuer::new(Arc::new(FailingStore));
        assert!(issuer.issue(User::new("u1")).await.is_err());
    }

    #[tokio::test]
    async fn test_cookie_attributes() {
        let issuer = SessionIssuer::new(Arc::new(MemorySessionStore::new())).with_cookie_policy(
            CookiePolicy::cross_site()
                .with_name("lti_session")
                .with_path("/app"),
        );
        let session = issuer.issue(User::new("u1")).await.unwrap();
        let cookie = issuer.cookie(&session);

        assert_eq!(cookie.name(), "lti_session");
        assert_eq!(cookie.value(), session.id.as_str());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSitePolicy::None.into()));
        assert_eq!(cookie.path(), Some("/app"));
        assert_eq!(cookie.max_age(), Some(Duration::hours(24)));
    }

    #[tokio::test]
    async fn test_revoke_deletes_session() {
        let store = Arc::new(MemorySessionStore::new());
        let issuer = SessionIssuer::new(store.clone());
        let session = issuer.issue(User::new("u1")).await.unwrap();

        let jar = CookieJar::new().add(issuer.cookie(&session));
        let jar = issuer.revoke(jar).await;

        assert!(store.get(&session.id).await.unwrap().is_none());
        assert_eq!(jar.get("broker_session").map(|c| c.value()), Some(""));
    }

    #[tokio::test]
    async fn test_revoke_survives_store_failure() {
        let issuer = SessionIssuer::new(Arc::new(FailingStore));
        let jar = CookieJar::new().add(Cookie::new("broker_session", SessionId::generate().to_string()));

        let jar = issuer.revoke(jar).await;
        assert_eq!(jar.get("broker_session").map(|c| c.value()), Some(""));
    }
}
