//! Session middleware for protected routes
//!
//! Downstream handlers never talk to a protocol adapter. They sit behind
//! [`require_auth`] (browser routes, redirects to login) or
//! [`require_auth_json`] (API routes, structured 401), which load the
//! session named by the cookie and place exactly one [`CurrentUser`] and
//! [`CurrentSession`] into that request's extensions.
//!
//! ```rust,no_run
//! use axum::{middleware, routing::get, Router};
//! use broker_auth::{require_auth_json, CurrentUser, SessionIssuer};
//! use broker_core::MemorySessionStore;
//! use std::sync::Arc;
//!
//! async fn me(CurrentUser(user): CurrentUser) -> String {
//!     user.id
//! }
//!
//! let issuer = SessionIssuer::new(Arc::new(MemorySessionStore::new()));
//! let api: Router = Router::new()
//!     .route("/me", get(me))
//!     .route_layer(middleware::from_fn_with_state(issuer.gate(), require_auth_json));
//! ```

use crate::config::{CookiePolicy, SessionPolicy};
use crate::response::error_body;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use broker_core::{
    system_clock, AuthError, AuthResult, Session, SessionId, SessionStore, SharedClock, User,
};
use std::sync::Arc;

/// State for the session middleware.
#[derive(Clone)]
pub struct AuthGate {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
    login_path: String,
    clock: SharedClock,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("cookie_name", &self.cookie_name)
            .field("login_path", &self.login_path)
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Create a gate reading the cookie described by `cookie`.
    pub fn new(store: Arc<dyn SessionStore>, cookie: &CookiePolicy, policy: &SessionPolicy) -> Self {
        Self {
            store,
            cookie_name: cookie.name.clone(),
            login_path: policy.login_path.clone(),
            clock: system_clock(),
        }
    }

    /// Set the clock used for expiry checks.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve the session named by the request cookie.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` when the cookie is absent, malformed or names no session
    /// - `SessionExpired` when the session has expired; it is deleted on the way out
    /// - `Store` when the session store fails
    pub async fn authenticate(&self, jar: &CookieJar) -> AuthResult<Session> {
        let id = jar
            .get(&self.cookie_name)
            .and_then(|c| SessionId::parse(c.value()))
            .ok_or(AuthError::Unauthenticated)?;

        let session = self
            .store
            .get(&id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if session.is_expired_at(self.clock.now()) {
            if let Err(e) = self.store.delete(&id).await {
                tracing::warn!(session = %id.short(), error = %e, "Failed to delete expired session");
            }
            return Err(AuthError::SessionExpired);
        }

        Ok(session)
    }
}

/// Identity of the authenticated user, placed in request extensions by the
/// session middleware.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Full session record, placed in request extensions by the session middleware.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

fn attach(request: &mut Request, session: Session) {
    request.extensions_mut().insert(CurrentUser(session.user.clone()));
    request.extensions_mut().insert(CurrentSession(session));
}

/// Browser middleware: redirects to the login path without a valid session.
pub async fn require_auth(
    State(gate): State<AuthGate>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match gate.authenticate(&jar).await {
        Ok(session) => {
            attach(&mut request, session);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, path = %request.uri().path(), "Redirecting to login");
            Redirect::to(&gate.login_path).into_response()
        }
    }
}

/// API middleware: answers with a JSON error without a valid session.
pub async fn require_auth_json(
    State(gate): State<AuthGate>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match gate.authenticate(&jar).await {
        Ok(session) => {
            attach(&mut request, session);
            next.run(request).await
        }
        Err(e) => {
            if e.is_server_error() {
                tracing::error!(error = %e, "Session lookup failed");
            }
            error_body(&e)
        }
    }
}

fn missing_identity() -> Response {
    error_body(&AuthError::Unauthenticated)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(missing_identity)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or_else(missing_identity)
    }
}
