//! End-to-end tests for the OAuth 2.0 authorization-code login.
//!
//! A wiremock server plays the provider: it serves the token endpoint and
//! the userinfo endpoint. Requests go through the real axum router.

#![cfg(feature = "oauth")]

mod common;

use axum::http::StatusCode;
use axum::{middleware, Router};
use broker_auth::oauth::{self, OAuth2Engine, OAuthConfig, OAuthPreset, UserInfoFetcher};
use broker_auth::{require_auth_json, CurrentUser, SessionIssuer};
use broker_core::{MemorySessionStore, MemoryTokenStore};
use common::*;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    provider: MockServer,
    router: Router,
    sessions: Arc<MemorySessionStore>,
}

impl Fixture {
    async fn new() -> Self {
        let provider = MockServer::start().await;
        let sessions = Arc::new(MemorySessionStore::new());
        let issuer = SessionIssuer::new(sessions.clone());

        let config = OAuthConfig::new(
            "testprovider",
            OAuthPreset::Custom,
            "abc",
            "secret",
            "https://app.example.com/auth/oauth/callback",
        )
        .with_endpoints(
            format!("{}/authorize", provider.uri()),
            format!("{}/token", provider.uri()),
        )
        .with_userinfo_url(format!("{}/userinfo", provider.uri()));

        let fetcher = Arc::new(UserInfoFetcher::from_config(&config).unwrap());
        let engine = OAuth2Engine::new(
            config,
            fetcher,
            Arc::new(MemoryTokenStore::new()),
            issuer.clone(),
        )
        .unwrap();

        let router = Router::new()
            .route("/me", axum::routing::get(|CurrentUser(user): CurrentUser| async move { user.id }))
            .layer(middleware::from_fn_with_state(issuer.gate(), require_auth_json))
            .nest("/auth/oauth", oauth::router(Arc::new(engine)));

        Self {
            provider,
            router,
            sessions,
        }
    }

    async fn mount_provider(&self, expected_exchanges: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=xyz"))
            .and(body_string_contains("client_id=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(expected_exchanges)
            .mount(&self.provider)
            .await;

        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("Authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "u-1",
                "email": "ada@example.com",
                "email_verified": true,
                "name": "Ada Lovelace"
            })))
            .mount(&self.provider)
            .await;
    }

    async fn start_login(&self) -> String {
        let response = send(&self.router, get("/auth/oauth/login")).await;
        let redirect = location(&response);
        assert!(redirect.starts_with(&format!("{}/authorize", self.provider.uri())));
        assert_eq!(query_param(&redirect, "client_id").as_deref(), Some("abc"));
        query_param(&redirect, "state").unwrap()
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_login_creates_session_and_cookie() {
    let fixture = Fixture::new().await;
    fixture.mount_provider(1).await;

    let state = fixture.start_login().await;
    let response = send(
        &fixture.router,
        get(&format!("/auth/oauth/callback?code=xyz&state={}", state)),
    )
    .await;

    assert_eq!(location(&response), "/");
    let set_cookie = session_set_cookie(&response).unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));

    let session = issued_session(&response, &fixture.sessions).await;
    assert_eq!(session.user.id, "u-1");
    assert_eq!(session.user.provider, "testprovider");
    assert!(session.user.email_verified);

    // The cookie opens protected routes.
    let me = send(
        &fixture.router,
        get_with_cookie("/me", &cookie_pair(&set_cookie)),
    )
    .await;
    assert_eq!(me.status(), StatusCode::OK);
    let body = axum::body::to_bytes(me.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"u-1");
}

#[tokio::test]
async fn test_form_post_callback() {
    let fixture = Fixture::new().await;
    fixture.mount_provider(1).await;

    let state = fixture.start_login().await;
    let response = send(
        &fixture.router,
        post_form("/auth/oauth/callback", &[("code", "xyz"), ("state", &state)]),
    )
    .await;

    assert!(session_set_cookie(&response).is_some());
    assert_eq!(fixture.sessions.len().await, 1);
}

// =============================================================================
// Rejections
// =============================================================================

#[tokio::test]
async fn test_empty_state_rejected() {
    let fixture = Fixture::new().await;
    fixture.mount_provider(0).await;

    let response = send(&fixture.router, get("/auth/oauth/callback?code=xyz&state=")).await;

    assert!(session_set_cookie(&response).is_none());
    assert_eq!(rejection_code(response).await, "MISSING_STATE");
    assert!(fixture.sessions.is_empty().await);
}

#[tokio::test]
async fn test_state_reuse_rejected() {
    let fixture = Fixture::new().await;
    fixture.mount_provider(1).await;

    let state = fixture.start_login().await;
    let callback = format!("/auth/oauth/callback?code=xyz&state={}", state);

    let first = send(&fixture.router, get(&callback)).await;
    assert!(session_set_cookie(&first).is_some());

    let second = send(&fixture.router, get(&callback)).await;
    assert_eq!(rejection_code(second).await, "INVALID_STATE");
    assert_eq!(fixture.sessions.len().await, 1);
}

#[tokio::test]
async fn test_provider_error_rejected() {
    let fixture = Fixture::new().await;
    fixture.mount_provider(0).await;
    let state = fixture.start_login().await;

    let response = send(
        &fixture.router,
        get(&format!(
            "/auth/oauth/callback?error=access_denied&error_description=denied&state={}",
            state
        )),
    )
    .await;

    assert_eq!(rejection_code(response).await, "PROVIDER_ERROR");
}

#[tokio::test]
async fn test_protected_route_without_cookie() {
    let fixture = Fixture::new().await;

    let response = send(&fixture.router, get("/me")).await;
    assert_eq!(rejection_code(response).await, "UNAUTHORIZED");
}

#[tokio::test]
async fn test_logout_revokes_session() {
    let fixture = Fixture::new().await;
    fixture.mount_provider(1).await;

    let state = fixture.start_login().await;
    let login = send(
        &fixture.router,
        get(&format!("/auth/oauth/callback?code=xyz&state={}", state)),
    )
    .await;
    let cookie = cookie_pair(&session_set_cookie(&login).unwrap());

    let logout = send(&fixture.router, get_with_cookie("/auth/oauth/logout", &cookie)).await;
    assert_eq!(location(&logout), "/");
    assert!(session_set_cookie(&logout).unwrap().contains("Max-Age=0"));
    assert!(fixture.sessions.is_empty().await);

    let me = send(&fixture.router, get_with_cookie("/me", &cookie)).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
}
