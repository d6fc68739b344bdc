//! HTTP endpoints for SAML Web SSO
//!
//! - `GET /login`: redirect to the IdP
//! - `POST /acs`: Assertion Consumer Service (HTTP-POST binding)
//! - `GET /metadata`: SP metadata
//! - `GET|POST /logout`: revoke the local session

use crate::saml::adapter::{AcsForm, SamlAdapter};
use axum::extract::{Form, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

/// Router exposing the SAML endpoints.
pub fn router(adapter: Arc<SamlAdapter>) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/acs", post(acs))
        .route("/metadata", get(metadata))
        .route("/logout", get(logout).post(logout))
        .with_state(adapter)
}

async fn login(State(adapter): State<Arc<SamlAdapter>>) -> Response {
    match adapter.login_url().await {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => adapter.callbacks().failure("saml", &e),
    }
}

async fn acs(
    State(adapter): State<Arc<SamlAdapter>>,
    jar: CookieJar,
    Form(form): Form<AcsForm>,
) -> Response {
    match adapter.complete(&form).await {
        Ok(session) => {
            let jar = jar.add(adapter.issuer().cookie(&session));
            (jar, adapter.callbacks().success(&session)).into_response()
        }
        Err(e) => adapter.callbacks().failure("saml", &e),
    }
}

async fn metadata(State(adapter): State<Arc<SamlAdapter>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/samlmetadata+xml")],
        adapter.metadata(),
    )
}

async fn logout(State(adapter): State<Arc<SamlAdapter>>, jar: CookieJar) -> impl IntoResponse {
    let jar = adapter.logout(jar).await;
    (jar, Redirect::to(&adapter.issuer().policy().landing_path))
}
