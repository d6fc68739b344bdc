//! HTTP endpoints for LTI 1.3
//!
//! - `GET|POST /login`: third-party login initiation
//! - `POST /launch`: `id_token` form post from the platform
//! - `GET /jwks`: tool public keys
//! - `GET|POST /logout`: revoke the local session

use crate::lti::adapter::{LaunchForm, LoginParams, LtiAdapter};
use crate::lti::keys::JwkSet;
use crate::response::AuthRejection;
use axum::extract::{Form, Query, State};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

/// Router exposing the LTI endpoints.
pub fn router(adapter: Arc<LtiAdapter>) -> Router {
    Router::new()
        .route("/login", get(login_query).post(login_form))
        .route("/launch", post(launch))
        .route("/jwks", get(jwks))
        .route("/logout", get(logout).post(logout))
        .with_state(adapter)
}

async fn login_query(
    State(adapter): State<Arc<LtiAdapter>>,
    Query(params): Query<LoginParams>,
) -> Response {
    login(&adapter, params).await
}

async fn login_form(
    State(adapter): State<Arc<LtiAdapter>>,
    Form(params): Form<LoginParams>,
) -> Response {
    login(&adapter, params).await
}

async fn login(adapter: &LtiAdapter, params: LoginParams) -> Response {
    match adapter.login_url(&params).await {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => adapter.callbacks().failure("lti", &e),
    }
}

async fn launch(
    State(adapter): State<Arc<LtiAdapter>>,
    jar: CookieJar,
    Form(form): Form<LaunchForm>,
) -> Response {
    match adapter.launch(&form).await {
        Ok(outcome) => {
            let jar = jar.add(adapter.issuer().cookie(&outcome.session));
            (jar, adapter.callbacks().success(&outcome)).into_response()
        }
        Err(e) => adapter.callbacks().failure("lti", &e),
    }
}

async fn jwks(State(adapter): State<Arc<LtiAdapter>>) -> Result<Json<JwkSet>, AuthRejection> {
    Ok(Json(adapter.jwks()?))
}

async fn logout(State(adapter): State<Arc<LtiAdapter>>, jar: CookieJar) -> impl IntoResponse {
    let jar = adapter.logout(jar).await;
    (jar, Redirect::to(&adapter.issuer().policy().landing_path))
}
