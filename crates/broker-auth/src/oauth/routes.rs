//! HTTP endpoints for the OAuth 2.0 flow
//!
//! - `GET /login`: redirect to the provider
//! - `GET|POST /callback`: finish the login (query or `form_post`)
//! - `GET|POST /logout`: revoke the session and clear the cookie

use crate::oauth::engine::{CallbackParams, OAuth2Engine};
use axum::extract::{Form, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

/// Router exposing the OAuth endpoints for one provider.
pub fn router(engine: Arc<OAuth2Engine>) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback).post(callback_form))
        .route("/logout", get(logout).post(logout))
        .with_state(engine)
}

async fn login(State(engine): State<Arc<OAuth2Engine>>) -> Response {
    match engine.authorization_url().await {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => engine.callbacks().failure("oauth2", &e),
    }
}

async fn callback(
    State(engine): State<Arc<OAuth2Engine>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    finish(&engine, jar, params).await
}

async fn callback_form(
    State(engine): State<Arc<OAuth2Engine>>,
    jar: CookieJar,
    Form(params): Form<CallbackParams>,
) -> Response {
    finish(&engine, jar, params).await
}

async fn finish(engine: &OAuth2Engine, jar: CookieJar, params: CallbackParams) -> Response {
    match engine.complete(&params).await {
        Ok(session) => {
            let jar = jar.add(engine.issuer().cookie(&session));
            (jar, engine.callbacks().success(&session)).into_response()
        }
        Err(e) => engine.callbacks().failure("oauth2", &e),
    }
}

async fn logout(State(engine): State<Arc<OAuth2Engine>>, jar: CookieJar) -> impl IntoResponse {
    let jar = engine.logout(jar).await;
    (jar, Redirect::to(&engine.issuer().policy().landing_path))
}
