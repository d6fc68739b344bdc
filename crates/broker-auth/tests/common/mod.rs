//! Shared helpers for the end-to-end login tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use broker_core::{MemorySessionStore, Session, SessionId, SessionStore};
use tower::ServiceExt;

pub const COOKIE_NAME: &str = "broker_session";

/// Send one request through `router`.
pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

/// `application/x-www-form-urlencoded` POST.
pub fn post_form(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body = fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

pub fn location(response: &Response) -> String {
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    response.headers()[LOCATION].to_str().unwrap().to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Full `Set-Cookie` header for the session cookie, if any.
pub fn session_set_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{}=", COOKIE_NAME)))
        .map(str::to_string)
}

/// `name=value` pair to replay as a `Cookie` header.
pub fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

/// Session named by the response's cookie.
pub async fn issued_session(response: &Response, store: &MemorySessionStore) -> Session {
    let header = session_set_cookie(response).expect("session cookie");
    let pair = cookie_pair(&header);
    let value = pair.split_once('=').unwrap().1;
    let id = SessionId::parse(value).expect("session id");
    store.get(&id).await.unwrap().expect("stored session")
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Assert a generic rejection and return its error code.
pub async fn rejection_code(response: Response) -> String {
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    json_body(response).await["error"].as_str().unwrap().to_string()
}
