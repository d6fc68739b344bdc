//! Identity fetcher for OpenID Connect userinfo endpoints
//!
//! Covers any provider that answers a bearer-authenticated `GET` with the
//! standard claim names (`sub`, `email`, `email_verified`, `name`,
//! `picture`). Vendor-specific APIs get their own [`IdentityFetcher`].

use crate::http;
use crate::oauth::config::OAuthConfig;
use async_trait::async_trait;
use broker_core::{AuthError, AuthResult, IdentityFetcher, TokenSet, User};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde_json::Value;
use std::collections::HashMap;

const AGENT: &str = concat!("broker-auth/", env!("CARGO_PKG_VERSION"));

/// Claims copied into `User::extra` when present as strings.
const EXTRA_CLAIMS: &[&str] = &[
    "given_name",
    "family_name",
    "preferred_username",
    "locale",
    "zoneinfo",
    "hd",
    "login",
];

/// Fetches the user from a userinfo endpoint.
#[derive(Debug, Clone)]
pub struct UserInfoFetcher {
    client: reqwest::Client,
    userinfo_url: String,
}

impl UserInfoFetcher {
    /// Create a fetcher for `userinfo_url` with the default timeout.
    pub fn new(userinfo_url: impl Into<String>) -> AuthResult<Self> {
        Ok(Self {
            client: http::client(http::default_timeout())?,
            userinfo_url: userinfo_url.into(),
        })
    }

    /// Create a fetcher for the userinfo endpoint of `config`.
    pub fn from_config(config: &OAuthConfig) -> AuthResult<Self> {
        Self::new(config.get_userinfo_url()?)
    }

    /// Use a preconfigured HTTP client (timeouts, proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl IdentityFetcher for UserInfoFetcher {
    async fn fetch_identity(&self, token: &TokenSet) -> AuthResult<User> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(&token.access_token)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, AGENT)
            .send()
            .await
            .map_err(|e| AuthError::IdentityFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::IdentityFetch(format!(
                "userinfo endpoint returned {}",
                status
            )));
        }

        let claims: HashMap<String, Value> = response
            .json()
            .await
            .map_err(|e| AuthError::IdentityFetch(format!("invalid userinfo body: {}", e)))?;

        user_from_claims(claims)
    }
}

fn string_claim(claims: &HashMap<String, Value>, name: &str) -> Option<String> {
    match claims.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Map standard userinfo claims onto a [`User`].
///
/// Falls back to `id` for the subject and `avatar_url` for the picture,
/// which covers APIs that are close to, but not quite, OpenID.
pub fn user_from_claims(claims: HashMap<String, Value>) -> AuthResult<User> {
    let id = string_claim(&claims, "sub")
        .or_else(|| string_claim(&claims, "id"))
        .ok_or_else(|| AuthError::MissingClaim("sub".to_string()))?;

    let email_verified = match claims.get("email_verified") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    let mut user = User::new(id);
    user.email = string_claim(&claims, "email");
    user.email_verified = user.email.is_some() && email_verified;
    user.name = string_claim(&claims, "name").or_else(|| string_claim(&claims, "preferred_username"));
    user.avatar_url = string_claim(&claims, "picture").or_else(|| string_claim(&claims, "avatar_url"));

    for key in EXTRA_CLAIMS {
        if let Some(value) = string_claim(&claims, key) {
            user.extra.insert((*key).to_string(), value);
        }
    }
    user.raw = claims;

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn claims(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_standard_claims() {
        let user = user_from_claims(claims(json!({
            "sub": "1234",
            "email": "ada@example.edu",
            "email_verified": true,
            "name": "Ada Lovelace",
            "picture": "https://cdn.example.edu/ada.png",
            "given_name": "Ada",
        })))
        .unwrap();

        assert_eq!(user.id, "1234");
        assert_eq!(user.email.as_deref(), Some("ada@example.edu"));
        assert!(user.email_verified);
        assert_eq!(user.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(user.extra("given_name"), Some("Ada"));
        assert_eq!(user.raw["sub"], json!("1234"));
        assert!(user.provider.is_empty());
    }

    #[test]
    fn test_numeric_id_fallback() {
        let user = user_from_claims(claims(json!({
            "id": 583231,
            "login": "octocat",
            "avatar_url": "https://avatars.example.com/u/583231",
        })))
        .unwrap();

        assert_eq!(user.id, "583231");
        assert_eq!(user.extra("login"), Some("octocat"));
        assert!(user.avatar_url.is_some());
        assert!(!user.email_verified);
    }

    #[test]
    fn test_missing_subject() {
        let result = user_from_claims(claims(json!({ "email": "x@example.com" })));
        assert!(matches!(result, Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_string_email_verified() {
        let user = user_from_claims(claims(json!({
            "sub": "1",
            "email": "a@example.com",
            "email_verified": "true",
        })))
        .unwrap();
        assert!(user.email_verified);
    }

    #[tokio::test]
    async fn test_fetch_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer access-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "u-1",
                "email": "u1@example.com",
                "email_verified": true,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = UserInfoFetcher::new(format!("{}/userinfo", server.uri())).unwrap();
        let user = fetcher
            .fetch_identity(&TokenSet::bearer("access-123"))
            .await
            .unwrap();

        assert_eq!(user.id, "u-1");
        assert!(user.email_verified);
    }

    #[tokio::test]
    async fn test_fetch_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fetcher = UserInfoFetcher::new(format!("{}/userinfo", server.uri())).unwrap();
        let result = fetcher.fetch_identity(&TokenSet::bearer("expired")).await;
        assert!(matches!(result, Err(AuthError::IdentityFetch(_))));
    }

    #[tokio::test]
    async fn test_stalled_userinfo_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
            .mount(&server)
            .await;

        let fetcher = UserInfoFetcher::new(format!("{}/userinfo", server.uri()))
            .unwrap()
            .with_client(http::client(std::time::Duration::from_millis(200)).unwrap());
        let result = fetcher.fetch_identity(&TokenSet::bearer("access-123")).await;
        assert!(matches!(result, Err(AuthError::IdentityFetch(_))));
    }
}
