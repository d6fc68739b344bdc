//! Platform verification keys and the tool signing key
//!
//! Platform keys come from a registered PEM or from the platform's JWKS
//! endpoint. A fetched key set is reused for the cache TTL. A `kid` that is
//! not in the cached set triggers a refetch to pick up a rotated key, but
//! at most once per endpoint per [`REFETCH_COOLDOWN_SECS`]; other unknown
//! key ids inside that window fail without touching the platform.

use crate::http;
use crate::lti::config::{PlatformConfig, PlatformKey, ToolKey};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use broker_core::{system_clock, AuthError, AuthResult, SharedClock};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

const MAX_CACHE_TTL_SECS: i64 = 7 * 24 * 3600;

/// Minimum gap between two unknown-`kid` refetches of the same endpoint.
pub const REFETCH_COOLDOWN_SECS: i64 = 60;

/// One RSA JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Select the key for `kid`. Without a `kid`, a set holding exactly one
    /// RSA key yields that key.
    pub fn select(&self, kid: Option<&str>) -> Option<&Jwk> {
        let mut candidates = self.keys.iter().filter(|k| k.kty == "RSA");
        match kid {
            Some(kid) => candidates.find(|k| k.kid.as_deref() == Some(kid)),
            None => {
                let first = candidates.next();
                if candidates.next().is_some() {
                    None
                } else {
                    first
                }
            }
        }
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> AuthResult<DecodingKey> {
    match (&jwk.n, &jwk.e) {
        (Some(n), Some(e)) => DecodingKey::from_rsa_components(n, e)
            .map_err(|e| AuthError::InvalidToken(format!("unusable platform JWK: {}", e))),
        _ => Err(AuthError::InvalidToken(
            "platform JWK is missing its modulus or exponent".to_string(),
        )),
    }
}

struct CachedJwks {
    fetched_at: DateTime<Utc>,
    /// Last refetch caused by an unknown `kid`.
    refetched_at: Option<DateTime<Utc>>,
    keys: JwkSet,
}

/// Resolves platform verification keys.
pub struct KeyResolver {
    client: reqwest::Client,
    pem_keys: HashMap<String, DecodingKey>,
    cache: RwLock<HashMap<String, CachedJwks>>,
    ttl: Duration,
    clock: SharedClock,
}

impl std::fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("pem_platforms", &self.pem_keys.keys().collect::<Vec<_>>())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl KeyResolver {
    /// Create a resolver for `platforms`, parsing every registered PEM.
    ///
    /// # Errors
    ///
    /// `ConfigError` if a registered PEM is not an RSA public key.
    pub fn new<'a>(
        platforms: impl IntoIterator<Item = &'a PlatformConfig>,
        cache_ttl_secs: u64,
    ) -> AuthResult<Self> {
        let mut pem_keys = HashMap::new();
        for platform in platforms {
            if let PlatformKey::Pem(pem) = &platform.key {
                let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                    AuthError::ConfigError(format!(
                        "invalid public key for platform {}: {}",
                        platform.issuer, e
                    ))
                })?;
                pem_keys.insert(platform.issuer.clone(), key);
            }
        }

        let ttl_secs = i64::try_from(cache_ttl_secs)
            .unwrap_or(i64::MAX)
            .min(MAX_CACHE_TTL_SECS);

        Ok(Self {
            client: http::client(http::default_timeout())?,
            pem_keys,
            cache: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
            clock: system_clock(),
        })
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Set the clock used for cache expiry.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Key that verifies tokens from `platform` signed with `kid`.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if no registered or published key matches, and
    /// `ProviderError` if the JWKS endpoint cannot be read.
    pub async fn decoding_key(&self, platform: &PlatformConfig, kid: Option<&str>) -> AuthResult<DecodingKey> {
        match &platform.key {
            PlatformKey::Pem(_) => self
                .pem_keys
                .get(&platform.issuer)
                .cloned()
                .ok_or_else(|| AuthError::KeyNotFound(platform.issuer.clone())),
            PlatformKey::JwksUrl(url) => self.jwks_key(url, kid).await,
        }
    }

    async fn jwks_key(&self, url: &str, kid: Option<&str>) -> AuthResult<DecodingKey> {
        let now = self.clock.now();
        if let Some(answer) = self.from_cache(self.cache.read().await.get(url), url, kid, now) {
            return answer;
        }

        // Concurrent misses queue here; only the first one fetches.
        let mut cache = self.cache.write().await;
        let previous = cache.get(url);
        if let Some(answer) = self.from_cache(previous, url, kid, now) {
            return answer;
        }
        let refetched_at = match previous {
            Some(cached) if now - cached.fetched_at < self.ttl => {
                info!(kid = ?kid, jwks_url = %url, "kid not in cached JWKS, refetching");
                Some(now)
            }
            _ => None,
        };

        let fresh = self.fetch(url).await?;
        let selected = fresh.select(kid).cloned();
        cache.insert(
            url.to_string(),
            CachedJwks {
                fetched_at: now,
                refetched_at,
                keys: fresh,
            },
        );

        match selected {
            Some(jwk) => decoding_key_from_jwk(&jwk),
            None => Err(AuthError::KeyNotFound(kid.unwrap_or("(no kid)").to_string())),
        }
    }

    /// Answer from a live cache entry, or `None` when a fetch is due.
    fn from_cache(
        &self,
        cached: Option<&CachedJwks>,
        url: &str,
        kid: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<AuthResult<DecodingKey>> {
        let cached = cached.filter(|c| now - c.fetched_at < self.ttl)?;
        if let Some(jwk) = cached.keys.select(kid) {
            return Some(decoding_key_from_jwk(jwk));
        }

        let cooling = cached
            .refetched_at
            .is_some_and(|at| now - at < Duration::seconds(REFETCH_COOLDOWN_SECS));
        if cooling {
            debug!(kid = ?kid, jwks_url = %url, "kid unknown and JWKS refetched recently");
            return Some(Err(AuthError::KeyNotFound(kid.unwrap_or("(no kid)").to_string())));
        }
        None
    }

    async fn fetch(&self, url: &str) -> AuthResult<JwkSet> {
        debug!(jwks_url = %url, "Fetching platform JWKS");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::ProviderError(format!("JWKS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuthError::ProviderError(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::ProviderError(format!("invalid JWKS document: {}", e)))
    }
}

/// Signs tool-originated JWTs and publishes the matching JWKS.
#[derive(Clone)]
pub struct ToolSigner {
    kid: String,
    encoding_key: EncodingKey,
    jwk: Jwk,
}

impl std::fmt::Debug for ToolSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSigner").field("kid", &self.kid).finish()
    }
}

impl ToolSigner {
    /// Load the tool key (PKCS#8 or PKCS#1 PEM).
    pub fn from_key(key: &ToolKey) -> AuthResult<Self> {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        use rsa::pkcs8::DecodePrivateKey;
        use rsa::traits::PublicKeyParts;
        use rsa::RsaPrivateKey;

        let pem = key.private_key_pem.as_str();
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| AuthError::ConfigError(format!("invalid LTI tool key: {}", e)))?;
        let public = private.to_public_key();

        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::ConfigError(format!("invalid LTI tool key: {}", e)))?;

        let jwk = Jwk {
            kty: "RSA".to_string(),
            kid: Some(key.kid.clone()),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: Some(URL_SAFE_NO_PAD.encode(public.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(public.e().to_bytes_be())),
        };

        Ok(Self {
            kid: key.kid.clone(),
            encoding_key,
            jwk,
        })
    }

    /// Key ID.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public key set for the tool JWKS endpoint.
    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.jwk.clone()],
        }
    }

    /// Sign `claims` with RS256, tagging the header with the key ID.
    pub fn sign<T: Serialize>(&self, claims: &T) -> AuthResult<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("failed to sign tool JWT: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::ManualClock;
    use jsonwebtoken::{decode, Validation};
    use std::sync::Arc;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PLATFORM_KEY: &str = include_str!("../../tests/fixtures/platform_key.pem");
    const PLATFORM_PUBLIC: &str = include_str!("../../tests/fixtures/platform_public.pem");
    const PLATFORM_N: &str = "syLQNteOXyFtNaBNDZasXZ3euyFCVlUjv5iX5cHynVBeMpTaXoa5wp645N6m526S5N-zKupaYRkFQrXVxn87NwFpVvQS9yqh5Kx-Brqq9uHTRZ_4lr8hPixVZ7dZ9t0rIZJGQh1vQ_rSxLs9MqDse9xQFvBQzy--VYpCd439vGHX83nIiwjW91Si8dVITkD457UHtO7lWGEbeAlcrk214I4DfEEZCnRxZjqesSDDab_JjV9ZMafQLyz_HXNO48J8o1zcWRBTv5z-GAtAjfdtcrsIkW-l8Mcsmw4ayagK3NCb4IXSK-bRwWgM8znlrak7s3EEugM-tY1ZvD7Qk_yNTw";

    fn platform(key: PlatformKey) -> PlatformConfig {
        PlatformConfig::new(
            "https://lms.example.edu",
            "tool-client",
            "https://lms.example.edu/authorize",
            key,
        )
    }

    fn signer() -> ToolSigner {
        ToolSigner::from_key(&ToolKey {
            kid: "k1".to_string(),
            private_key_pem: PLATFORM_KEY.to_string(),
        })
        .unwrap()
    }

    fn token() -> String {
        let exp = Utc::now().timestamp() + 300;
        signer().sign(&json!({ "sub": "u1", "exp": exp })).unwrap()
    }

    fn verify(token: &str, key: &DecodingKey) -> bool {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        decode::<Value>(token, key, &validation).is_ok()
    }

    #[test]
    fn test_tool_jwks_from_private_key() {
        let jwks = signer().jwks();
        let jwk = &jwks.keys[0];

        assert_eq!(jwk.kid.as_deref(), Some("k1"));
        assert_eq!(jwk.n.as_deref(), Some(PLATFORM_N));
        assert_eq!(jwk.e.as_deref(), Some("AQAB"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));

        let serialized = serde_json::to_value(&jwks).unwrap();
        assert_eq!(serialized["keys"][0]["use"], "sig");
    }

    #[test]
    fn test_bad_tool_key() {
        let result = ToolSigner::from_key(&ToolKey {
            kid: "k1".to_string(),
            private_key_pem: "nope".to_string(),
        });
        assert!(matches!(result, Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn test_select_without_kid() {
        let single = signer().jwks();
        assert!(single.select(None).is_some());

        let mut double = single.clone();
        let mut other = double.keys[0].clone();
        other.kid = Some("k2".to_string());
        double.keys.push(other);
        assert!(double.select(None).is_none());
        assert!(double.select(Some("k2")).is_some());
    }

    #[tokio::test]
    async fn test_pem_key_verifies() {
        let platform = platform(PlatformKey::Pem(PLATFORM_PUBLIC.to_string()));
        let resolver = KeyResolver::new([&platform], 60).unwrap();

        let key = resolver.decoding_key(&platform, Some("ignored")).await.unwrap();
        assert!(verify(&token(), &key));
    }

    #[test]
    fn test_bad_pem_rejected_at_startup() {
        let platform = platform(PlatformKey::Pem("garbage".to_string()));
        assert!(matches!(
            KeyResolver::new([&platform], 60),
            Err(AuthError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_jwks_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(signer().jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let platform = platform(PlatformKey::JwksUrl(format!("{}/jwks", server.uri())));
        let resolver = KeyResolver::new([&platform], 60).unwrap();

        let key = resolver.decoding_key(&platform, Some("k1")).await.unwrap();
        assert!(verify(&token(), &key));
        assert!(resolver.decoding_key(&platform, Some("k1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(signer().jwks()))
            .expect(2)
            .mount(&server)
            .await;

        let platform = platform(PlatformKey::JwksUrl(format!("{}/jwks", server.uri())));
        let resolver = KeyResolver::new([&platform], 60).unwrap();

        resolver.decoding_key(&platform, Some("k1")).await.unwrap();
        let err = resolver.decoding_key(&platform, Some("rotated")).await.err().unwrap();
        assert!(matches!(err, AuthError::KeyNotFound(ref kid) if kid == "rotated"));

        for kid in ["rotated-2", "rotated-3"] {
            let err = resolver.decoding_key(&platform, Some(kid)).await.err().unwrap();
            assert!(matches!(err, AuthError::KeyNotFound(ref k) if k == kid));
        }
        assert!(resolver.decoding_key(&platform, Some("k1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_after_cooldown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(signer().jwks()))
            .expect(3)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let platform = platform(PlatformKey::JwksUrl(format!("{}/jwks", server.uri())));
        let resolver = KeyResolver::new([&platform], 3600).unwrap().with_clock(clock.clone());

        resolver.decoding_key(&platform, Some("k1")).await.unwrap();
        assert!(resolver.decoding_key(&platform, Some("rotated")).await.is_err());

        clock.advance(Duration::seconds(REFETCH_COOLDOWN_SECS - 1));
        assert!(resolver.decoding_key(&platform, Some("rotated")).await.is_err());

        clock.advance(Duration::seconds(1));
        assert!(resolver.decoding_key(&platform, Some("rotated")).await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_jwks_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(signer().jwks())
                    .set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let platform = platform(PlatformKey::JwksUrl(format!("{}/jwks", server.uri())));
        let resolver = KeyResolver::new([&platform], 60)
            .unwrap()
            .with_client(http::client(std::time::Duration::from_millis(200)).unwrap());

        assert!(matches!(
            resolver.decoding_key(&platform, Some("k1")).await,
            Err(AuthError::ProviderError(_))
        ));
    }

    #[tokio::test]
    async fn test_jwks_endpoint_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let platform = platform(PlatformKey::JwksUrl(format!("{}/jwks", server.uri())));
        let resolver = KeyResolver::new([&platform], 60).unwrap();

        assert!(matches!(
            resolver.decoding_key(&platform, Some("k1")).await,
            Err(AuthError::ProviderError(_))
        ));
    }
}
