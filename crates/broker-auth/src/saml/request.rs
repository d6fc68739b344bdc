//! AuthnRequest construction for the HTTP-Redirect binding

use crate::saml::config::SamlConfig;
use crate::saml::xml_escape;
use base64::{engine::general_purpose::STANDARD, Engine};
use broker_core::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use std::io::Write;
use url::Url;

const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";

/// An AuthnRequest ready to be encoded.
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    /// Request ID, echoed by the IdP as `InResponseTo`
    pub id: String,
    /// Serialized `<samlp:AuthnRequest>`
    pub xml: String,
}

/// AuthnRequest ID bound to `relay_state`.
///
/// The IdP echoes it as `InResponseTo`, which ties a response to the login
/// attempt whose relay state it carries.
pub fn request_id_for(relay_state: &str) -> String {
    format!("_{}", relay_state)
}

impl AuthnRequest {
    /// Build a request from `config` issued at `now`.
    pub fn new(config: &SamlConfig, now: DateTime<Utc>) -> Self {
        Self::with_id(config, format!("_{}", uuid::Uuid::now_v7().simple()), now)
    }

    /// Build a request with a caller-chosen `id`.
    pub fn with_id(config: &SamlConfig, id: String, now: DateTime<Utc>) -> Self {
        let name_id_policy = config
            .name_id_format
            .as_deref()
            .map(|format| {
                format!(
                    r#"
    <samlp:NameIDPolicy Format="{}" AllowCreate="true"/>"#,
                    xml_escape(format)
                )
            })
            .unwrap_or_default();

        let xml = format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{}" Version="2.0" IssueInstant="{}" Destination="{}" AssertionConsumerServiceURL="{}" ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST">
    <saml:Issuer>{}</saml:Issuer>{}
</samlp:AuthnRequest>"#,
            xml_escape(&id),
            now.format("%Y-%m-%dT%H:%M:%SZ"),
            xml_escape(&config.idp_sso_url),
            xml_escape(&config.acs_url),
            xml_escape(&config.sp_entity_id),
            name_id_policy
        );

        Self { id, xml }
    }

    /// Deflate and base64-encode the request for the `SAMLRequest` parameter.
    pub fn encode(&self) -> AuthResult<String> {
        let deflate_error =
            |e: std::io::Error| AuthError::Internal(format!("failed to deflate AuthnRequest: {}", e));

        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(self.xml.as_bytes()).map_err(deflate_error)?;
        let compressed = encoder.finish().map_err(deflate_error)?;
        Ok(STANDARD.encode(compressed))
    }
}

/// Signs HTTP-Redirect query strings with the SP private key.
pub struct RequestSigner {
    key: PKey<Private>,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("algorithm", &self.algorithm())
            .finish()
    }
}

impl RequestSigner {
    /// Load an RSA or EC private key from PEM.
    pub fn from_pem(pem: &str) -> AuthResult<Self> {
        let key = PKey::private_key_from_pem(pem.as_bytes())
            .map_err(|e| AuthError::ConfigError(format!("invalid SP private key: {}", e)))?;
        Ok(Self { key })
    }

    /// `SigAlg` URI matching the key type.
    pub fn algorithm(&self) -> &'static str {
        if self.key.ec_key().is_ok() {
            ECDSA_SHA256
        } else {
            RSA_SHA256
        }
    }

    /// Append `SigAlg` and `Signature` to `url`.
    ///
    /// The signature covers the query exactly as encoded, which is
    /// `SAMLRequest=..&RelayState=..&SigAlg=..` when the parameters were
    /// appended in that order.
    pub fn sign(&self, url: &mut Url) -> AuthResult<()> {
        url.query_pairs_mut().append_pair("SigAlg", self.algorithm());

        let query = url
            .query()
            .ok_or_else(|| AuthError::Internal("no query string to sign".to_string()))?;

        let signature = Signer::new(MessageDigest::sha256(), &self.key)
            .and_then(|mut signer| {
                signer.update(query.as_bytes())?;
                signer.sign_to_vec()
            })
            .map_err(|e| AuthError::Internal(format!("failed to sign AuthnRequest: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("Signature", &STANDARD.encode(signature));
        Ok(())
    }
}

/// Build the IdP redirect URL carrying `request`.
pub fn redirect_url(
    idp_sso_url: &str,
    request: &AuthnRequest,
    relay_state: Option<&str>,
    signer: Option<&RequestSigner>,
) -> AuthResult<String> {
    let mut url = Url::parse(idp_sso_url)
        .map_err(|e| AuthError::ConfigError(format!("invalid IdP SSO URL: {}", e)))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("SAMLRequest", &request.encode()?);
        if let Some(relay_state) = relay_state {
            query.append_pair("RelayState", relay_state);
        }
    }

    if let Some(signer) = signer {
        signer.sign(&mut url)?;
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::rsa::Rsa;
    use openssl::sign::Verifier;
    use std::collections::HashMap;
    use std::io::Read;

    fn config() -> SamlConfig {
        SamlConfig::new(
            "https://sp.example.edu/saml",
            "https://sp.example.edu/auth/saml/acs",
            "https://idp.example.edu/sso?tenant=a&b",
        )
        .with_name_id_format("urn:oasis:names:tc:SAML:2.0:nameid-format:persistent")
    }

    fn inflate(encoded: &str) -> String {
        let compressed = STANDARD.decode(encoded).unwrap();
        let mut xml = String::new();
        flate2::read::DeflateDecoder::new(&compressed[..])
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    #[test]
    fn test_request_xml() {
        let request = AuthnRequest::new(&config(), Utc::now());

        assert!(request.id.starts_with('_'));
        assert!(request.xml.contains(&format!(r#"ID="{}""#, request.id)));
        assert!(request.xml.contains("<saml:Issuer>https://sp.example.edu/saml</saml:Issuer>"));
        assert!(request.xml.contains(r#"AssertionConsumerServiceURL="https://sp.example.edu/auth/saml/acs""#));
        assert!(request.xml.contains(r#"Destination="https://idp.example.edu/sso?tenant=a&amp;b""#));
        assert!(request.xml.contains("nameid-format:persistent"));
    }

    #[test]
    fn test_request_bound_to_relay_state() {
        let request = AuthnRequest::with_id(&config(), request_id_for("rs-1"), Utc::now());
        assert_eq!(request.id, "_rs-1");
        assert!(request.xml.contains(r#"ID="_rs-1""#));
    }

    #[test]
    fn test_encode_inflates_back() {
        let request = AuthnRequest::new(&config(), Utc::now());
        assert_eq!(inflate(&request.encode().unwrap()), request.xml);
    }

    #[test]
    fn test_redirect_url_keeps_existing_query() {
        let request = AuthnRequest::new(&config(), Utc::now());
        let url = redirect_url("https://idp.example.edu/sso?tenant=a", &request, Some("rs-1"), None).unwrap();
        let params: HashMap<_, _> = Url::parse(&url).unwrap().query_pairs().into_owned().collect();

        assert_eq!(params["tenant"], "a");
        assert_eq!(params["RelayState"], "rs-1");
        assert_eq!(inflate(&params["SAMLRequest"]), request.xml);
        assert!(!params.contains_key("Signature"));
    }

    #[test]
    fn test_signed_redirect_verifies() {
        let rsa = Rsa::generate(2048).unwrap();
        let pem = String::from_utf8(rsa.private_key_to_pem().unwrap()).unwrap();
        let signer = RequestSigner::from_pem(&pem).unwrap();
        assert_eq!(signer.algorithm(), RSA_SHA256);

        let request = AuthnRequest::new(&config(), Utc::now());
        let url = Url::parse(
            &redirect_url("https://idp.example.edu/sso", &request, Some("rs-1"), Some(&signer)).unwrap(),
        )
        .unwrap();

        let query = url.query().unwrap();
        let (signed, signature) = query.split_once("&Signature=").unwrap();
        assert!(signed.starts_with("SAMLRequest="));
        assert!(signed.ends_with(&format!("SigAlg={}", urlencoding::encode(RSA_SHA256))));

        let signature = STANDARD
            .decode(urlencoding::decode(signature).unwrap().as_bytes())
            .unwrap();
        let public = PKey::from_rsa(Rsa::from_public_components(
            rsa.n().to_owned().unwrap(),
            rsa.e().to_owned().unwrap(),
        ).unwrap())
        .unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public).unwrap();
        verifier.update(signed.as_bytes()).unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn test_invalid_key_is_config_error() {
        assert!(matches!(
            RequestSigner::from_pem("not a key"),
            Err(AuthError::ConfigError(_))
        ));
    }
}
