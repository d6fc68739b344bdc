//! XML signature verification
//!
//! Verification sits behind [`SignatureVerifier`] so the response
//! validator does not depend on libxmlsec1. A verifier does not just say
//! yes or no: it returns the assertion as read from the signed parts of
//! the document, with every element no signature covers removed first.
//! An assertion smuggled in next to a legitimately signed one never makes
//! it out.
//!
//! Builds with the `xmlsec` feature get [`XmlSecVerifier`], which hands
//! the document to samael's service provider with the IdP certificate
//! registered as its signing key.

use broker_core::AuthResult;
use samael::schema::Assertion;

#[cfg(feature = "xmlsec")]
use crate::saml::config::SamlConfig;
#[cfg(feature = "xmlsec")]
use crate::saml::metadata::strip_pem_headers;
#[cfg(feature = "xmlsec")]
use crate::saml::xml_escape;
#[cfg(feature = "xmlsec")]
use broker_core::AuthError;
#[cfg(feature = "xmlsec")]
use samael::metadata::EntityDescriptor;
#[cfg(feature = "xmlsec")]
use samael::service_provider::{Error as SpError, ServiceProvider, ServiceProviderBuilder};

/// Verifies the XML signatures on a SAML response document.
pub trait SignatureVerifier: Send + Sync {
    /// Verify every signature in `response_xml` and return the assertion
    /// found in the signed portion of the document.
    ///
    /// Returns `InvalidSignature` when a signature is missing, malformed or
    /// made with a key other than the trusted IdP key, and when no signed
    /// assertion remains.
    fn verified_assertion(&self, response_xml: &str) -> AuthResult<Assertion>;
}

/// Upper bound on the age of a response, measured from `IssueInstant`.
#[cfg(feature = "xmlsec")]
const MAX_ISSUE_DELAY_SECS: i64 = 600;

/// libxmlsec1-backed verifier bound to one IdP.
#[cfg(feature = "xmlsec")]
#[derive(Clone)]
pub struct XmlSecVerifier {
    provider: ServiceProvider,
}

#[cfg(feature = "xmlsec")]
impl std::fmt::Debug for XmlSecVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlSecVerifier")
            .field("idp", &self.provider.idp_metadata.entity_id)
            .finish()
    }
}

#[cfg(feature = "xmlsec")]
impl XmlSecVerifier {
    /// Trust the IdP certificate in `pem` for the IdP and SP named in `config`.
    ///
    /// # Errors
    ///
    /// `ConfigError` if the certificate does not parse or `config` does not
    /// pin the IdP entity ID.
    pub fn new(config: &SamlConfig, pem: &str) -> AuthResult<Self> {
        openssl::x509::X509::from_pem(pem.as_bytes())
            .map_err(|e| AuthError::ConfigError(format!("invalid IdP certificate: {}", e)))?;

        let idp_entity_id = config.idp_entity_id.as_deref().ok_or_else(|| {
            AuthError::ConfigError("verifying SAML signatures requires idp_entity_id".to_string())
        })?;

        let idp_metadata: EntityDescriptor = format!(
            r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>
        <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
            xml_escape(idp_entity_id),
            strip_pem_headers(pem),
            xml_escape(&config.idp_sso_url),
        )
        .parse()
        .map_err(|e| AuthError::ConfigError(format!("invalid IdP metadata: {}", e)))?;

        // InResponseTo and replay are checked by the adapter.
        let provider = ServiceProviderBuilder::default()
            .entity_id(config.sp_entity_id.clone())
            .acs_url(config.acs_url.clone())
            .idp_metadata(idp_metadata)
            .allow_idp_initiated(true)
            .max_clock_skew(config.clock_skew())
            .max_issue_delay(chrono::Duration::seconds(MAX_ISSUE_DELAY_SECS) + config.clock_skew())
            .build()
            .map_err(|e| AuthError::ConfigError(format!("failed to build SAML verifier: {}", e)))?;

        Ok(Self { provider })
    }
}

#[cfg(feature = "xmlsec")]
impl SignatureVerifier for XmlSecVerifier {
    fn verified_assertion(&self, response_xml: &str) -> AuthResult<Assertion> {
        self.provider
            .parse_xml_response(response_xml, None)
            .map_err(|e| match e {
                SpError::FailedToValidateSignature | SpError::FailedToParseSamlResponse => {
                    AuthError::InvalidSignature(e.to_string())
                }
                SpError::AssertionIssuerMismatch { .. } | SpError::ResponseIssuerMismatch { .. } => {
                    AuthError::UnknownIssuer(e.to_string())
                }
                SpError::AssertionExpired { .. }
                | SpError::AssertionConditionExpired { .. }
                | SpError::ResponseExpired { .. } => AuthError::AssertionExpired,
                SpError::AssertionConditionExpiredBefore { .. } => AuthError::AssertionNotYetValid,
                SpError::AssertionConditionAudienceRestrictionFailed { .. } => {
                    AuthError::AudienceMismatch(e.to_string())
                }
                SpError::UnexpectedError => {
                    AuthError::InvalidSignature("no signed assertion in response".to_string())
                }
                other => AuthError::SamlError(other.to_string()),
            })
    }
}

#[cfg(all(test, feature = "xmlsec"))]
mod tests {
    use super::*;
    use crate::saml::assertion::fixture::{ResponseFixture, IDP, SP};

    const CERT: &str = include_str!("../../tests/fixtures/idp_cert.pem");

    fn config() -> SamlConfig {
        SamlConfig::new(SP, "https://sp.example.edu/auth/saml/acs", "https://idp.example.edu/sso")
            .with_idp_entity_id(IDP)
    }

    #[test]
    fn test_new() {
        assert!(XmlSecVerifier::new(&config(), CERT).is_ok());
        assert!(matches!(
            XmlSecVerifier::new(&config(), "garbage"),
            Err(AuthError::ConfigError(_))
        ));
    }

    #[test]
    fn test_requires_pinned_idp() {
        let mut config = config();
        config.idp_entity_id = None;
        assert!(matches!(
            XmlSecVerifier::new(&config, CERT),
            Err(AuthError::ConfigError(_))
        ));
    }

    #[test]
    fn test_unsigned_document_rejected() {
        let verifier = XmlSecVerifier::new(&config(), CERT).unwrap();
        let xml = ResponseFixture::success(chrono::Utc::now()).xml();
        assert!(verifier.verified_assertion(&xml).is_err());
    }

    #[test]
    fn test_forged_signature_element_rejected() {
        let verifier = XmlSecVerifier::new(&config(), CERT).unwrap();
        let mut fixture = ResponseFixture::success(chrono::Utc::now());
        fixture.assertion_id = "_evil".to_string();
        fixture.assertion_signature = Some(
            r##"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/><ds:Reference URI="#_evil"><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue>AAAA</ds:DigestValue></ds:Reference></ds:SignedInfo><ds:SignatureValue>AAAA</ds:SignatureValue></ds:Signature>"##
                .to_string(),
        );
        assert!(verifier.verified_assertion(&fixture.xml()).is_err());
    }
}
