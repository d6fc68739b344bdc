//! SAML Response validation
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. the document parses as a `<samlp:Response>`
//! 2. the top-level status is exactly `Success`
//! 3. an assertion is present
//! 4. the signature verifies (or signatures are not required)
//! 5. the issuer is the configured IdP
//! 6. `NotBefore` / `NotOnOrAfter` hold, within the clock skew
//! 7. the SP entity ID is among the audiences
//! 8. the subject carries a NameID
//!
//! Once a verifier has run, steps 5 to 8 and the attributes read only the
//! assertion it returned, never the assertion parsed from the raw document.

use crate::saml::attributes::SamlAttribute;
use crate::saml::signature::SignatureVerifier;
use base64::{engine::general_purpose::STANDARD, Engine};
use broker_core::{AuthError, AuthResult};
use chrono::{DateTime, Duration, Utc};
use samael::schema::{Assertion, Response};

/// Status URI of a successful response.
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Inputs to [`validate_response`].
pub struct ValidationContext<'a> {
    /// Expected audience
    pub sp_entity_id: &'a str,
    /// Trusted issuer, if pinned
    pub idp_entity_id: Option<&'a str>,
    /// Reject responses without a verified signature
    pub require_signature: bool,
    /// Signature verifier, if one is configured
    pub verifier: Option<&'a dyn SignatureVerifier>,
    /// Tolerance on validity bounds
    pub clock_skew: Duration,
    /// Current time
    pub now: DateTime<Utc>,
}

/// Facts taken from a response that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedAssertion {
    /// Assertion `ID`
    pub assertion_id: String,
    /// Request this response answers, if it names one
    pub in_response_to: Option<String>,
    /// End of the assertion's validity window
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// Assertion issuer
    pub issuer: Option<String>,
    /// Subject NameID
    pub name_id: String,
    /// NameID `Format`
    pub name_id_format: Option<String>,
    /// `SessionIndex` of the first AuthnStatement
    pub session_index: Option<String>,
    /// Every attribute, in document order
    pub attributes: Vec<SamlAttribute>,
}

/// Decode the base64 `SAMLResponse` form field.
///
/// Line breaks inserted by some IdPs are ignored.
pub fn decode_response(encoded: &str) -> AuthResult<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| AuthError::SamlError(format!("SAMLResponse is not base64: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|_| AuthError::SamlError("SAMLResponse is not UTF-8".to_string()))
}

/// Validate a decoded response document.
pub fn validate_response(xml: &str, ctx: &ValidationContext<'_>) -> AuthResult<ValidatedAssertion> {
    let response: Response = xml
        .parse()
        .map_err(|e| AuthError::SamlError(format!("unparseable SAML response: {}", e)))?;

    check_status(&response)?;

    let unverified = response
        .assertion
        .as_ref()
        .ok_or_else(|| AuthError::SamlError("response contains no assertion".to_string()))?;

    let carries_signature = response.signature.is_some() || unverified.signature.is_some();
    if ctx.require_signature && !carries_signature {
        return Err(AuthError::InvalidSignature("response is not signed".to_string()));
    }

    let verified;
    let assertion = match ctx.verifier {
        Some(verifier) if carries_signature => {
            verified = verifier.verified_assertion(xml)?;
            &verified
        }
        None if ctx.require_signature => {
            return Err(AuthError::InvalidSignature(
                "no verifier configured for signed responses".to_string(),
            ))
        }
        None if carries_signature => {
            tracing::warn!("Accepting signed SAML response without verifying it");
            unverified
        }
        _ => unverified,
    };

    let issuer = assertion.issuer.value.clone();
    if let Some(expected) = ctx.idp_entity_id {
        if issuer.as_deref() != Some(expected) {
            return Err(AuthError::UnknownIssuer(
                issuer.unwrap_or_else(|| "(none)".to_string()),
            ));
        }
    }

    check_conditions(assertion, ctx)?;

    let subject = assertion.subject.as_ref();
    let name_id = subject
        .and_then(|s| s.name_id.as_ref())
        .filter(|n| !n.value.trim().is_empty())
        .ok_or_else(|| AuthError::MissingClaim("NameID".to_string()))?;

    let in_response_to = subject
        .and_then(|s| s.subject_confirmations.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|c| c.subject_confirmation_data.as_ref())
        .find_map(|data| data.in_response_to.clone())
        .or_else(|| response.in_response_to.clone());

    let session_index = assertion
        .authn_statements
        .as_ref()
        .and_then(|statements| statements.first())
        .and_then(|statement| statement.session_index.clone());

    Ok(ValidatedAssertion {
        assertion_id: assertion.id.clone(),
        in_response_to,
        not_on_or_after: assertion.conditions.as_ref().and_then(|c| c.not_on_or_after),
        issuer,
        name_id: name_id.value.trim().to_string(),
        name_id_format: name_id.format.clone(),
        session_index,
        attributes: collect_attributes(assertion),
    })
}

fn check_status(response: &Response) -> AuthResult<()> {
    let status = response.status.as_ref();
    let code = status.and_then(|s| s.status_code.value.as_deref());

    if code == Some(STATUS_SUCCESS) {
        return Ok(());
    }

    Err(AuthError::SamlStatus {
        status: code.unwrap_or("(missing)").to_string(),
        message: status
            .and_then(|s| s.status_message.as_ref())
            .and_then(|m| m.value.clone())
            .unwrap_or_default(),
    })
}

fn check_conditions(assertion: &Assertion, ctx: &ValidationContext<'_>) -> AuthResult<()> {
    let Some(conditions) = assertion.conditions.as_ref() else {
        return Ok(());
    };

    if let Some(not_before) = conditions.not_before {
        if ctx.now < not_before - ctx.clock_skew {
            return Err(AuthError::AssertionNotYetValid);
        }
    }
    if let Some(not_on_or_after) = conditions.not_on_or_after {
        if ctx.now >= not_on_or_after + ctx.clock_skew {
            return Err(AuthError::AssertionExpired);
        }
    }

    if let Some(restrictions) = conditions.audience_restrictions.as_ref() {
        for restriction in restrictions {
            if !restriction.audience.iter().any(|a| a == ctx.sp_entity_id) {
                return Err(AuthError::AudienceMismatch(format!(
                    "assertion is not addressed to {}",
                    ctx.sp_entity_id
                )));
            }
        }
    }

    Ok(())
}

fn collect_attributes(assertion: &Assertion) -> Vec<SamlAttribute> {
    assertion
        .attribute_statements
        .iter()
        .flatten()
        .flat_map(|statement| statement.attributes.iter())
        .map(|attribute| SamlAttribute {
            name: attribute.name.clone(),
            friendly_name: attribute.friendly_name.clone(),
            values: attribute
                .values
                .iter()
                .filter_map(|v| v.value.as_ref())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect(),
        })
        .collect()
}
