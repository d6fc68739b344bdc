//! SAML 2.0 Web SSO service provider
//!
//! HTTP-Redirect binding out (AuthnRequest), HTTP-POST binding in
//! (Response). [`SamlAdapter`] runs the flow and [`router`] mounts it.

pub mod adapter;
pub mod assertion;
pub mod attributes;
pub mod config;
pub mod metadata;
pub mod request;
pub mod routes;
pub mod signature;

pub use adapter::{AcsForm, SamlAdapter};
pub use assertion::{validate_response, ValidatedAssertion, ValidationContext};
pub use attributes::{default_attribute_map, map_attributes, SamlAttribute};
pub use config::SamlConfig;
pub use metadata::sp_metadata;
pub use request::{request_id_for, AuthnRequest, RequestSigner};
pub use routes::router;
pub use signature::SignatureVerifier;
#[cfg(feature = "xmlsec")]
pub use signature::XmlSecVerifier;

/// Escape text for use in XML content and attribute values.
pub(crate) fn xml_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}
