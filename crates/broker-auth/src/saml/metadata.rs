//! Service provider metadata

use crate::saml::config::SamlConfig;
use crate::saml::xml_escape;

const NAME_ID_FORMATS: &[&str] = &[
    "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent",
    "urn:oasis:names:tc:SAML:2.0:nameid-format:transient",
    "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress",
];

/// Strip PEM armor and line breaks, leaving the base64 body.
pub fn strip_pem_headers(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.starts_with("-----BEGIN") && !line.starts_with("-----END"))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("")
}

fn key_descriptor(usage: &str, certificate: &str) -> String {
    format!(
        r#"
    <md:KeyDescriptor use="{}">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>"#,
        usage, certificate
    )
}

/// Render the SP `EntityDescriptor` for IdP registration.
///
/// Includes the signing certificate when one is configured, the NameID
/// formats the SP accepts (the configured one first) and the ACS endpoint
/// with the HTTP-POST binding.
pub fn sp_metadata(config: &SamlConfig) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:SPSSODescriptor AuthnRequestsSigned="{}" WantAssertionsSigned="{}" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">"#,
        xml_escape(&config.sp_entity_id),
        config.sign_requests,
        config.want_assertions_signed
    );

    if let Some(certificate) = &config.sp_certificate {
        let body = strip_pem_headers(certificate);
        xml.push_str(&key_descriptor("signing", &body));
        xml.push_str(&key_descriptor("encryption", &body));
    }

    let mut formats: Vec<&str> = Vec::new();
    if let Some(configured) = config.name_id_format.as_deref() {
        formats.push(configured);
    }
    formats.extend(NAME_ID_FORMATS.iter().filter(|f| Some(**f) != config.name_id_format.as_deref()));
    for format in formats {
        xml.push_str(&format!(
            r#"
    <md:NameIDFormat>{}</md:NameIDFormat>"#,
            xml_escape(format)
        ));
    }

    xml.push_str(&format!(
        r#"
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        xml_escape(&config.acs_url)
    ));

    xml
}
