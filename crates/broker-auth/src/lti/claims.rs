//! LTI 1.3 launch claims
//!
//! Claim names are the IMS URIs. Everything except identity fields and the
//! Deep Linking settings is copied verbatim as JSON, so platform extensions
//! inside those objects survive.

use broker_core::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `https://purl.imsglobal.org/spec/lti/claim/message_type`
pub const MESSAGE_TYPE: &str = "https://purl.imsglobal.org/spec/lti/claim/message_type";
/// `https://purl.imsglobal.org/spec/lti/claim/version`
pub const VERSION: &str = "https://purl.imsglobal.org/spec/lti/claim/version";
/// `https://purl.imsglobal.org/spec/lti/claim/deployment_id`
pub const DEPLOYMENT_ID: &str = "https://purl.imsglobal.org/spec/lti/claim/deployment_id";
/// `https://purl.imsglobal.org/spec/lti/claim/target_link_uri`
pub const TARGET_LINK_URI: &str = "https://purl.imsglobal.org/spec/lti/claim/target_link_uri";
/// `https://purl.imsglobal.org/spec/lti/claim/roles`
pub const ROLES: &str = "https://purl.imsglobal.org/spec/lti/claim/roles";
/// `https://purl.imsglobal.org/spec/lti/claim/context`
pub const CONTEXT: &str = "https://purl.imsglobal.org/spec/lti/claim/context";
/// `https://purl.imsglobal.org/spec/lti/claim/resource_link`
pub const RESOURCE_LINK: &str = "https://purl.imsglobal.org/spec/lti/claim/resource_link";
/// `https://purl.imsglobal.org/spec/lti/claim/tool_platform`
pub const TOOL_PLATFORM: &str = "https://purl.imsglobal.org/spec/lti/claim/tool_platform";
/// `https://purl.imsglobal.org/spec/lti/claim/launch_presentation`
pub const LAUNCH_PRESENTATION: &str = "https://purl.imsglobal.org/spec/lti/claim/launch_presentation";
/// `https://purl.imsglobal.org/spec/lti/claim/custom`
pub const CUSTOM: &str = "https://purl.imsglobal.org/spec/lti/claim/custom";
/// `https://purl.imsglobal.org/spec/lti/claim/lis`
pub const LIS: &str = "https://purl.imsglobal.org/spec/lti/claim/lis";
/// `https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings`
pub const DEEP_LINKING_SETTINGS: &str =
    "https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings";
/// `https://purl.imsglobal.org/spec/lti-dl/claim/content_items`
pub const CONTENT_ITEMS: &str = "https://purl.imsglobal.org/spec/lti-dl/claim/content_items";
/// `https://purl.imsglobal.org/spec/lti-dl/claim/data`
pub const DEEP_LINKING_DATA: &str = "https://purl.imsglobal.org/spec/lti-dl/claim/data";
/// `https://purl.imsglobal.org/spec/lti-dl/claim/msg`
pub const DEEP_LINKING_MSG: &str = "https://purl.imsglobal.org/spec/lti-dl/claim/msg";
/// `https://purl.imsglobal.org/spec/lti-ags/claim/endpoint`
pub const AGS_ENDPOINT: &str = "https://purl.imsglobal.org/spec/lti-ags/claim/endpoint";
/// `https://purl.imsglobal.org/spec/lti-nrps/claim/namesroleservice`
pub const NRPS: &str = "https://purl.imsglobal.org/spec/lti-nrps/claim/namesroleservice";

/// Resource link launch.
pub const RESOURCE_LINK_REQUEST: &str = "LtiResourceLinkRequest";
/// Deep Linking (content selection) launch.
pub const DEEP_LINKING_REQUEST: &str = "LtiDeepLinkingRequest";
/// Deep Linking reply from tool to platform.
pub const DEEP_LINKING_RESPONSE: &str = "LtiDeepLinkingResponse";

/// Deep Linking settings sent by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepLinkingSettings {
    /// Where the tool posts its Deep Linking response
    pub deep_link_return_url: String,
    /// Content item types the platform accepts
    #[serde(default)]
    pub accept_types: Vec<String>,
    /// Presentation targets the platform accepts
    #[serde(default)]
    pub accept_presentation_document_targets: Vec<String>,
    /// Whether several items may be returned
    #[serde(default)]
    pub accept_multiple: Option<bool>,
    /// Whether the platform creates items without confirmation
    #[serde(default)]
    pub auto_create: Option<bool>,
    /// Opaque value the tool must echo back
    #[serde(default)]
    pub data: Option<String>,
    /// Default title
    #[serde(default)]
    pub title: Option<String>,
    /// Default text
    #[serde(default)]
    pub text: Option<String>,
}

/// Verified launch, as the tool sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub issuer: String,
    pub subject: String,
    pub deployment_id: Option<String>,
    pub message_type: String,
    pub version: Option<String>,
    pub target_link_uri: Option<String>,

    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
    pub picture: Option<String>,

    /// Role URIs in the order the platform sent them
    pub roles: Vec<String>,
    pub context: Option<Value>,
    pub resource_link: Option<Value>,
    pub tool_platform: Option<Value>,
    pub launch_presentation: Option<Value>,
    pub lis: Option<Value>,
    pub custom: Map<String, Value>,

    pub deep_linking: Option<DeepLinkingSettings>,
    pub ags_endpoint: Option<Value>,
    pub names_and_roles: Option<Value>,
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Option<String> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn object_claim(claims: &Map<String, Value>, name: &str) -> Option<Value> {
    claims.get(name).filter(|v| v.is_object()).cloned()
}

impl LaunchRecord {
    /// Assemble a record from a verified claim set.
    ///
    /// # Errors
    ///
    /// `MissingClaim` when `iss` or `sub` is absent, and `InvalidToken` when
    /// Deep Linking settings are present but malformed.
    pub fn from_claims(claims: &Map<String, Value>) -> AuthResult<Self> {
        let issuer = string_claim(claims, "iss").ok_or_else(|| AuthError::MissingClaim("iss".to_string()))?;
        let subject = string_claim(claims, "sub").ok_or_else(|| AuthError::MissingClaim("sub".to_string()))?;

        let roles = claims
            .get(ROLES)
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let deep_linking = claims
            .get(DEEP_LINKING_SETTINGS)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| AuthError::InvalidToken(format!("malformed deep linking settings: {}", e)))?;

        Ok(Self {
            issuer,
            subject,
            deployment_id: string_claim(claims, DEPLOYMENT_ID),
            message_type: string_claim(claims, MESSAGE_TYPE)
                .unwrap_or_else(|| RESOURCE_LINK_REQUEST.to_string()),
            version: string_claim(claims, VERSION),
            target_link_uri: string_claim(claims, TARGET_LINK_URI),
            name: string_claim(claims, "name"),
            given_name: string_claim(claims, "given_name"),
            family_name: string_claim(claims, "family_name"),
            email: string_claim(claims, "email"),
            picture: string_claim(claims, "picture"),
            roles,
            context: object_claim(claims, CONTEXT),
            resource_link: object_claim(claims, RESOURCE_LINK),
            tool_platform: object_claim(claims, TOOL_PLATFORM),
            launch_presentation: object_claim(claims, LAUNCH_PRESENTATION),
            lis: object_claim(claims, LIS),
            custom: claims
                .get(CUSTOM)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            deep_linking,
            ags_endpoint: object_claim(claims, AGS_ENDPOINT),
            names_and_roles: object_claim(claims, NRPS),
        })
    }

    /// Whether any role URI contains `needle`.
    pub fn has_role(&self, needle: &str) -> bool {
        self.roles.iter().any(|role| role.contains(needle))
    }

    pub fn is_instructor(&self) -> bool {
        self.has_role("Instructor")
    }

    pub fn is_learner(&self) -> bool {
        self.has_role("Learner")
    }

    pub fn is_administrator(&self) -> bool {
        self.has_role("Administrator")
    }

    pub fn is_teaching_assistant(&self) -> bool {
        self.has_role("TeachingAssistant")
    }

    pub fn is_content_developer(&self) -> bool {
        self.has_role("ContentDeveloper")
    }

    pub fn is_mentor(&self) -> bool {
        self.has_role("Mentor")
    }

    /// Whether this is a Deep Linking launch.
    pub fn is_deep_linking(&self) -> bool {
        self.message_type == DEEP_LINKING_REQUEST
    }

    /// `context.id`
    pub fn context_id(&self) -> Option<&str> {
        nested_str(&self.context, "id")
    }

    /// `context.title`
    pub fn context_title(&self) -> Option<&str> {
        nested_str(&self.context, "title")
    }

    /// `resource_link.id`
    pub fn resource_link_id(&self) -> Option<&str> {
        nested_str(&self.resource_link, "id")
    }

    /// Display name: `name`, else given and family names.
    pub fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| match (&self.given_name, &self.family_name) {
            (Some(given), Some(family)) => Some(format!("{} {}", given, family)),
            (Some(given), None) => Some(given.clone()),
            (None, Some(family)) => Some(family.clone()),
            (None, None) => None,
        })
    }
}

fn nested_str<'a>(object: &'a Option<Value>, key: &str) -> Option<&'a str> {
    object.as_ref()?.get(key)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("claims must be an object"),
        }
    }

    fn launch_claims() -> Map<String, Value> {
        claims(json!({
            "iss": "https://canvas.example.edu",
            "sub": "a6d5c443-1f51-4783-ba1a-7686ffe3b54a",
            "aud": "10000000000001",
            "name": "Ada Lovelace",
            "email": "ada@example.edu",
            MESSAGE_TYPE: "LtiResourceLinkRequest",
            VERSION: "1.3.0",
            DEPLOYMENT_ID: "1:abc",
            ROLES: [
                "http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor",
                "http://purl.imsglobal.org/vocab/lis/v2/institution/person#Administrator"
            ],
            CONTEXT: { "id": "c-42", "label": "CS101", "title": "Intro to CS", "x-vendor": 1 },
            RESOURCE_LINK: { "id": "rl-7", "title": "Week 1" },
            CUSTOM: { "canvas_course_id": "42", "flag": true },
            AGS_ENDPOINT: { "lineitems": "https://canvas.example.edu/api/lti/courses/42/line_items" },
        }))
    }

    #[test]
    fn test_from_claims() {
        let launch = LaunchRecord::from_claims(&launch_claims()).unwrap();

        assert_eq!(launch.issuer, "https://canvas.example.edu");
        assert_eq!(launch.deployment_id.as_deref(), Some("1:abc"));
        assert_eq!(launch.version.as_deref(), Some("1.3.0"));
        assert_eq!(launch.roles.len(), 2);
        assert_eq!(launch.context_id(), Some("c-42"));
        assert_eq!(launch.context_title(), Some("Intro to CS"));
        assert_eq!(launch.resource_link_id(), Some("rl-7"));
        assert_eq!(launch.custom["flag"], json!(true));
        assert!(launch.ags_endpoint.is_some());
        assert!(launch.names_and_roles.is_none());
        assert!(!launch.is_deep_linking());
    }

    #[test]
    fn test_context_copied_verbatim() {
        let launch = LaunchRecord::from_claims(&launch_claims()).unwrap();
        assert_eq!(launch.context.unwrap()["x-vendor"], json!(1));
    }

    #[test]
    fn test_role_predicates_are_substring_tests() {
        let launch = LaunchRecord::from_claims(&launch_claims()).unwrap();

        assert!(launch.is_instructor());
        assert!(launch.is_administrator());
        assert!(!launch.is_learner());
        assert!(!launch.is_mentor());
        assert!(launch.has_role("membership#Instr"));
    }

    #[test]
    fn test_missing_subject() {
        let mut claims = launch_claims();
        claims.remove("sub");
        assert!(matches!(
            LaunchRecord::from_claims(&claims),
            Err(AuthError::MissingClaim(ref c)) if c == "sub"
        ));
    }

    #[test]
    fn test_deep_linking_settings() {
        let mut claims = launch_claims();
        claims.insert(MESSAGE_TYPE.to_string(), json!(DEEP_LINKING_REQUEST));
        claims.insert(
            DEEP_LINKING_SETTINGS.to_string(),
            json!({
                "deep_link_return_url": "https://canvas.example.edu/courses/42/deep_linking_response",
                "accept_types": ["ltiResourceLink"],
                "accept_presentation_document_targets": ["iframe", "window"],
                "data": "opaque-123"
            }),
        );

        let launch = LaunchRecord::from_claims(&claims).unwrap();
        assert!(launch.is_deep_linking());
        let settings = launch.deep_linking.unwrap();
        assert_eq!(settings.data.as_deref(), Some("opaque-123"));
        assert_eq!(settings.accept_types, vec!["ltiResourceLink"]);
    }

    #[test]
    fn test_malformed_deep_linking_settings() {
        let mut claims = launch_claims();
        claims.insert(DEEP_LINKING_SETTINGS.to_string(), json!({ "accept_types": "nope" }));
        assert!(matches!(
            LaunchRecord::from_claims(&claims),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_display_name_fallback() {
        let mut claims = launch_claims();
        claims.remove("name");
        claims.insert("given_name".to_string(), json!("Ada"));
        claims.insert("family_name".to_string(), json!("Lovelace"));

        let launch = LaunchRecord::from_claims(&claims).unwrap();
        assert_eq!(launch.display_name().as_deref(), Some("Ada Lovelace"));
    }
}
