//! Deep Linking responses
//!
//! After a `LtiDeepLinkingRequest` launch the tool lets the user pick
//! content, then posts a signed `LtiDeepLinkingResponse` JWT back to the
//! platform's return URL. The tool renders the auto-submitting form; this
//! module only produces the URL and the token.

use crate::lti::claims::{
    LaunchRecord, CONTENT_ITEMS, DEEP_LINKING_DATA, DEEP_LINKING_MSG, DEEP_LINKING_RESPONSE,
    DEPLOYMENT_ID, MESSAGE_TYPE, VERSION,
};
use crate::lti::keys::ToolSigner;
use broker_core::{random_token, AuthError, AuthResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifetime of a Deep Linking response token.
const RESPONSE_TTL_SECS: i64 = 300;

/// One content item returned to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    /// Link that launches back into this tool
    #[serde(rename = "ltiResourceLink")]
    LtiResourceLink {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        custom: Map<String, Value>,
    },
    /// Plain hyperlink
    #[serde(rename = "link")]
    Link {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// HTML fragment
    #[serde(rename = "html")]
    Html {
        html: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

impl ContentItem {
    fn type_name(&self) -> &'static str {
        match self {
            ContentItem::LtiResourceLink { .. } => "ltiResourceLink",
            ContentItem::Link { .. } => "link",
            ContentItem::Html { .. } => "html",
        }
    }
}

/// Signed response and where to post it.
#[derive(Debug, Clone)]
pub struct DeepLinkingReturn {
    /// Platform `deep_link_return_url`
    pub return_url: String,
    /// Value for the `JWT` form field
    pub jwt: String,
}

/// Build and sign the Deep Linking response for `launch`.
///
/// # Errors
///
/// - `MissingClaim` if `launch` carried no Deep Linking settings
/// - `InvalidToken` if an item type is not among the platform's accepted
///   types, or several items are returned where only one is accepted
pub fn deep_linking_response(
    signer: &ToolSigner,
    client_id: &str,
    launch: &LaunchRecord,
    items: &[ContentItem],
    message: Option<&str>,
    now: DateTime<Utc>,
) -> AuthResult<DeepLinkingReturn> {
    let settings = launch
        .deep_linking
        .as_ref()
        .ok_or_else(|| AuthError::MissingClaim("deep_linking_settings".to_string()))?;

    if !settings.accept_types.is_empty() {
        if let Some(item) = items
            .iter()
            .find(|item| !settings.accept_types.iter().any(|t| t == item.type_name()))
        {
            return Err(AuthError::InvalidToken(format!(
                "platform does not accept {} items",
                item.type_name()
            )));
        }
    }
    if settings.accept_multiple == Some(false) && items.len() > 1 {
        return Err(AuthError::InvalidToken(
            "platform accepts a single content item".to_string(),
        ));
    }

    let mut claims = Map::new();
    claims.insert("iss".to_string(), Value::String(client_id.to_string()));
    claims.insert("aud".to_string(), Value::String(launch.issuer.clone()));
    claims.insert("iat".to_string(), Value::from(now.timestamp()));
    claims.insert(
        "exp".to_string(),
        Value::from((now + Duration::seconds(RESPONSE_TTL_SECS)).timestamp()),
    );
    claims.insert("nonce".to_string(), Value::String(random_token()));
    claims.insert("jti".to_string(), Value::String(uuid::Uuid::now_v7().to_string()));
    claims.insert(MESSAGE_TYPE.to_string(), Value::String(DEEP_LINKING_RESPONSE.to_string()));
    claims.insert(VERSION.to_string(), Value::String("1.3.0".to_string()));
    if let Some(deployment_id) = &launch.deployment_id {
        claims.insert(DEPLOYMENT_ID.to_string(), Value::String(deployment_id.clone()));
    }
    claims.insert(
        CONTENT_ITEMS.to_string(),
        serde_json::to_value(items)
            .map_err(|e| AuthError::Internal(format!("failed to encode content items: {}", e)))?,
    );
    if let Some(data) = &settings.data {
        claims.insert(DEEP_LINKING_DATA.to_string(), Value::String(data.clone()));
    }
    if let Some(message) = message {
        claims.insert(DEEP_LINKING_MSG.to_string(), Value::String(message.to_string()));
    }

    Ok(DeepLinkingReturn {
        return_url: settings.deep_link_return_url.clone(),
        jwt: signer.sign(&claims)?,
    })
}
