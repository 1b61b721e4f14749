//! VTube Studio public API wire format.
//!
//! Every message is a JSON envelope:
//! ```json
//! {"apiName":"VTubeStudioPublicAPI","apiVersion":"1.0","requestID":"...",
//!  "messageType":"AuthenticationRequest","data":{...}}
//! ```

use super::error::AvatarLinkError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_NAME: &str = "VTubeStudioPublicAPI";
pub const API_VERSION: &str = "1.0";

/// `errorID` sent while a token request is already waiting for the user.
pub const ERROR_AUTH_PENDING: i64 = 51;

pub const AUTH_TOKEN_REQUEST: &str = "AuthenticationTokenRequest";
pub const AUTH_TOKEN_RESPONSE: &str = "AuthenticationTokenResponse";
pub const AUTH_REQUEST: &str = "AuthenticationRequest";
pub const AUTH_RESPONSE: &str = "AuthenticationResponse";
pub const API_ERROR: &str = "APIError";
pub const HOTKEY_TRIGGER_REQUEST: &str = "HotkeyTriggerRequest";

// ── Outbound ────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    #[serde(rename = "apiName")]
    api_name: &'static str,
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    #[serde(rename = "requestID")]
    request_id: String,
    #[serde(rename = "messageType")]
    message_type: &'static str,
    data: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequestData<'a> {
    plugin_name: &'a str,
    plugin_developer: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequestData<'a> {
    plugin_name: &'a str,
    plugin_developer: &'a str,
    authentication_token: &'a str,
}

#[derive(Debug, Serialize)]
struct HotkeyTriggerData<'a> {
    #[serde(rename = "hotkeyID")]
    hotkey_id: &'a str,
}

/// Identity presented to VTube Studio in the approval popup.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: String,
    pub developer: String,
}

fn envelope<T: Serialize>(message_type: &'static str, data: T) -> Value {
    let envelope = Envelope {
        api_name: API_NAME,
        api_version: API_VERSION,
        request_id: uuid::Uuid::new_v4().simple().to_string(),
        message_type,
        data,
    };
    // Serializing plain string fields cannot fail.
    serde_json::to_value(envelope).unwrap_or(Value::Null)
}

pub fn token_request(plugin: &PluginInfo) -> Value {
    envelope(
        AUTH_TOKEN_REQUEST,
        TokenRequestData {
            plugin_name: &plugin.name,
            plugin_developer: &plugin.developer,
        },
    )
}

pub fn auth_request(plugin: &PluginInfo, token: &str) -> Value {
    envelope(
        AUTH_REQUEST,
        AuthRequestData {
            plugin_name: &plugin.name,
            plugin_developer: &plugin.developer,
            authentication_token: token,
        },
    )
}

pub fn hotkey_trigger(hotkey_id: &str) -> Value {
    envelope(HOTKEY_TRIGGER_REQUEST, HotkeyTriggerData { hotkey_id })
}

/// `messageType` of an envelope, if present.
pub fn message_type(message: &Value) -> Option<&str> {
    message.get("messageType").and_then(Value::as_str)
}

// ── Inbound ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponseData {
    #[serde(default)]
    authentication_token: Option<String>,
    #[serde(default)]
    authentication_token_approved: bool,
}

#[derive(Debug, Deserialize)]
struct AuthResponseData {
    authenticated: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorData {
    #[serde(rename = "errorID")]
    error_id: i64,
    #[serde(default)]
    message: String,
}

/// A parsed inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    TokenResponse {
        token: Option<String>,
        approved: bool,
    },
    AuthResponse {
        authenticated: bool,
        reason: Option<String>,
    },
    ApiError {
        error_id: i64,
        message: String,
    },
    /// Well-formed envelope of a type the handshake does not care about.
    Other { message_type: String },
}

impl InboundMessage {
    /// Parse an envelope. Anything that is not an object with a string
    /// `messageType`, or a known type whose `data` does not match, is a
    /// protocol error.
    pub fn parse(message: &Value) -> Result<Self, AvatarLinkError> {
        let message_type = message_type(message).ok_or_else(|| {
            AvatarLinkError::Protocol("message has no messageType".to_string())
        })?;

        match message_type {
            AUTH_TOKEN_RESPONSE => {
                let data: TokenResponseData = parse_data(message, message_type)?;
                Ok(Self::TokenResponse {
                    token: data.authentication_token.filter(|t| !t.is_empty()),
                    approved: data.authentication_token_approved,
                })
            }
            AUTH_RESPONSE => {
                let data: AuthResponseData = parse_data(message, message_type)?;
                Ok(Self::AuthResponse {
                    authenticated: data.authenticated,
                    reason: data.reason,
                })
            }
            API_ERROR => {
                let data: ApiErrorData = parse_data(message, message_type)?;
                Ok(Self::ApiError {
                    error_id: data.error_id,
                    message: data.message,
                })
            }
            other => Ok(Self::Other {
                message_type: other.to_string(),
            }),
        }
    }

    pub fn is_auth_pending(&self) -> bool {
        matches!(self, Self::ApiError { error_id, .. } if *error_id == ERROR_AUTH_PENDING)
    }
}

fn parse_data<T: DeserializeOwned>(message: &Value, message_type: &str) -> Result<T, AvatarLinkError> {
    let data = message
        .get("data")
        .cloned()
        .ok_or_else(|| AvatarLinkError::Protocol(format!("{} has no data", message_type)))?;
    serde_json::from_value(data)
        .map_err(|e| AvatarLinkError::Protocol(format!("malformed {}: {}", message_type, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plugin() -> PluginInfo {
        PluginInfo {
            name: "LLMChat".to_string(),
            developer: "llmchat".to_string(),
        }
    }

    #[test]
    fn token_request_carries_plugin_identity() {
        let msg = token_request(&plugin());
        assert_eq!(msg["apiName"], API_NAME);
        assert_eq!(msg["apiVersion"], API_VERSION);
        assert_eq!(msg["messageType"], AUTH_TOKEN_REQUEST);
        assert_eq!(msg["data"]["pluginName"], "LLMChat");
        assert_eq!(msg["data"]["pluginDeveloper"], "llmchat");
        assert!(msg["data"].get("authenticationToken").is_none());
    }

    #[test]
    fn auth_request_carries_token() {
        let msg = auth_request(&plugin(), "secret");
        assert_eq!(msg["messageType"], AUTH_REQUEST);
        assert_eq!(msg["data"]["authenticationToken"], "secret");
    }

    #[test]
    fn request_ids_are_unique() {
        let a = hotkey_trigger("wave");
        let b = hotkey_trigger("wave");
        assert_eq!(a["data"]["hotkeyID"], "wave");
        assert_ne!(a["requestID"], b["requestID"]);
    }

    #[test]
    fn parses_token_response_without_approval_flag() {
        let msg = json!({
            "messageType": AUTH_TOKEN_RESPONSE,
            "data": { "authenticationToken": "abc" }
        });
        assert_eq!(
            InboundMessage::parse(&msg).unwrap(),
            InboundMessage::TokenResponse {
                token: Some("abc".to_string()),
                approved: false
            }
        );
    }

    #[test]
    fn pending_error_is_recognized() {
        let msg = json!({
            "messageType": API_ERROR,
            "data": { "errorID": 51, "message": "already pending" }
        });
        assert!(InboundMessage::parse(&msg).unwrap().is_auth_pending());

        let other = json!({ "messageType": API_ERROR, "data": { "errorID": 8 } });
        assert!(!InboundMessage::parse(&other).unwrap().is_auth_pending());
    }

    #[test]
    fn unknown_type_is_other_not_error() {
        let msg = json!({ "messageType": "HotkeyTriggerResponse", "data": {} });
        assert!(matches!(
            InboundMessage::parse(&msg),
            Ok(InboundMessage::Other { .. })
        ));
    }

    #[test]
    fn malformed_envelopes_are_protocol_errors() {
        for msg in [
            json!("just a string"),
            json!({ "data": {} }),
            json!({ "messageType": AUTH_RESPONSE }),
            json!({ "messageType": AUTH_RESPONSE, "data": { "authenticated": "yes" } }),
            json!({ "messageType": API_ERROR, "data": { "message": "no id" } }),
        ] {
            assert!(
                matches!(InboundMessage::parse(&msg), Err(AvatarLinkError::Protocol(_))),
                "expected protocol error for {}",
                msg
            );
        }
    }
}
