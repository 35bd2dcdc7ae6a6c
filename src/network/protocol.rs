//! Protocol Messages
//!
//! Wire format for messages exchanged with the community service. The same
//! JSON envelopes travel over both transports: as the payload of a named
//! event on the persistent link, or as the body of an HTTP request.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// How long a role query waits for an acknowledgement.
pub const ROLE_QUERY_TIMEOUT: Duration = Duration::from_millis(5000);

// =============================================================================
// EVENT NAMES (persistent transport)
// =============================================================================

/// Persistent-link event names.
pub mod events {
    /// Inbound: handshake accepted.
    pub const AUTH_SUCCESS: &str = "auth-success";
    /// Outbound: chat relay.
    pub const CHAT: &str = "chat";
    /// Outbound: statistics channel update.
    pub const UPDATE_STATS_CHANNELS: &str = "update-stats-channels";
    /// Outbound: answer to a verification request.
    pub const VERIFY_RESPONSE: &str = "verify-response";
    /// Outbound: in-game verification of a user.
    pub const VERIFY_USER: &str = "verify-user";
    /// Outbound with acknowledgement: role query.
    pub const HAS_REQUIRED_ROLE: &str = "has-required-role";
    /// Outbound: intentional disconnect.
    pub const DISCONNECT_FORCE: &str = "disconnect-force";
}

// =============================================================================
// HTTP PATHS (request transport)
// =============================================================================

/// Request-mode paths.
pub mod paths {
    /// `POST` chat relay.
    pub const CHAT: &str = "/chat";
    /// `POST` statistics channel update.
    pub const UPDATE_STATS_CHANNELS: &str = "/update-stats-channels";
    /// `POST` answer to a verification request.
    pub const VERIFY_RESPONSE: &str = "/verify/response";
    /// `POST` in-game verification of a user.
    pub const VERIFY_USER: &str = "/verify-user";
    /// `POST` role query.
    pub const HAS_REQUIRED_ROLE: &str = "/has-required-role";
    /// `GET` intentional disconnect.
    pub const DISCONNECT_FORCE: &str = "/disconnect-force";
}

/// HTTP method for request-mode calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
}

impl Method {
    /// Canonical method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Status the service returns when it holds no session for this server.
pub const STATUS_SESSION_REVOKED: u16 = 403;

// =============================================================================
// MESSAGE CATEGORIES
// =============================================================================

/// Kind of chat-relay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    /// Player chat message.
    Chat,
    /// Player joined.
    Join,
    /// Player left.
    Quit,
    /// Player earned an advancement.
    Advancement,
    /// Player died.
    Death,
    /// Command run by a player.
    PlayerCommand,
    /// Command run from the console.
    ConsoleCommand,
    /// Server started.
    Start,
    /// Server stopping.
    Close,
}

impl ChatType {
    /// Key used on the wire and in channel subscriptions.
    pub fn key(&self) -> &'static str {
        match self {
            ChatType::Chat => "chat",
            ChatType::Join => "join",
            ChatType::Quit => "quit",
            ChatType::Advancement => "advancement",
            ChatType::Death => "death",
            ChatType::PlayerCommand => "player_command",
            ChatType::ConsoleCommand => "console_command",
            ChatType::Start => "start",
            ChatType::Close => "close",
        }
    }
}

/// Statistics-channel update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsUpdateEvent {
    /// Server came online.
    Online,
    /// Server went offline.
    Offline,
    /// Online player count changed.
    Members,
}

impl StatsUpdateEvent {
    /// Event name on the wire and in channel subscriptions.
    pub fn name(&self) -> &'static str {
        match self {
            StatsUpdateEvent::Online => "online",
            StatsUpdateEvent::Offline => "offline",
            StatsUpdateEvent::Members => "members",
        }
    }
}

/// Outbound category a channel subscription can match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCategory {
    /// Chat relay of the given type.
    Chat(ChatType),
    /// Statistics update for the given event.
    Stats(StatsUpdateEvent),
}

impl ChannelCategory {
    /// Key matched against a subscription's `types`.
    pub fn key(&self) -> &'static str {
        match self {
            ChannelCategory::Chat(kind) => kind.key(),
            ChannelCategory::Stats(event) => event.name(),
        }
    }
}

// =============================================================================
// OUTBOUND ENVELOPES
// =============================================================================

/// Chat relay envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Chat type.
    #[serde(rename = "type")]
    pub kind: ChatType,
    /// Originating player name.
    pub player: String,
    /// Message with formatting stripped.
    pub message: String,
    /// Target channel ids.
    pub channels: Vec<String>,
    /// Session id from the connection record.
    pub id: Option<String>,
    /// Server address (request mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Statistics update envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsUpdate {
    /// Event name.
    pub event: StatsUpdateEvent,
    /// Target channel ids.
    pub channels: Vec<String>,
    /// Session id from the connection record.
    pub id: Option<String>,
    /// Online player count (members event only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<usize>,
    /// Server address (request mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Answer to a verification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResponse {
    /// Verification code.
    pub code: String,
    /// Player UUID.
    pub uuid: Uuid,
}

/// In-game verification of a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserVerification {
    /// Numeric code, sent as a string.
    pub code: String,
    /// Player UUID.
    pub uuid: Uuid,
    /// Player name.
    pub username: String,
}

/// Role query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleQuery {
    /// Player UUID.
    pub uuid: Uuid,
    /// Session id from the connection record.
    pub id: Option<String>,
    /// Server address from the connection record.
    pub ip: Option<String>,
}

// =============================================================================
// RESPONSES
// =============================================================================

/// Outcome of a role query.
///
/// `Error` means the role could not be verified. It is never a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleCheck {
    /// Player holds the required role.
    Confirmed,
    /// Player does not hold the required role.
    Denied,
    /// Could not verify.
    Error,
}

impl RoleCheck {
    /// Match an outcome name case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, ResponseError> {
        match name.to_ascii_lowercase().as_str() {
            "confirmed" => Ok(RoleCheck::Confirmed),
            "denied" => Ok(RoleCheck::Denied),
            "error" => Ok(RoleCheck::Error),
            _ => Err(ResponseError::UnknownOutcome(name.to_string())),
        }
    }

    /// Parse a `{response}` body. Any failure yields [`RoleCheck::Error`].
    pub fn from_body(body: &Value) -> Self {
        parse_role_response(body).unwrap_or(RoleCheck::Error)
    }
}

/// Response parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// Body is not a JSON object.
    #[error("expected a JSON object")]
    NotAnObject,
    /// Required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// Field is present but not a string.
    #[error("field {0} is not a string")]
    NotAString(&'static str),
    /// Outcome name is not recognised.
    #[error("unknown outcome: {0}")]
    UnknownOutcome(String),
    /// Embedded JSON text failed to parse.
    #[error("invalid JSON: {0}")]
    Json(String),
}

/// Normalise a payload into an object.
///
/// Peers sometimes send the object serialized as a JSON string; that form is
/// parsed before inspection.
pub fn payload_object(payload: &Value) -> Result<serde_json::Map<String, Value>, ResponseError> {
    match payload {
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ResponseError::NotAnObject),
            Err(e) => Err(ResponseError::Json(e.to_string())),
        },
        _ => Err(ResponseError::NotAnObject),
    }
}

/// Parse the `response` field of a role-query reply.
pub fn parse_role_response(body: &Value) -> Result<RoleCheck, ResponseError> {
    let object = payload_object(body)?;
    let response = object
        .get("response")
        .ok_or(ResponseError::MissingField("response"))?;
    let name = response
        .as_str()
        .ok_or(ResponseError::NotAString("response"))?;
    RoleCheck::from_name(name)
}

/// Fields the service attaches to `auth-success`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSuccess {
    /// Role a player must hold to join, if the service enforces one.
    pub required_role_to_join: Option<Value>,
}

impl AuthSuccess {
    /// Parse an `auth-success` payload. `null` is an empty payload.
    pub fn parse(payload: &Value) -> Result<Self, ResponseError> {
        if payload.is_null() {
            return Ok(Self::default());
        }
        let object = payload_object(payload)?;
        Ok(Self {
            required_role_to_join: object
                .get("requiredRoleToJoin")
                .filter(|v| !v.is_null())
                .cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_message_wire_fields() {
        let msg = ChatMessage {
            kind: ChatType::PlayerCommand,
            player: "Steve".into(),
            message: "hi".into(),
            channels: vec!["c1".into()],
            id: Some("123".into()),
            ip: None,
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "player_command",
                "player": "Steve",
                "message": "hi",
                "channels": ["c1"],
                "id": "123",
            })
        );
    }

    #[test]
    fn test_chat_type_keys_match_serde() {
        let all = [
            ChatType::Chat,
            ChatType::Join,
            ChatType::Quit,
            ChatType::Advancement,
            ChatType::Death,
            ChatType::PlayerCommand,
            ChatType::ConsoleCommand,
            ChatType::Start,
            ChatType::Close,
        ];
        for kind in all {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.key()));
        }
    }

    #[test]
    fn test_stats_update_members_optional() {
        let update = StatsUpdate {
            event: StatsUpdateEvent::Online,
            channels: vec![],
            id: None,
            members: None,
            ip: None,
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, json!({"event": "online", "channels": [], "id": null}));

        let update = StatsUpdate {
            event: StatsUpdateEvent::Members,
            members: Some(7),
            ..update
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["members"], json!(7));
        assert_eq!(value["event"], json!("members"));
    }

    #[test]
    fn test_role_query_always_carries_id_and_ip() {
        let query = RoleQuery {
            uuid: Uuid::nil(),
            id: None,
            ip: None,
        };
        let value = serde_json::to_value(&query).unwrap();
        assert!(value.get("id").is_some());
        assert!(value.get("ip").is_some());
    }

    #[test]
    fn test_role_response_case_insensitive() {
        assert_eq!(RoleCheck::from_body(&json!({"response": "CONFIRMED"})), RoleCheck::Confirmed);
        assert_eq!(RoleCheck::from_body(&json!({"response": "Denied"})), RoleCheck::Denied);
        assert_eq!(RoleCheck::from_body(&json!({"response": "error"})), RoleCheck::Error);
    }

    #[test]
    fn test_role_response_malformed_is_error() {
        assert_eq!(RoleCheck::from_body(&json!({"response": "maybe"})), RoleCheck::Error);
        assert_eq!(RoleCheck::from_body(&json!({"response": 1})), RoleCheck::Error);
        assert_eq!(RoleCheck::from_body(&json!({})), RoleCheck::Error);
        assert_eq!(RoleCheck::from_body(&json!([1, 2])), RoleCheck::Error);
        assert_eq!(RoleCheck::from_body(&Value::Null), RoleCheck::Error);
        assert_eq!(RoleCheck::from_body(&json!("{not json")), RoleCheck::Error);
    }

    #[test]
    fn test_role_response_from_json_string() {
        let body = json!("{\"response\":\"confirmed\"}");
        assert_eq!(parse_role_response(&body), Ok(RoleCheck::Confirmed));
    }

    #[test]
    fn test_role_response_errors() {
        assert_eq!(
            parse_role_response(&json!({})),
            Err(ResponseError::MissingField("response"))
        );
        assert_eq!(
            parse_role_response(&json!({"response": true})),
            Err(ResponseError::NotAString("response"))
        );
    }

    #[test]
    fn test_auth_success_parsing() {
        let parsed = AuthSuccess::parse(&json!({"requiredRoleToJoin": "123456"})).unwrap();
        assert_eq!(parsed.required_role_to_join, Some(json!("123456")));

        let parsed = AuthSuccess::parse(&json!({})).unwrap();
        assert!(parsed.required_role_to_join.is_none());

        let parsed = AuthSuccess::parse(&Value::Null).unwrap();
        assert!(parsed.required_role_to_join.is_none());

        assert!(AuthSuccess::parse(&json!(42)).is_err());
    }

    #[test]
    fn test_channel_category_keys() {
        assert_eq!(ChannelCategory::Chat(ChatType::Death).key(), "death");
        assert_eq!(ChannelCategory::Stats(StatsUpdateEvent::Members).key(), "members");
    }

    #[test]
    fn test_method_names() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Post.as_str(), "POST");
    }
}
