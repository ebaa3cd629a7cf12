//! Frames carried by the push stream.
//!
//! Wire shape: `{"type": "...", "payload"|"data": {...}, "timestamp": "...", "id": "..."}`.
//! The envelope is parsed loosely: the type is kept as a string so frames of
//! unknown types still parse and can be ignored by the router. `payload` wins
//! when both payload keys are present, and a timestamp that does not parse is
//! dropped rather than failing the frame.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{
    message::Message,
    timestamp::{deserialize_utc, parse_utc},
    ConversationId, MessageId, UserId,
};

pub const NOTIFICATION: &str = "notification";
pub const SYSTEM: &str = "system";
pub const UPDATE: &str = "update";
pub const CHAT_MESSAGE: &str = "chat:message";
pub const CHAT_MESSAGE_EDITED: &str = "chat:message_edited";
pub const CHAT_MESSAGE_DELETED: &str = "chat:message_deleted";
pub const CHAT_TYPING: &str = "chat:typing";
pub const CHAT_READ_RECEIPT: &str = "chat:read_receipt";
pub const CHAT_CONVERSATION_CREATED: &str = "chat:conversation_created";
pub const USER_ONLINE: &str = "user:online";
pub const USER_OFFLINE: &str = "user:offline";

/// Classification of an envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Notification,
    System,
    Update,
    ChatMessage,
    ChatMessageEdited,
    ChatMessageDeleted,
    ChatTyping,
    ChatReadReceipt,
    ConversationCreated,
    UserOnline,
    UserOffline,
    Unknown,
}

impl EventKind {
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            NOTIFICATION => Self::Notification,
            SYSTEM => Self::System,
            UPDATE => Self::Update,
            CHAT_MESSAGE => Self::ChatMessage,
            CHAT_MESSAGE_EDITED => Self::ChatMessageEdited,
            CHAT_MESSAGE_DELETED => Self::ChatMessageDeleted,
            CHAT_TYPING => Self::ChatTyping,
            CHAT_READ_RECEIPT => Self::ChatReadReceipt,
            CHAT_CONVERSATION_CREATED => Self::ConversationCreated,
            USER_ONLINE => Self::UserOnline,
            USER_OFFLINE => Self::UserOffline,
            _ => Self::Unknown,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Notification => NOTIFICATION,
            Self::System => SYSTEM,
            Self::Update => UPDATE,
            Self::ChatMessage => CHAT_MESSAGE,
            Self::ChatMessageEdited => CHAT_MESSAGE_EDITED,
            Self::ChatMessageDeleted => CHAT_MESSAGE_DELETED,
            Self::ChatTyping => CHAT_TYPING,
            Self::ChatReadReceipt => CHAT_READ_RECEIPT,
            Self::ConversationCreated => CHAT_CONVERSATION_CREATED,
            Self::UserOnline => USER_ONLINE,
            Self::UserOffline => USER_OFFLINE,
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("frame is not a valid envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload of {kind} frame does not match its schema: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    kind: String,
    payload: Value,
    timestamp: Option<DateTime<Utc>>,
    id: Option<String>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

impl EventEnvelope {
    /// Builds an envelope stamped with the current instant.
    pub fn new(
        kind: EventKind,
        payload: &impl Serialize,
        id: Option<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.as_wire().to_owned(),
            payload: serde_json::to_value(payload)?,
            timestamp: Some(Utc::now()),
            id,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_str(raw)?;
        let timestamp = raw
            .timestamp
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|at| parse_utc(at).ok());
        let id = raw.id.and_then(|id| match id {
            Value::String(value) => Some(value),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        });

        Ok(Self {
            kind: raw.kind,
            payload: raw.payload.or(raw.data).unwrap_or_default(),
            timestamp,
            id,
        })
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireEnvelope {
            kind: &self.kind,
            data: &self.payload,
            timestamp: self
                .timestamp
                .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            id: self.id.as_deref(),
        })
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_wire(&self.kind)
    }

    pub fn raw_kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Decodes the payload into the schema of its event kind.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        T::deserialize(&self.payload).map_err(|source| EnvelopeError::Payload {
            kind: self.kind.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub message: Message,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEditedPayload {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub content: String,
    #[serde(deserialize_with = "deserialize_utc")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    #[serde(deserialize_with = "deserialize_utc")]
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationCreatedPayload {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub entity: String,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RawSystemPayload {
    action: String,
    #[serde(default)]
    url: Option<String>,
}

/// Instruction carried by a `system` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemAction {
    Reload,
    Redirect { url: String },
    UpdateAvailable,
    Other(String),
}

impl SystemAction {
    pub fn from_payload(payload: &Value) -> Result<Self, serde_json::Error> {
        let raw = RawSystemPayload::deserialize(payload)?;

        Ok(match (raw.action.as_str(), raw.url) {
            ("reload", _) => Self::Reload,
            ("redirect", Some(url)) => Self::Redirect { url },
            ("update_available", _) => Self::UpdateAvailable,
            _ => Self::Other(raw.action),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frame_with_payload_key() {
        let envelope = EventEnvelope::parse(
            r#"{"type":"notification","payload":{"title":"Hi"},"timestamp":"2025-01-01T00:00:00Z","id":"n1"}"#,
        )
        .expect("frame must parse");

        assert_eq!(envelope.kind(), EventKind::Notification);
        assert_eq!(envelope.payload()["title"], "Hi");
        assert_eq!(envelope.id(), Some("n1"));
        assert!(envelope.timestamp().is_some());
    }

    #[test]
    fn parses_frame_with_data_key_and_numeric_id() {
        let envelope =
            EventEnvelope::parse(r#"{"type":"chat:typing","data":{"conversationId":1},"id":42}"#)
                .expect("frame must parse");

        assert_eq!(envelope.kind(), EventKind::ChatTyping);
        assert_eq!(envelope.payload()["conversationId"], 1);
        assert_eq!(envelope.id(), Some("42"));
        assert_eq!(envelope.timestamp(), None);
    }

    #[test]
    fn payload_key_wins_over_data_key() {
        let envelope = EventEnvelope::parse(
            r#"{"type":"user:online","payload":{"userId":3},"data":{"userId":8}}"#,
        )
        .expect("frame must parse");

        assert_eq!(envelope.payload()["userId"], 3);
    }

    #[test]
    fn null_payload_falls_back_to_data() {
        let envelope =
            EventEnvelope::parse(r#"{"type":"user:online","payload":null,"data":{"userId":8}}"#)
                .expect("frame must parse");

        assert_eq!(envelope.payload()["userId"], 8);
    }

    #[test]
    fn unreadable_timestamp_keeps_the_frame() {
        let envelope = EventEnvelope::parse(
            r#"{"type":"chat:typing","data":{"conversationId":1},"timestamp":"yesterday"}"#,
        )
        .expect("frame must parse");
        let numeric = EventEnvelope::parse(r#"{"type":"update","data":{},"timestamp":1700000000}"#)
            .expect("frame must parse");

        assert_eq!(envelope.kind(), EventKind::ChatTyping);
        assert_eq!(envelope.timestamp(), None);
        assert_eq!(numeric.timestamp(), None);
    }

    #[test]
    fn unknown_types_parse_as_unknown() {
        let envelope = EventEnvelope::parse(r#"{"type":"rental_overdue","data":{}}"#)
            .expect("frame must parse");

        assert_eq!(envelope.kind(), EventKind::Unknown);
        assert_eq!(envelope.raw_kind(), "rental_overdue");
    }

    #[test]
    fn rejects_frames_without_type() {
        assert!(matches!(
            EventEnvelope::parse(r#"{"data":{}}"#),
            Err(EnvelopeError::Json(_))
        ));
        assert!(EventEnvelope::parse("not json").is_err());
    }

    #[test]
    fn zone_less_frame_timestamp_is_utc() {
        let envelope =
            EventEnvelope::parse(r#"{"type":"update","data":{},"timestamp":"2025-11-16 07:38:30"}"#)
                .expect("frame must parse");

        assert_eq!(
            envelope.timestamp().map(|at| at.to_rfc3339()),
            Some("2025-11-16T07:38:30+00:00".to_owned())
        );
    }

    #[test]
    fn frame_written_by_server_parses_back_with_data_key() {
        let payload = PresencePayload { user_id: 9 };
        let envelope = EventEnvelope::new(EventKind::UserOnline, &payload, Some("p-9".into()))
            .expect("envelope must build");

        let frame = envelope.to_frame().expect("frame must serialize");
        let value: Value = serde_json::from_str(&frame).expect("frame is json");

        assert_eq!(value["type"], "user:online");
        assert_eq!(value["data"]["userId"], 9);
        let decoded: PresencePayload = EventEnvelope::parse(&frame)
            .expect("frame must parse")
            .decode()
            .expect("payload must decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn payload_schema_mismatch_is_reported_with_kind() {
        let envelope = EventEnvelope::parse(r#"{"type":"chat:typing","data":{"userId":"x"}}"#)
            .expect("frame must parse");

        let err = envelope.decode::<TypingPayload>().expect_err("must fail");

        assert!(err.to_string().contains("chat:typing"));
    }

    #[test]
    fn system_actions_are_classified() {
        let reload = SystemAction::from_payload(&serde_json::json!({"action":"reload"}));
        let redirect = SystemAction::from_payload(
            &serde_json::json!({"action":"redirect","url":"/modules/rentals"}),
        );
        let other = SystemAction::from_payload(&serde_json::json!({"action":"rotate_keys"}));

        assert_eq!(reload.expect("reload"), SystemAction::Reload);
        assert_eq!(
            redirect.expect("redirect"),
            SystemAction::Redirect {
                url: "/modules/rentals".to_owned()
            }
        );
        assert_eq!(
            other.expect("other"),
            SystemAction::Other("rotate_keys".to_owned())
        );
    }
}
