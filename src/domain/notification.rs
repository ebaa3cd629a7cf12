use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::timestamp::{deserialize_utc, deserialize_utc_opt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type", default)]
    pub level: NotificationLevel,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(deserialize_with = "deserialize_utc")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

/// Payload of a `notification` frame. Every field is optional; missing ones
/// fall back to defaults when turned into a [`Notification`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(rename = "type", default)]
    pub level: Option<NotificationLevel>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_utc_opt")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub action_url: Option<String>,
}

impl NotificationPayload {
    /// `fallback_id` is used when the payload has no id of its own; the
    /// frame id, or a generated one, is the usual choice.
    pub fn into_notification(
        self,
        fallback_id: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> Notification {
        let id = match self.id {
            Some(Value::String(value)) if !value.is_empty() => value,
            Some(Value::Number(value)) => value.to_string(),
            _ => fallback_id
                .map(str::to_owned)
                .unwrap_or_else(|| format!("live-{}", received_at.timestamp_millis())),
        };

        Notification {
            id,
            level: self.level.unwrap_or_default(),
            title: self
                .title
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| "Notification".to_owned()),
            message: self.message.unwrap_or_default(),
            payload: self.data,
            timestamp: self.timestamp.unwrap_or(received_at),
            read: self.read.unwrap_or(false),
            priority: self.priority.unwrap_or_default(),
            action_url: self.action_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn received() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid instant")
    }

    #[test]
    fn empty_payload_gets_defaults() {
        let notification = NotificationPayload::default().into_notification(None, received());

        assert_eq!(notification.id, "live-1700000000000");
        assert_eq!(notification.title, "Notification");
        assert_eq!(notification.level, NotificationLevel::Info);
        assert_eq!(notification.priority, Priority::Medium);
        assert_eq!(notification.timestamp, received());
        assert!(!notification.read);
    }

    #[test]
    fn frame_id_is_used_when_payload_has_none() {
        let notification =
            NotificationPayload::default().into_notification(Some("frame-3"), received());

        assert_eq!(notification.id, "frame-3");
    }

    #[test]
    fn payload_fields_override_defaults() {
        let payload: NotificationPayload = serde_json::from_value(serde_json::json!({
            "id": 12,
            "type": "warning",
            "title": "Rental overdue",
            "message": "Unit 4 is two days late",
            "priority": "high",
            "actionUrl": "/modules/rentals/4",
            "timestamp": "2023-11-14 22:10:00"
        }))
        .expect("payload must parse");

        let notification = payload.into_notification(Some("ignored"), received());

        assert_eq!(notification.id, "12");
        assert_eq!(notification.level, NotificationLevel::Warning);
        assert_eq!(notification.priority, Priority::High);
        assert_eq!(notification.action_url.as_deref(), Some("/modules/rentals/4"));
        assert_eq!(notification.timestamp.timestamp(), 1_700_000_000 - 200);
    }
}
