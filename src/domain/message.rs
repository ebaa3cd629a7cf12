use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    timestamp::{deserialize_utc, deserialize_utc_opt},
    ConversationId, MessageId, UserId,
};

/// Content shown in place of a deleted message. The original text is dropped.
pub const DELETED_MESSAGE_TOMBSTONE: &str = "This message was deleted.";

const PREVIEW_MAX_CHARS: usize = 50;

/// Type of payload carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl MessageKind {
    /// Returns a display label for attachment kinds, or None for plain text.
    pub fn display_label(&self) -> Option<&'static str> {
        match self {
            MessageKind::Text => None,
            MessageKind::Image => Some("[Image]"),
            MessageKind::File => Some("[File]"),
        }
    }
}

/// Public profile fields of a user as embedded in messages and conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserSummary {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "messageType", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Message this one replies to. A reference only: the target may be
    /// absent from the cache or deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, deserialize_with = "deserialize_utc_opt")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_utc")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_utc")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserSummary>,
    /// Whether the viewing identity has read this message. Derived by the
    /// server from its read receipts.
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Returns the display content: kind label + text, or just text.
    pub fn display_content(&self) -> String {
        if self.is_deleted {
            return DELETED_MESSAGE_TOMBSTONE.to_owned();
        }

        match (self.kind.display_label(), self.content.is_empty()) {
            (Some(label), true) => label.to_owned(),
            (Some(label), false) => format!("{} {}", label, self.content),
            (None, _) => self.content.clone(),
        }
    }

    /// Short single-line preview used in conversation lists.
    pub fn preview(&self) -> String {
        truncate_preview(&self.display_content())
    }

    /// Replaces the content of a live message. Deleted messages stay deleted.
    pub fn apply_edit(&mut self, content: &str, at: DateTime<Utc>) -> bool {
        if self.is_deleted {
            return false;
        }

        self.content = content.to_owned();
        self.is_edited = true;
        self.updated_at = at;
        true
    }

    /// Turns the message into a tombstone. Id, conversation, sender and
    /// creation time survive; content and attachment are discarded.
    pub fn apply_delete(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_deleted {
            return false;
        }

        self.is_deleted = true;
        self.deleted_at = Some(at);
        self.updated_at = at;
        self.content = DELETED_MESSAGE_TOMBSTONE.to_owned();
        self.file_url = None;
        self.file_name = None;
        self.file_size = None;
        true
    }
}

fn truncate_preview(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= PREVIEW_MAX_CHARS {
        return single_line;
    }

    let head: String = single_line.chars().take(PREVIEW_MAX_CHARS).collect();
    format!("{head}...")
}

/// Body of a send-message request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub content: String,
    #[serde(rename = "messageType", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to_id = Some(message_id);
        self
    }

    pub fn has_attachment(&self) -> bool {
        self.file_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }

    /// Content is required unless a file is attached.
    pub fn is_sendable(&self) -> bool {
        !self.content.trim().is_empty() || self.has_attachment()
    }

    /// Content the server stores: trimmed text, or the file name (falling
    /// back to `Image`) for bare attachments.
    pub fn stored_content(&self) -> String {
        let trimmed = self.content.trim();
        if !trimmed.is_empty() || !self.has_attachment() {
            return trimmed.to_owned();
        }

        self.file_name.clone().unwrap_or_else(|| "Image".to_owned())
    }
}
