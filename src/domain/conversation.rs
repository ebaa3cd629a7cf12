use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    message::{Message, UserSummary},
    timestamp::{deserialize_utc, deserialize_utc_opt},
    ConversationId, MessageId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Exactly two participants.
    #[default]
    Direct,
    /// Two or more participants and a name.
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationShapeError {
    #[error("a direct conversation needs exactly two participants, got {0}")]
    DirectParticipantCount(usize),
    #[error("a group conversation needs at least two participants, got {0}")]
    GroupParticipantCount(usize),
    #[error("a group conversation needs a name")]
    GroupNameMissing,
}

/// Checks participant count and naming rules for a conversation kind.
pub fn validate_shape(
    kind: ConversationKind,
    participants: &BTreeSet<UserId>,
    name: Option<&str>,
) -> Result<(), ConversationShapeError> {
    match kind {
        ConversationKind::Direct if participants.len() != 2 => Err(
            ConversationShapeError::DirectParticipantCount(participants.len()),
        ),
        ConversationKind::Direct => Ok(()),
        ConversationKind::Group if participants.len() < 2 => Err(
            ConversationShapeError::GroupParticipantCount(participants.len()),
        ),
        ConversationKind::Group if name.map(str::trim).unwrap_or_default().is_empty() => {
            Err(ConversationShapeError::GroupNameMissing)
        }
        ConversationKind::Group => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessagePreview {
    pub id: MessageId,
    pub content: String,
    #[serde(deserialize_with = "deserialize_utc")]
    pub created_at: DateTime<Utc>,
    pub sender_id: UserId,
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(rename = "type", default)]
    pub kind: ConversationKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub participants: Vec<UserSummary>,
    #[serde(default, deserialize_with = "deserialize_utc_opt")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message: Option<LastMessagePreview>,
    /// Unread messages for the viewing participant.
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_muted: bool,
}

impl Conversation {
    pub fn participant_ids(&self) -> BTreeSet<UserId> {
        self.participants.iter().map(|user| user.id).collect()
    }

    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.iter().any(|user| user.id == user_id)
    }

    /// Group name, or the other participant's name for direct chats.
    pub fn display_name(&self, viewer: UserId) -> String {
        if let Some(name) = self.name.as_deref().filter(|name| !name.is_empty()) {
            return name.to_owned();
        }

        self.participants
            .iter()
            .find(|user| user.id != viewer)
            .map(|user| user.display_name().to_owned())
            .unwrap_or_else(|| "Unknown".to_owned())
    }

    /// Moves the activity marker forward if `message` is newer than what the
    /// conversation already knows about.
    pub fn record_message(&mut self, message: &Message) -> bool {
        let is_newer = self
            .last_message_at
            .map_or(true, |current| message.created_at >= current);
        if !is_newer {
            return false;
        }

        self.last_message_at = Some(message.created_at);
        self.last_message = Some(LastMessagePreview {
            id: message.id,
            content: message.preview(),
            created_at: message.created_at,
            sender_id: message.sender_id,
        });
        true
    }

    /// Keeps the list preview in sync when the previewed message changes.
    pub fn refresh_preview(&mut self, message: &Message) {
        if let Some(preview) = self
            .last_message
            .as_mut()
            .filter(|preview| preview.id == message.id)
        {
            preview.content = message.preview();
        }
    }
}

/// Orders conversations by most recent activity; never-active ones go last.
pub fn sort_by_activity(conversations: &mut [Conversation]) {
    conversations.sort_by(|left, right| {
        right
            .last_message_at
            .cmp(&left.last_message_at)
            .then_with(|| right.id.cmp(&left.id))
    });
}

/// Body of a create-conversation request. The caller is implicitly a
/// participant and is not listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    #[serde(rename = "type", default)]
    pub kind: ConversationKind,
    pub participant_ids: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NewConversation {
    pub fn direct(other: UserId) -> Self {
        Self {
            kind: ConversationKind::Direct,
            participant_ids: vec![other],
            name: None,
        }
    }

    pub fn group(name: impl Into<String>, participant_ids: Vec<UserId>) -> Self {
        Self {
            kind: ConversationKind::Group,
            participant_ids,
            name: Some(name.into()),
        }
    }

    /// Full participant set including the creator.
    pub fn participants_with(&self, creator: UserId) -> BTreeSet<UserId> {
        let mut participants: BTreeSet<UserId> = self.participant_ids.iter().copied().collect();
        participants.insert(creator);
        participants
    }
}
