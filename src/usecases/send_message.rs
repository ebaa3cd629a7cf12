//! Use case for sending a message to a conversation.
//!
//! Validates the draft and delegates to the [`ChatApi`]. Nothing is cached
//! here: the caller stores the acknowledged message.

use crate::domain::{
    message::{Message, MessageDraft},
    ConversationId,
};

use super::contracts::{ApiError, ChatApi};

/// Command to send a message to a specific conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageCommand {
    pub conversation_id: ConversationId,
    pub draft: MessageDraft,
}

impl SendMessageCommand {
    pub fn text(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            draft: MessageDraft::text(content),
        }
    }
}

/// Domain-level errors for the send operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendMessageError {
    /// No text after trimming and no attachment.
    EmptyMessage,
    Unauthorized,
    /// Conversation is missing or the sender is not a participant.
    ConversationNotFound,
    Rejected(String),
    TemporarilyUnavailable,
}

impl std::fmt::Display for SendMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => f.write_str("message is empty"),
            Self::Unauthorized => f.write_str("not authorized to send messages"),
            Self::ConversationNotFound => f.write_str("conversation not found"),
            Self::Rejected(reason) => write!(f, "message rejected: {reason}"),
            Self::TemporarilyUnavailable => f.write_str("message could not be sent, try again"),
        }
    }
}

impl std::error::Error for SendMessageError {}

/// Sends the draft with its text trimmed.
///
/// # Errors
/// Returns `SendMessageError::EmptyMessage` if there is neither text nor an
/// attachment. Source errors are mapped to domain errors.
pub async fn send_message(
    sender: &dyn ChatApi,
    command: SendMessageCommand,
) -> Result<Message, SendMessageError> {
    if !command.draft.is_sendable() {
        return Err(SendMessageError::EmptyMessage);
    }

    let draft = MessageDraft {
        content: command.draft.content.trim().to_owned(),
        ..command.draft
    };

    sender
        .send_message(command.conversation_id, &draft)
        .await
        .map_err(map_source_error)
}

fn map_source_error(error: ApiError) -> SendMessageError {
    match error {
        ApiError::Unauthorized => SendMessageError::Unauthorized,
        ApiError::NotFound => SendMessageError::ConversationNotFound,
        ApiError::Rejected(reason) => SendMessageError::Rejected(reason),
        ApiError::Unavailable(_) | ApiError::InvalidData(_) => {
            SendMessageError::TemporarilyUnavailable
        }
    }
}
