use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    conversation::{Conversation, NewConversation},
    message::{Message, MessageDraft},
    notification::Notification,
    pagination::{MessagePage, PageRequest},
    ConversationId, MessageId, UserId,
};

/// Failure reported by a REST backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("request was not authorized")]
    Unauthorized,
    #[error("resource not found")]
    NotFound,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("response violated the data contract: {0}")]
    InvalidData(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "API_UNAUTHORIZED",
            Self::NotFound => "API_NOT_FOUND",
            Self::Rejected(_) => "API_REJECTED",
            Self::Unavailable(_) => "API_UNAVAILABLE",
            Self::InvalidData(_) => "API_INVALID_DATA",
        }
    }
}

/// Chat REST surface as seen by one authenticated identity.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, ApiError>;

    async fn create_conversation(&self, request: &NewConversation)
        -> Result<Conversation, ApiError>;

    /// Returns one page of history, oldest first.
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: PageRequest,
    ) -> Result<MessagePage, ApiError>;

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        draft: &MessageDraft,
    ) -> Result<Message, ApiError>;

    async fn edit_message(&self, message_id: MessageId, content: &str)
        -> Result<Message, ApiError>;

    /// Returns the server's deletion time.
    async fn delete_message(&self, message_id: MessageId) -> Result<DateTime<Utc>, ApiError>;

    async fn mark_message_read(&self, message_id: MessageId) -> Result<(), ApiError>;

    async fn mark_conversation_read(&self, conversation_id: ConversationId)
        -> Result<(), ApiError>;

    async fn send_typing(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApiError>;

    async fn mute_conversation(
        &self,
        conversation_id: ConversationId,
        muted: bool,
    ) -> Result<(), ApiError>;

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), ApiError>;

    /// Identities currently holding a live push stream.
    async fn online_users(&self) -> Result<Vec<UserId>, ApiError>;
}

#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError>;

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError>;

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError>;

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError>;

    async fn clear_notifications(&self) -> Result<(), ApiError>;
}
