//! REST contracts answered by the in-process services for one identity.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{
        conversation::{Conversation, NewConversation},
        message::{Message, MessageDraft},
        notification::Notification,
        pagination::{MessagePage, PageRequest},
        ConversationId, MessageId, UserId,
    },
    usecases::contracts::{ApiError, ChatApi, NotificationApi},
};

use super::{
    notifications::NotificationService,
    persistence::{MessageService, ServiceError},
};

#[derive(Clone)]
pub struct LocalApi {
    identity: UserId,
    messages: Arc<MessageService>,
    notifications: Arc<NotificationService>,
}

impl LocalApi {
    pub fn new(
        identity: UserId,
        messages: Arc<MessageService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            identity,
            messages,
            notifications,
        }
    }

    pub fn identity(&self) -> UserId {
        self.identity
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::NotFound => ApiError::NotFound,
            other => ApiError::Rejected(other.to_string()),
        }
    }
}

#[async_trait]
impl ChatApi for LocalApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        Ok(self.messages.list_conversations(self.identity))
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, ApiError> {
        Ok(self.messages.get_conversation(self.identity, id)?)
    }

    async fn create_conversation(
        &self,
        request: &NewConversation,
    ) -> Result<Conversation, ApiError> {
        Ok(self.messages.create_conversation(self.identity, request)?)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: PageRequest,
    ) -> Result<MessagePage, ApiError> {
        Ok(self
            .messages
            .list_messages(self.identity, conversation_id, page)?)
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        draft: &MessageDraft,
    ) -> Result<Message, ApiError> {
        Ok(self
            .messages
            .send_message(self.identity, conversation_id, draft)?)
    }

    async fn edit_message(&self, message_id: MessageId, content: &str) -> Result<Message, ApiError> {
        Ok(self
            .messages
            .edit_message(self.identity, message_id, content)?)
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<DateTime<Utc>, ApiError> {
        Ok(self.messages.delete_message(self.identity, message_id)?)
    }

    async fn mark_message_read(&self, message_id: MessageId) -> Result<(), ApiError> {
        Ok(self.messages.mark_message_read(self.identity, message_id)?)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), ApiError> {
        Ok(self
            .messages
            .mark_conversation_read(self.identity, conversation_id)?)
    }

    async fn send_typing(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApiError> {
        Ok(self
            .messages
            .send_typing(self.identity, conversation_id, is_typing)?)
    }

    async fn mute_conversation(
        &self,
        conversation_id: ConversationId,
        muted: bool,
    ) -> Result<(), ApiError> {
        Ok(self
            .messages
            .mute_conversation(self.identity, conversation_id, muted)?)
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), ApiError> {
        Ok(self
            .messages
            .leave_conversation(self.identity, conversation_id)?)
    }

    async fn online_users(&self) -> Result<Vec<UserId>, ApiError> {
        Ok(self.messages.online_users())
    }
}

#[async_trait]
impl NotificationApi for LocalApi {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        Ok(self.notifications.list(self.identity))
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        self.notifications.mark_read(self.identity, id);
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.notifications.mark_all_read(self.identity);
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        self.notifications.delete(self.identity, id);
        Ok(())
    }

    async fn clear_notifications(&self) -> Result<(), ApiError> {
        self.notifications.clear(self.identity);
        Ok(())
    }
}
