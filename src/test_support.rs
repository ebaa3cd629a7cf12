use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Semaphore;

use crate::{
    domain::{
        conversation::{Conversation, ConversationKind, NewConversation},
        message::{Message, MessageDraft, MessageKind, UserSummary},
        notification::{Notification, NotificationLevel, Priority},
        pagination::{MessagePage, PageInfo, PageRequest},
        ConversationId, MessageId, UserId,
    },
    usecases::contracts::{ApiError, ChatApi, NotificationApi},
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().expect("env lock should not be poisoned")
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("valid instant")
}

pub fn user(id: UserId) -> UserSummary {
    UserSummary {
        id,
        name: Some(format!("User {id}")),
        email: Some(format!("user{id}@example.test")),
        avatar: None,
    }
}

pub fn message(
    id: MessageId,
    conversation_id: ConversationId,
    sender_id: UserId,
    created: i64,
) -> Message {
    Message {
        id,
        conversation_id,
        sender_id,
        content: format!("message {id}"),
        kind: MessageKind::Text,
        file_url: None,
        file_name: None,
        file_size: None,
        reply_to_id: None,
        is_edited: false,
        is_deleted: false,
        deleted_at: None,
        created_at: at(created),
        updated_at: at(created),
        sender: Some(user(sender_id)),
        is_read: false,
    }
}

pub fn conversation(id: ConversationId, participants: &[UserId]) -> Conversation {
    let kind = if participants.len() == 2 {
        ConversationKind::Direct
    } else {
        ConversationKind::Group
    };

    Conversation {
        id,
        kind,
        name: (kind == ConversationKind::Group).then(|| format!("Group {id}")),
        participants: participants.iter().copied().map(user).collect(),
        last_message_at: None,
        last_message: None,
        unread_count: 0,
        is_muted: false,
    }
}

pub fn notification(id: &str, seconds: i64, read: bool) -> Notification {
    Notification {
        id: id.to_owned(),
        level: NotificationLevel::Info,
        title: format!("Notification {id}"),
        message: String::new(),
        payload: None,
        timestamp: at(seconds),
        read,
        priority: Priority::Medium,
        action_url: None,
    }
}

/// Page of `count` messages ending at `newest_id`, oldest first.
pub fn page(
    conversation_id: ConversationId,
    newest_id: MessageId,
    count: usize,
    per_page: usize,
) -> MessagePage {
    let newest_first: Vec<_> = (0..count as i64)
        .map(|offset| {
            let id = newest_id - offset;
            message(id, conversation_id, 2, id)
        })
        .collect();
    crate::domain::pagination::keyset_page(newest_first, per_page)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    ListConversations,
    GetConversation(ConversationId),
    CreateConversation(NewConversation),
    ListMessages(ConversationId, PageRequest),
    SendMessage(ConversationId, MessageDraft),
    EditMessage(MessageId, String),
    DeleteMessage(MessageId),
    MarkMessageRead(MessageId),
    MarkConversationRead(ConversationId),
    SendTyping(ConversationId, bool),
    MuteConversation(ConversationId, bool),
    DeleteConversation(ConversationId),
    OnlineUsers,
}

/// Scripted [`ChatApi`]. Queued results are used first; otherwise the stub
/// answers like a healthy server.
pub struct StubChatApi {
    identity: UserId,
    state: Mutex<StubChatState>,
    page_gate: Mutex<Option<Arc<Semaphore>>>,
}

#[derive(Default)]
struct StubChatState {
    conversations: Vec<Conversation>,
    conversations_error: Option<ApiError>,
    pages: VecDeque<Result<MessagePage, ApiError>>,
    sends: VecDeque<Result<Message, ApiError>>,
    edits: VecDeque<Result<Message, ApiError>>,
    deletes: VecDeque<Result<DateTime<Utc>, ApiError>>,
    best_effort_error: Option<ApiError>,
    next_message_id: MessageId,
    next_conversation_id: ConversationId,
    calls: Vec<ApiCall>,
}

impl Default for StubChatApi {
    fn default() -> Self {
        Self::for_identity(1)
    }
}

impl StubChatApi {
    pub fn for_identity(identity: UserId) -> Self {
        Self {
            identity,
            state: Mutex::new(StubChatState {
                next_message_id: 1_000,
                next_conversation_id: 500,
                ..StubChatState::default()
            }),
            page_gate: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        self.lock().conversations = conversations;
    }

    pub fn fail_conversations(&self, error: ApiError) {
        self.lock().conversations_error = Some(error);
    }

    pub fn push_page(&self, result: Result<MessagePage, ApiError>) {
        self.lock().pages.push_back(result);
    }

    pub fn push_send(&self, result: Result<Message, ApiError>) {
        self.lock().sends.push_back(result);
    }

    pub fn push_edit(&self, result: Result<Message, ApiError>) {
        self.lock().edits.push_back(result);
    }

    pub fn push_delete(&self, result: Result<DateTime<Utc>, ApiError>) {
        self.lock().deletes.push_back(result);
    }

    /// Makes read, typing, mute and conversation-delete calls fail.
    pub fn fail_best_effort(&self, error: ApiError) {
        self.lock().best_effort_error = Some(error);
    }

    /// Holds every page response until a permit is added to the returned gate.
    pub fn hold_pages(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.page_gate.lock().expect("gate lock") = Some(Arc::clone(&gate));
        gate
    }

    fn lock(&self) -> MutexGuard<'_, StubChatState> {
        self.state.lock().expect("stub state lock")
    }

    fn record(&self, call: ApiCall) {
        self.lock().calls.push(call);
    }

    fn best_effort(&self, call: ApiCall) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.calls.push(call);
        state.best_effort_error.clone().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ChatApi for StubChatApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall::ListConversations);
        match state.conversations_error.clone() {
            Some(error) => Err(error),
            None => Ok(state.conversations.clone()),
        }
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, ApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall::GetConversation(id));
        state
            .conversations
            .iter()
            .find(|conversation| conversation.id == id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn create_conversation(
        &self,
        request: &NewConversation,
    ) -> Result<Conversation, ApiError> {
        let mut state = self.lock();
        state
            .calls
            .push(ApiCall::CreateConversation(request.clone()));
        state.next_conversation_id += 1;
        let participants: Vec<_> = request.participants_with(self.identity).into_iter().collect();
        let mut created = conversation(state.next_conversation_id, &participants);
        created.kind = request.kind;
        created.name = request.name.clone();
        state.conversations.push(created.clone());
        Ok(created)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: PageRequest,
    ) -> Result<MessagePage, ApiError> {
        let response = {
            let mut state = self.lock();
            state.calls.push(ApiCall::ListMessages(conversation_id, page));
            state.pages.pop_front()
        };

        let gate = self.page_gate.lock().expect("gate lock").clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        response.unwrap_or_else(|| {
            Ok(MessagePage {
                messages: Vec::new(),
                pagination: PageInfo::default(),
            })
        })
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        draft: &MessageDraft,
    ) -> Result<Message, ApiError> {
        let mut state = self.lock();
        state
            .calls
            .push(ApiCall::SendMessage(conversation_id, draft.clone()));
        if let Some(result) = state.sends.pop_front() {
            return result;
        }

        state.next_message_id += 1;
        let now = Utc::now();
        Ok(Message {
            id: state.next_message_id,
            conversation_id,
            sender_id: self.identity,
            content: draft.stored_content(),
            kind: draft.kind,
            file_url: draft.file_url.clone(),
            file_name: draft.file_name.clone(),
            file_size: draft.file_size,
            reply_to_id: draft.reply_to_id,
            is_edited: false,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            sender: Some(user(self.identity)),
            is_read: false,
        })
    }

    async fn edit_message(&self, message_id: MessageId, content: &str) -> Result<Message, ApiError> {
        let mut state = self.lock();
        state
            .calls
            .push(ApiCall::EditMessage(message_id, content.to_owned()));
        if let Some(result) = state.edits.pop_front() {
            return result;
        }

        let mut edited = message(message_id, 0, self.identity, 0);
        edited.content = content.to_owned();
        edited.is_edited = true;
        edited.updated_at = Utc::now();
        Ok(edited)
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<DateTime<Utc>, ApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall::DeleteMessage(message_id));
        state.deletes.pop_front().unwrap_or_else(|| Ok(Utc::now()))
    }

    async fn mark_message_read(&self, message_id: MessageId) -> Result<(), ApiError> {
        self.best_effort(ApiCall::MarkMessageRead(message_id))
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), ApiError> {
        self.best_effort(ApiCall::MarkConversationRead(conversation_id))
    }

    async fn send_typing(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApiError> {
        self.best_effort(ApiCall::SendTyping(conversation_id, is_typing))
    }

    async fn mute_conversation(
        &self,
        conversation_id: ConversationId,
        muted: bool,
    ) -> Result<(), ApiError> {
        self.best_effort(ApiCall::MuteConversation(conversation_id, muted))
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), ApiError> {
        self.record(ApiCall::DeleteConversation(conversation_id));
        let mut state = self.lock();
        if let Some(error) = state.best_effort_error.clone() {
            return Err(error);
        }
        state
            .conversations
            .retain(|conversation| conversation.id != conversation_id);
        Ok(())
    }

    async fn online_users(&self) -> Result<Vec<UserId>, ApiError> {
        self.record(ApiCall::OnlineUsers);
        Ok(vec![self.identity])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationCall {
    List,
    MarkRead(String),
    MarkAllRead,
    Delete(String),
    Clear,
}

#[derive(Default)]
pub struct StubNotificationApi {
    state: Mutex<StubNotificationState>,
}

#[derive(Default)]
struct StubNotificationState {
    notifications: Vec<Notification>,
    list_error: Option<ApiError>,
    best_effort_error: Option<ApiError>,
    calls: Vec<NotificationCall>,
}

impl StubNotificationApi {
    pub fn with_notifications(notifications: Vec<Notification>) -> Self {
        Self {
            state: Mutex::new(StubNotificationState {
                notifications,
                ..StubNotificationState::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<NotificationCall> {
        self.lock().calls.clone()
    }

    pub fn fail_list(&self, error: ApiError) {
        self.lock().list_error = Some(error);
    }

    pub fn fail_best_effort(&self, error: ApiError) {
        self.lock().best_effort_error = Some(error);
    }

    fn lock(&self) -> MutexGuard<'_, StubNotificationState> {
        self.state.lock().expect("stub state lock")
    }

    fn best_effort(&self, call: NotificationCall) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.calls.push(call);
        state.best_effort_error.clone().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl NotificationApi for StubNotificationApi {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        let mut state = self.lock();
        state.calls.push(NotificationCall::List);
        match state.list_error.clone() {
            Some(error) => Err(error),
            None => Ok(state.notifications.clone()),
        }
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        self.best_effort(NotificationCall::MarkRead(id.to_owned()))
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.best_effort(NotificationCall::MarkAllRead)
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        self.best_effort(NotificationCall::Delete(id.to_owned()))
    }

    async fn clear_notifications(&self) -> Result<(), ApiError> {
        self.best_effort(NotificationCall::Clear)
    }
}
