//! Client-side conversation and message store.
//!
//! Reconciles REST pages with live deltas. All message-list mutations go
//! through [`MessageCache`]; the state lock is never held across an await.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;

use crate::{
    domain::{
        conversation::{sort_by_activity, validate_shape, Conversation, ConversationShapeError, NewConversation},
        envelope::{MessageDeletedPayload, MessageEditedPayload, ReadReceiptPayload},
        message::{Message, MessageDraft},
        message_cache::{Insert, MessageCache},
        mutation::{MutationKind, MutationLog, MutationState},
        ConversationId, MessageId, UserId,
    },
    realtime::typing::{TypingRegistry, TypingUser},
};

use super::{
    contracts::{ApiError, ChatApi},
    list_conversations::{list_conversations, ListConversationsError},
    load_messages::{load_messages, LoadMessagesError, LoadMessagesQuery},
    loading::LoadingFlag,
    send_message::{send_message, SendMessageCommand, SendMessageError},
};

const CHAT_DETAIL_LOAD_FAILED: &str = "CHAT_DETAIL_LOAD_FAILED";
const CHAT_PAGE_LOAD_FAILED: &str = "CHAT_PAGE_LOAD_FAILED";
const CHAT_SEND_FAILED: &str = "CHAT_SEND_FAILED";
const CHAT_MUTATION_FAILED: &str = "CHAT_MUTATION_FAILED";
const CHAT_READ_SYNC_FAILED: &str = "CHAT_READ_SYNC_FAILED";
const CHAT_TYPING_SYNC_FAILED: &str = "CHAT_TYPING_SYNC_FAILED";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatStoreError {
    #[error("message {0} is not cached")]
    MessageNotCached(MessageId),
    #[error("another change to message {0} is still pending")]
    MutationPending(MessageId),
    #[error("message {0} was deleted")]
    MessageDeleted(MessageId),
    #[error("message content must not be empty")]
    EmptyContent,
    #[error(transparent)]
    InvalidConversation(#[from] ConversationShapeError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// What a live `chat:message` did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Added,
    /// Already cached; the cached copy was refreshed.
    Refreshed,
    Duplicate,
    /// Added to a conversation missing from the list.
    NewConversation,
}

#[derive(Clone)]
pub struct ChatStore {
    identity: UserId,
    api: Arc<dyn ChatApi>,
    typing: TypingRegistry,
    state: Arc<Mutex<ChatState>>,
    loading: LoadingFlag,
    page_size: usize,
}

#[derive(Debug, Default)]
struct ChatState {
    conversations: Vec<Conversation>,
    current: Option<ConversationId>,
    caches: HashMap<ConversationId, MessageCache>,
    pending_pages: HashSet<ConversationId>,
    mutations: MutationLog,
    read_by: HashMap<MessageId, BTreeSet<UserId>>,
}

impl ChatState {
    fn conversation_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|conversation| conversation.id == id)
    }

    fn conversation_of(&self, message_id: MessageId) -> Option<ConversationId> {
        self.caches
            .iter()
            .find_map(|(id, cache)| cache.contains(message_id).then_some(*id))
    }

    fn upsert_conversation(&mut self, conversation: Conversation) {
        match self.conversation_mut(conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        sort_by_activity(&mut self.conversations);
    }

    fn refresh_preview(&mut self, message: &Message) {
        if let Some(conversation) = self.conversation_mut(message.conversation_id) {
            conversation.refresh_preview(message);
        }
    }
}

/// Removes the in-flight marker for a conversation page on every exit path.
struct PendingPage {
    state: Arc<Mutex<ChatState>>,
    conversation_id: ConversationId,
}

impl Drop for PendingPage {
    fn drop(&mut self) {
        lock_state(&self.state)
            .pending_pages
            .remove(&self.conversation_id);
    }
}

fn lock_state(state: &Mutex<ChatState>) -> MutexGuard<'_, ChatState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChatStore {
    pub fn new(
        identity: UserId,
        api: Arc<dyn ChatApi>,
        typing: TypingRegistry,
        page_size: usize,
    ) -> Self {
        Self {
            identity,
            api,
            typing,
            state: Arc::new(Mutex::new(ChatState::default())),
            loading: LoadingFlag::default(),
            page_size,
        }
    }

    pub fn identity(&self) -> UserId {
        self.identity
    }

    /// Replaces the conversation list with the server's, newest activity first.
    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ListConversationsError> {
        let _loading = self.loading.begin();
        let conversations = list_conversations(self.api.as_ref()).await?;

        self.lock().conversations = conversations.clone();
        Ok(conversations)
    }

    /// Makes `conversation_id` current, refreshes its details and loads the
    /// newest page unless history is already cached.
    pub async fn select_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), LoadMessagesError> {
        self.lock().current = Some(conversation_id);
        let _loading = self.loading.begin();

        match self.api.get_conversation(conversation_id).await {
            Ok(conversation) => self.lock().upsert_conversation(conversation),
            Err(ApiError::NotFound) => {
                let mut state = self.lock();
                if state.current == Some(conversation_id) {
                    state.current = None;
                }
                return Err(LoadMessagesError::ConversationNotFound);
            }
            Err(error) => {
                tracing::warn!(
                    code = CHAT_DETAIL_LOAD_FAILED,
                    conversation_id,
                    error = %error,
                    "conversation details unavailable; using cached list entry"
                );
            }
        }

        self.load_initial_page(conversation_id).await
    }

    /// Loads the next older page of a conversation. Returns how many new
    /// messages were cached; zero when history is exhausted.
    pub async fn load_older(&self, conversation_id: ConversationId) -> Result<usize, LoadMessagesError> {
        let cursor = self
            .lock()
            .caches
            .get(&conversation_id)
            .and_then(MessageCache::next_page_cursor);
        let Some(cursor) = cursor else {
            return Ok(0);
        };
        let Some(_pending) = self.begin_page(conversation_id) else {
            return Ok(0);
        };

        let _loading = self.loading.begin();
        let query = LoadMessagesQuery::older_than(conversation_id, cursor).with_limit(self.page_size);
        let page = load_messages(self.api.as_ref(), query)
            .await
            .map_err(|error| log_page_error(conversation_id, error))?;

        // The state guard must be released before `_pending` drops and relocks.
        let added = self
            .lock()
            .caches
            .entry(conversation_id)
            .or_default()
            .apply_page(page);
        Ok(added)
    }

    /// Refetches the newest page of every cached conversation and merges it,
    /// filling in messages pushed while the stream was down. Conversations
    /// with a page already in flight are skipped. Returns the number of
    /// messages added.
    pub async fn resync_cached(&self) -> usize {
        let cached: Vec<ConversationId> = self.lock().caches.keys().copied().collect();

        let mut added = 0;
        for conversation_id in cached {
            let Some(_pending) = self.begin_page(conversation_id) else {
                continue;
            };
            let query = LoadMessagesQuery::new(conversation_id).with_limit(self.page_size);
            let page = match load_messages(self.api.as_ref(), query).await {
                Ok(page) => page,
                Err(error) => {
                    log_page_error(conversation_id, error);
                    continue;
                }
            };

            if let Some(cache) = self.lock().caches.get_mut(&conversation_id) {
                added += cache.merge_latest(page);
            }
        }
        added
    }

    /// Sends a message. The cache is only touched once the server acknowledges.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        draft: MessageDraft,
    ) -> Result<Message, SendMessageError> {
        let command = SendMessageCommand {
            conversation_id,
            draft,
        };
        let message = send_message(self.api.as_ref(), command)
            .await
            .inspect_err(|error| {
                tracing::warn!(
                    code = CHAT_SEND_FAILED,
                    conversation_id,
                    error = %error,
                    "message was not sent"
                );
            })?;

        let mut state = self.lock();
        state
            .caches
            .entry(conversation_id)
            .or_default()
            .insert(message.clone());
        if let Some(conversation) = state.conversation_mut(conversation_id) {
            conversation.record_message(&message);
        }
        sort_by_activity(&mut state.conversations);
        Ok(message)
    }

    /// Applies a message delivered by the push stream.
    pub fn apply_live_message(&self, message: Message) -> LiveOutcome {
        let mut state = self.lock();
        let conversation_id = message.conversation_id;
        let is_current = state.current == Some(conversation_id);
        let from_other = message.sender_id != self.identity;

        let inserted = state
            .caches
            .entry(conversation_id)
            .or_default()
            .apply_live(message.clone());
        match inserted {
            Insert::Duplicate => return LiveOutcome::Duplicate,
            Insert::Updated => {
                state.refresh_preview(&message);
                return LiveOutcome::Refreshed;
            }
            Insert::Added => {}
        }

        let Some(conversation) = state.conversation_mut(conversation_id) else {
            return LiveOutcome::NewConversation;
        };
        // A list fetched after the send already counts this message.
        let already_counted = conversation
            .last_message
            .as_ref()
            .is_some_and(|preview| preview.id == message.id);
        conversation.record_message(&message);
        if from_other && !is_current && !already_counted {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        sort_by_activity(&mut state.conversations);
        LiveOutcome::Added
    }

    /// Edits a cached message. The cached content changes only after the
    /// server confirms.
    pub async fn edit_message(
        &self,
        message_id: MessageId,
        content: &str,
    ) -> Result<Message, ChatStoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatStoreError::EmptyContent);
        }
        self.begin_mutation(
            message_id,
            MutationKind::Edit {
                content: content.to_owned(),
            },
        )?;

        match self.api.edit_message(message_id, content).await {
            Ok(updated) => {
                let mut state = self.lock();
                state.mutations.confirm(message_id);
                let edited = state.conversation_of(message_id).and_then(|conversation_id| {
                    state.caches.get_mut(&conversation_id).and_then(|cache| {
                        cache
                            .edit(message_id, &updated.content, updated.updated_at)
                            .cloned()
                    })
                });
                let edited = edited.ok_or(ChatStoreError::MessageNotCached(message_id))?;
                state.refresh_preview(&edited);
                Ok(edited)
            }
            Err(error) => Err(self.fail_mutation(message_id, error)),
        }
    }

    /// Deletes a message, leaving a tombstone in place once confirmed.
    pub async fn delete_message(&self, message_id: MessageId) -> Result<(), ChatStoreError> {
        self.begin_mutation(message_id, MutationKind::Delete)?;

        match self.api.delete_message(message_id).await {
            Ok(deleted_at) => {
                let mut state = self.lock();
                state.mutations.confirm(message_id);
                let deleted = state.conversation_of(message_id).and_then(|conversation_id| {
                    state
                        .caches
                        .get_mut(&conversation_id)
                        .and_then(|cache| cache.delete(message_id, deleted_at).cloned())
                });
                if let Some(deleted) = deleted {
                    state.refresh_preview(&deleted);
                }
                Ok(())
            }
            Err(error) => Err(self.fail_mutation(message_id, error)),
        }
    }

    pub fn apply_live_edit(&self, payload: &MessageEditedPayload) -> bool {
        let mut state = self.lock();
        let edited = state
            .caches
            .get_mut(&payload.conversation_id)
            .and_then(|cache| {
                cache
                    .edit(payload.message_id, &payload.content, payload.updated_at)
                    .cloned()
            });
        match edited {
            Some(message) if !message.is_deleted => {
                state.refresh_preview(&message);
                true
            }
            _ => false,
        }
    }

    pub fn apply_live_delete(&self, payload: &MessageDeletedPayload) -> bool {
        let mut state = self.lock();
        let deleted = state
            .caches
            .get_mut(&payload.conversation_id)
            .and_then(|cache| cache.delete(payload.message_id, payload.deleted_at).cloned());
        match deleted {
            Some(message) => {
                state.refresh_preview(&message);
                true
            }
            None => false,
        }
    }

    /// Records that `payload.user_id` read a message. Receipts for this
    /// identity come from its other sessions and mark the message read here.
    pub fn apply_read_receipt(&self, payload: &ReadReceiptPayload) -> bool {
        let mut state = self.lock();
        if payload.user_id != self.identity {
            return state
                .read_by
                .entry(payload.message_id)
                .or_default()
                .insert(payload.user_id);
        }

        let changed = state
            .caches
            .get_mut(&payload.conversation_id)
            .is_some_and(|cache| cache.mark_read(payload.message_id));
        if changed {
            if let Some(conversation) = state.conversation_mut(payload.conversation_id) {
                conversation.unread_count = conversation.unread_count.saturating_sub(1);
            }
        }
        changed
    }

    /// Marks a message read locally right away, then tells the server.
    /// Server failures are logged and not rolled back.
    pub async fn mark_as_read(&self, message_id: MessageId) {
        {
            let mut state = self.lock();
            let mut touched = Vec::new();
            for (conversation_id, cache) in state.caches.iter_mut() {
                let from_other = cache
                    .get(message_id)
                    .is_some_and(|message| message.sender_id != self.identity);
                if cache.mark_read(message_id) && from_other {
                    touched.push(*conversation_id);
                }
            }
            for conversation_id in touched {
                if let Some(conversation) = state.conversation_mut(conversation_id) {
                    conversation.unread_count = conversation.unread_count.saturating_sub(1);
                }
            }
        }

        if let Err(error) = self.api.mark_message_read(message_id).await {
            tracing::warn!(
                code = CHAT_READ_SYNC_FAILED,
                message_id,
                error = %error,
                "failed to sync read state; keeping local state"
            );
        }
    }

    pub async fn mark_conversation_as_read(&self, conversation_id: ConversationId) {
        {
            let mut state = self.lock();
            if let Some(cache) = state.caches.get_mut(&conversation_id) {
                cache.mark_all_read(self.identity);
            }
            if let Some(conversation) = state.conversation_mut(conversation_id) {
                conversation.unread_count = 0;
            }
        }

        if let Err(error) = self.api.mark_conversation_read(conversation_id).await {
            tracing::warn!(
                code = CHAT_READ_SYNC_FAILED,
                conversation_id,
                error = %error,
                "failed to sync conversation read state; keeping local state"
            );
        }
    }

    pub async fn create_conversation(
        &self,
        request: NewConversation,
    ) -> Result<Conversation, ChatStoreError> {
        validate_shape(
            request.kind,
            &request.participants_with(self.identity),
            request.name.as_deref(),
        )?;

        let conversation = self.api.create_conversation(&request).await?;
        self.lock().upsert_conversation(conversation.clone());
        Ok(conversation)
    }

    pub async fn mute_conversation(
        &self,
        conversation_id: ConversationId,
        muted: bool,
    ) -> Result<(), ChatStoreError> {
        self.api.mute_conversation(conversation_id, muted).await?;

        if let Some(conversation) = self.lock().conversation_mut(conversation_id) {
            conversation.is_muted = muted;
        }
        Ok(())
    }

    /// Leaves a conversation and forgets its cached history.
    pub async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), ChatStoreError> {
        self.api.delete_conversation(conversation_id).await?;

        let mut state = self.lock();
        state
            .conversations
            .retain(|conversation| conversation.id != conversation_id);
        state.caches.remove(&conversation_id);
        if state.current == Some(conversation_id) {
            state.current = None;
        }
        Ok(())
    }

    /// Shows this identity as typing locally at once and notifies the server
    /// on a best-effort basis.
    pub async fn set_typing(&self, conversation_id: ConversationId, is_typing: bool) {
        self.typing
            .set_typing(conversation_id, self.identity, is_typing);

        if let Err(error) = self.api.send_typing(conversation_id, is_typing).await {
            tracing::debug!(
                code = CHAT_TYPING_SYNC_FAILED,
                conversation_id,
                error = %error,
                "typing signal not delivered"
            );
        }
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.lock().conversations.clone()
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.lock()
            .conversations
            .iter()
            .find(|conversation| conversation.id == conversation_id)
            .cloned()
    }

    pub fn current_conversation(&self) -> Option<ConversationId> {
        self.lock().current
    }

    /// Cached history of a conversation, oldest first.
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.lock()
            .caches
            .get(&conversation_id)
            .map(|cache| cache.messages().to_vec())
            .unwrap_or_default()
    }

    /// Messages cached across every conversation.
    pub fn cached_message_count(&self) -> usize {
        self.lock().caches.values().map(MessageCache::len).sum()
    }

    pub fn has_more(&self, conversation_id: ConversationId) -> bool {
        self.lock()
            .caches
            .get(&conversation_id)
            .is_some_and(MessageCache::has_more)
    }

    pub fn mutation_state(&self, message_id: MessageId) -> Option<MutationState> {
        self.lock().mutations.state(message_id).cloned()
    }

    /// Other participants known to have read a message.
    pub fn read_by(&self, message_id: MessageId) -> Vec<UserId> {
        self.lock()
            .read_by
            .get(&message_id)
            .map(|readers| readers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn total_unread(&self) -> u32 {
        self.lock()
            .conversations
            .iter()
            .filter(|conversation| !conversation.is_muted)
            .map(|conversation| conversation.unread_count)
            .sum()
    }

    pub fn typing_users(&self, conversation_id: ConversationId) -> Vec<TypingUser> {
        self.typing.typing_users(conversation_id)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    async fn load_initial_page(&self, conversation_id: ConversationId) -> Result<(), LoadMessagesError> {
        let needs_page = self
            .lock()
            .caches
            .get(&conversation_id)
            .map_or(true, MessageCache::needs_initial_page);
        if !needs_page {
            return Ok(());
        }
        let Some(_pending) = self.begin_page(conversation_id) else {
            return Ok(());
        };

        let query = LoadMessagesQuery::new(conversation_id).with_limit(self.page_size);
        let page = load_messages(self.api.as_ref(), query)
            .await
            .map_err(|error| log_page_error(conversation_id, error))?;

        self.lock()
            .caches
            .entry(conversation_id)
            .or_default()
            .apply_page(page);
        Ok(())
    }

    fn begin_page(&self, conversation_id: ConversationId) -> Option<PendingPage> {
        self.lock()
            .pending_pages
            .insert(conversation_id)
            .then(|| PendingPage {
                state: Arc::clone(&self.state),
                conversation_id,
            })
    }

    fn begin_mutation(&self, message_id: MessageId, kind: MutationKind) -> Result<(), ChatStoreError> {
        let mut state = self.lock();
        let conversation_id = state
            .conversation_of(message_id)
            .ok_or(ChatStoreError::MessageNotCached(message_id))?;
        let is_deleted = state
            .caches
            .get(&conversation_id)
            .and_then(|cache| cache.get(message_id))
            .is_some_and(|message| message.is_deleted);
        if is_deleted {
            return Err(ChatStoreError::MessageDeleted(message_id));
        }

        if !state.mutations.begin(message_id, kind) {
            return Err(ChatStoreError::MutationPending(message_id));
        }
        Ok(())
    }

    fn fail_mutation(&self, message_id: MessageId, error: ApiError) -> ChatStoreError {
        self.lock().mutations.fail(message_id, error.to_string());
        tracing::warn!(
            code = CHAT_MUTATION_FAILED,
            message_id,
            error = %error,
            "message change rejected; cached message left unchanged"
        );
        ChatStoreError::Api(error)
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        lock_state(&self.state)
    }
}

fn log_page_error(conversation_id: ConversationId, error: LoadMessagesError) -> LoadMessagesError {
    tracing::warn!(
        code = CHAT_PAGE_LOAD_FAILED,
        conversation_id,
        error = ?error,
        "message page could not be loaded"
    );
    error
}
