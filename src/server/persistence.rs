//! Chat persistence with server-side fan-out.
//!
//! Every operation runs as a calling identity. Conversations the caller does
//! not participate in are reported as [`ServiceError::NotFound`], exactly like
//! missing ones. Pushes are sent after the state lock is released.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{
    conversation::{
        sort_by_activity, validate_shape, Conversation, ConversationKind, ConversationShapeError,
        LastMessagePreview, NewConversation,
    },
    envelope::{
        ChatMessagePayload, ConversationCreatedPayload, EventEnvelope, EventKind,
        MessageDeletedPayload, MessageEditedPayload, PresencePayload, ReadReceiptPayload,
        TypingPayload,
    },
    message::{Message, MessageDraft, UserSummary},
    pagination::{keyset_page, normalized_page_size, MessagePage, PageRequest},
    ConversationId, MessageId, UserId,
};

use super::hub::{Broadcaster, PresenceSink};

const SERVICE_PUSH_ENCODE_FAILED: &str = "SERVICE_PUSH_ENCODE_FAILED";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("not found")]
    NotFound,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("only the sender may change message {0}")]
    NotSender(MessageId),
    #[error("message {0} was deleted")]
    MessageDeleted(MessageId),
    #[error(transparent)]
    InvalidConversation(#[from] ConversationShapeError),
}

pub struct MessageService {
    state: Mutex<ServiceState>,
    broadcaster: Arc<dyn Broadcaster>,
}

#[derive(Debug, Default)]
struct ServiceState {
    users: HashMap<UserId, UserSummary>,
    conversations: BTreeMap<ConversationId, StoredConversation>,
    messages: BTreeMap<MessageId, Message>,
    reads: HashSet<(MessageId, UserId)>,
    online: BTreeSet<UserId>,
    next_conversation_id: ConversationId,
    next_message_id: MessageId,
}

#[derive(Debug, Clone)]
struct StoredConversation {
    id: ConversationId,
    kind: ConversationKind,
    name: Option<String>,
    /// Participant id to muted flag.
    participants: BTreeMap<UserId, bool>,
    last_message_at: Option<DateTime<Utc>>,
}

/// A push computed under the lock and sent after it is released.
struct Push {
    targets: Vec<UserId>,
    envelope: Option<EventEnvelope>,
}

impl ServiceState {
    fn conversation_for(
        &self,
        caller: UserId,
        id: ConversationId,
    ) -> Result<&StoredConversation, ServiceError> {
        self.conversations
            .get(&id)
            .filter(|conversation| conversation.participants.contains_key(&caller))
            .ok_or(ServiceError::NotFound)
    }

    fn message_for(&self, caller: UserId, id: MessageId) -> Result<&Message, ServiceError> {
        let message = self.messages.get(&id).ok_or(ServiceError::NotFound)?;
        self.conversation_for(caller, message.conversation_id)?;
        Ok(message)
    }

    fn user(&self, id: UserId) -> UserSummary {
        self.users.get(&id).cloned().unwrap_or(UserSummary {
            id,
            name: None,
            email: None,
            avatar: None,
        })
    }

    fn message_view(&self, viewer: UserId, message: &Message) -> Message {
        let mut view = message.clone();
        view.is_read = self.reads.contains(&(message.id, viewer));
        view
    }

    fn conversation_view(&self, viewer: UserId, stored: &StoredConversation) -> Conversation {
        let in_conversation = move || {
            self.messages
                .values()
                .filter(move |message| message.conversation_id == stored.id)
        };
        let last_message = in_conversation()
            .filter(|message| !message.is_deleted)
            .max_by_key(|message| (message.created_at, message.id))
            .map(|message| LastMessagePreview {
                id: message.id,
                content: message.preview(),
                created_at: message.created_at,
                sender_id: message.sender_id,
            });
        let unread_count = in_conversation()
            .filter(|message| {
                message.sender_id != viewer
                    && !message.is_deleted
                    && !self.reads.contains(&(message.id, viewer))
            })
            .count();

        Conversation {
            id: stored.id,
            kind: stored.kind,
            name: stored.name.clone(),
            participants: stored.participants.keys().map(|id| self.user(*id)).collect(),
            last_message_at: stored.last_message_at,
            last_message,
            unread_count: u32::try_from(unread_count).unwrap_or(u32::MAX),
            is_muted: stored.participants.get(&viewer).copied().unwrap_or(false),
        }
    }

    fn existing_direct(&self, participants: &BTreeSet<UserId>) -> Option<&StoredConversation> {
        self.conversations.values().find(|conversation| {
            conversation.kind == ConversationKind::Direct
                && conversation.participants.keys().eq(participants.iter())
        })
    }
}

impl StoredConversation {
    fn participant_ids(&self) -> Vec<UserId> {
        self.participants.keys().copied().collect()
    }
}

impl MessageService {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            state: Mutex::new(ServiceState {
                next_conversation_id: 1,
                next_message_id: 1,
                ..ServiceState::default()
            }),
            broadcaster,
        }
    }

    /// Registers or updates the public profile of a user.
    pub fn register_user(&self, user: UserSummary) {
        self.lock().users.insert(user.id, user);
    }

    /// Creates a conversation with the caller as a participant. A direct
    /// conversation between the same two identities is reused.
    pub fn create_conversation(
        &self,
        caller: UserId,
        request: &NewConversation,
    ) -> Result<Conversation, ServiceError> {
        let participants = request.participants_with(caller);
        validate_shape(request.kind, &participants, request.name.as_deref())?;

        let (conversation, push) = {
            let mut state = self.lock();
            if let Some(unknown) = participants.iter().find(|id| !state.users.contains_key(*id)) {
                return Err(ServiceError::InvalidRequest(format!(
                    "unknown participant {unknown}"
                )));
            }

            if request.kind == ConversationKind::Direct {
                if let Some(existing) = state.existing_direct(&participants) {
                    return Ok(state.conversation_view(caller, existing));
                }
            }

            let id = state.next_conversation_id;
            state.next_conversation_id += 1;
            let stored = StoredConversation {
                id,
                kind: request.kind,
                name: match request.kind {
                    ConversationKind::Group => request.name.as_deref().map(str::trim).map(str::to_owned),
                    ConversationKind::Direct => None,
                },
                participants: participants.iter().map(|id| (*id, false)).collect(),
                last_message_at: None,
            };
            let conversation = state.conversation_view(caller, &stored);
            let push = build_push(
                stored.participant_ids(),
                EventKind::ConversationCreated,
                &ConversationCreatedPayload { conversation_id: id },
            );
            state.conversations.insert(id, stored);
            (conversation, push)
        };

        self.publish(push);
        Ok(conversation)
    }

    /// Conversations of the caller, most recently active first.
    pub fn list_conversations(&self, caller: UserId) -> Vec<Conversation> {
        let state = self.lock();
        let mut conversations: Vec<_> = state
            .conversations
            .values()
            .filter(|conversation| conversation.participants.contains_key(&caller))
            .map(|conversation| state.conversation_view(caller, conversation))
            .collect();
        sort_by_activity(&mut conversations);
        conversations
    }

    pub fn get_conversation(
        &self,
        caller: UserId,
        id: ConversationId,
    ) -> Result<Conversation, ServiceError> {
        let state = self.lock();
        let stored = state.conversation_for(caller, id)?;
        Ok(state.conversation_view(caller, stored))
    }

    /// Keyset page: up to `per_page` messages with id below the cursor,
    /// returned oldest first.
    pub fn list_messages(
        &self,
        caller: UserId,
        id: ConversationId,
        page: PageRequest,
    ) -> Result<MessagePage, ServiceError> {
        let state = self.lock();
        state.conversation_for(caller, id)?;
        let per_page = normalized_page_size(page.per_page);

        let newest_first: Vec<_> = state
            .messages
            .values()
            .rev()
            .filter(|message| message.conversation_id == id)
            .filter(|message| page.before.map_or(true, |cursor| message.id < cursor))
            .take(per_page)
            .map(|message| state.message_view(caller, message))
            .collect();
        Ok(keyset_page(newest_first, per_page))
    }

    /// Stores a message and pushes `chat:message` to every participant,
    /// the sender's other streams included.
    pub fn send_message(
        &self,
        caller: UserId,
        id: ConversationId,
        draft: &MessageDraft,
    ) -> Result<Message, ServiceError> {
        if !draft.is_sendable() {
            return Err(ServiceError::InvalidRequest(
                "message content is required".to_owned(),
            ));
        }

        let (message, push) = {
            let mut state = self.lock();
            let targets = state.conversation_for(caller, id)?.participant_ids();
            if let Some(reply_to) = draft.reply_to_id {
                let same_conversation = state
                    .messages
                    .get(&reply_to)
                    .is_some_and(|target| target.conversation_id == id);
                if !same_conversation {
                    return Err(ServiceError::InvalidRequest(format!(
                        "reply target {reply_to} is not in conversation {id}"
                    )));
                }
            }

            let now = Utc::now();
            let message_id = state.next_message_id;
            state.next_message_id += 1;
            let message = Message {
                id: message_id,
                conversation_id: id,
                sender_id: caller,
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
                sender: Some(state.user(caller)),
                is_read: false,
            };
            state.messages.insert(message_id, message.clone());
            if let Some(conversation) = state.conversations.get_mut(&id) {
                conversation.last_message_at = Some(now);
            }

            let push = build_push(
                targets,
                EventKind::ChatMessage,
                &ChatMessagePayload {
                    message: message.clone(),
                    conversation_id: id,
                },
            );
            (message, push)
        };

        self.publish(push);
        Ok(message)
    }

    pub fn edit_message(
        &self,
        caller: UserId,
        message_id: MessageId,
        content: &str,
    ) -> Result<Message, ServiceError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "message content is required".to_owned(),
            ));
        }

        let (edited, push) = {
            let mut state = self.lock();
            let targets = self.owned_message(&state, caller, message_id)?;
            let Some(message) = state.messages.get_mut(&message_id) else {
                return Err(ServiceError::NotFound);
            };
            message.apply_edit(content, Utc::now());
            let edited = message.clone();

            let push = build_push(
                targets,
                EventKind::ChatMessageEdited,
                &MessageEditedPayload {
                    conversation_id: edited.conversation_id,
                    message_id,
                    content: edited.content.clone(),
                    updated_at: edited.updated_at,
                },
            );
            (state.message_view(caller, &edited), push)
        };

        self.publish(push);
        Ok(edited)
    }

    /// Turns a message into a tombstone. Deleting twice returns the first
    /// deletion time.
    pub fn delete_message(
        &self,
        caller: UserId,
        message_id: MessageId,
    ) -> Result<DateTime<Utc>, ServiceError> {
        let (deleted_at, push) = {
            let mut state = self.lock();
            let message = state.message_for(caller, message_id)?;
            if message.sender_id != caller {
                return Err(ServiceError::NotSender(message_id));
            }
            if let Some(deleted_at) = message.deleted_at.filter(|_| message.is_deleted) {
                return Ok(deleted_at);
            }

            let conversation_id = message.conversation_id;
            let targets = state.conversation_for(caller, conversation_id)?.participant_ids();
            let deleted_at = Utc::now();
            if let Some(message) = state.messages.get_mut(&message_id) {
                message.apply_delete(deleted_at);
            }

            let push = build_push(
                targets,
                EventKind::ChatMessageDeleted,
                &MessageDeletedPayload {
                    conversation_id,
                    message_id,
                    deleted_at,
                },
            );
            (deleted_at, push)
        };

        self.publish(push);
        Ok(deleted_at)
    }

    pub fn mark_message_read(&self, caller: UserId, message_id: MessageId) -> Result<(), ServiceError> {
        let pushes = {
            let mut state = self.lock();
            let message = state.message_for(caller, message_id)?;
            let conversation_id = message.conversation_id;
            let targets = state.conversation_for(caller, conversation_id)?.participant_ids();
            read_receipts(&mut state, caller, conversation_id, &targets, [message_id])
        };

        for push in pushes {
            self.publish(push);
        }
        Ok(())
    }

    /// Marks every message from other participants as read by the caller.
    pub fn mark_conversation_read(
        &self,
        caller: UserId,
        id: ConversationId,
    ) -> Result<(), ServiceError> {
        let pushes = {
            let mut state = self.lock();
            let targets = state.conversation_for(caller, id)?.participant_ids();
            let unread: Vec<_> = state
                .messages
                .values()
                .filter(|message| message.conversation_id == id && message.sender_id != caller)
                .map(|message| message.id)
                .collect();
            read_receipts(&mut state, caller, id, &targets, unread)
        };

        for push in pushes {
            self.publish(push);
        }
        Ok(())
    }

    /// Relays a typing signal to the other participants.
    pub fn send_typing(
        &self,
        caller: UserId,
        id: ConversationId,
        is_typing: bool,
    ) -> Result<(), ServiceError> {
        let push = {
            let state = self.lock();
            let targets: Vec<_> = state
                .conversation_for(caller, id)?
                .participant_ids()
                .into_iter()
                .filter(|participant| *participant != caller)
                .collect();
            build_push(
                targets,
                EventKind::ChatTyping,
                &TypingPayload {
                    conversation_id: id,
                    user_id: caller,
                    user_name: state.user(caller).name,
                    is_typing,
                },
            )
        };

        self.publish(push);
        Ok(())
    }

    pub fn mute_conversation(
        &self,
        caller: UserId,
        id: ConversationId,
        muted: bool,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.conversation_for(caller, id)?;
        if let Some(flag) = state
            .conversations
            .get_mut(&id)
            .and_then(|conversation| conversation.participants.get_mut(&caller))
        {
            *flag = muted;
        }
        Ok(())
    }

    /// Removes the caller from a conversation. The last participant leaving
    /// drops the conversation and its history.
    pub fn leave_conversation(&self, caller: UserId, id: ConversationId) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.conversation_for(caller, id)?;

        let now_empty = match state.conversations.get_mut(&id) {
            Some(conversation) => {
                conversation.participants.remove(&caller);
                conversation.participants.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.conversations.remove(&id);
            let dropped: HashSet<MessageId> = state
                .messages
                .values()
                .filter(|message| message.conversation_id == id)
                .map(|message| message.id)
                .collect();
            state.messages.retain(|message_id, _| !dropped.contains(message_id));
            state.reads.retain(|(message_id, _)| !dropped.contains(message_id));
        }
        Ok(())
    }

    /// Tells everyone sharing a conversation with `user` that it came online
    /// or went offline. Returns the number of streams reached.
    pub fn announce_presence(&self, user: UserId, online: bool) -> usize {
        let push = {
            let mut state = self.lock();
            if online {
                state.online.insert(user);
            } else {
                state.online.remove(&user);
            }
            let targets: BTreeSet<UserId> = state
                .conversations
                .values()
                .filter(|conversation| conversation.participants.contains_key(&user))
                .flat_map(|conversation| conversation.participants.keys().copied())
                .filter(|participant| *participant != user)
                .collect();
            let kind = if online {
                EventKind::UserOnline
            } else {
                EventKind::UserOffline
            };
            build_push(targets.into_iter().collect(), kind, &PresencePayload { user_id: user })
        };

        self.publish(push)
    }

    /// Identities with at least one live push stream, ascending.
    pub fn online_users(&self) -> Vec<UserId> {
        self.lock().online.iter().copied().collect()
    }

    fn owned_message(
        &self,
        state: &ServiceState,
        caller: UserId,
        message_id: MessageId,
    ) -> Result<Vec<UserId>, ServiceError> {
        let message = state.message_for(caller, message_id)?;
        if message.sender_id != caller {
            return Err(ServiceError::NotSender(message_id));
        }
        if message.is_deleted {
            return Err(ServiceError::MessageDeleted(message_id));
        }
        Ok(state
            .conversation_for(caller, message.conversation_id)?
            .participant_ids())
    }

    fn publish(&self, push: Push) -> usize {
        match push.envelope {
            Some(envelope) => self.broadcaster.broadcast(&push.targets, &envelope),
            None => 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PresenceSink for MessageService {
    fn presence_changed(&self, identity: UserId, online: bool) {
        self.announce_presence(identity, online);
    }
}

fn read_receipts(
    state: &mut ServiceState,
    reader: UserId,
    conversation_id: ConversationId,
    targets: &[UserId],
    message_ids: impl IntoIterator<Item = MessageId>,
) -> Vec<Push> {
    message_ids
        .into_iter()
        .filter(|message_id| state.reads.insert((*message_id, reader)))
        .map(|message_id| {
            build_push(
                targets.to_vec(),
                EventKind::ChatReadReceipt,
                &ReadReceiptPayload {
                    conversation_id,
                    message_id,
                    user_id: reader,
                },
            )
        })
        .collect()
}

fn build_push(targets: Vec<UserId>, kind: EventKind, payload: &impl Serialize) -> Push {
    let envelope = EventEnvelope::new(kind, payload, None)
        .inspect_err(|error| {
            tracing::error!(
                code = SERVICE_PUSH_ENCODE_FAILED,
                event_type = kind.as_wire(),
                error = %error,
                "failed to encode push payload; push skipped"
            );
        })
        .ok();
    Push { targets, envelope }
}
