use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use tokio::{task::AbortHandle, time::Instant};

use crate::domain::{ConversationId, UserId};

pub const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: UserId,
    pub name: Option<String>,
}

/// Who is typing where. Entries expire on their own after the TTL unless
/// refreshed; each entry has its own timer.
#[derive(Debug, Clone)]
pub struct TypingRegistry {
    inner: Arc<Mutex<TypingState>>,
    ttl: Duration,
}

#[derive(Debug, Default)]
struct TypingState {
    conversations: HashMap<ConversationId, HashMap<UserId, TypingEntry>>,
    next_generation: u64,
}

#[derive(Debug)]
struct TypingEntry {
    name: Option<String>,
    generation: u64,
    timer: AbortHandle,
}

impl Default for TypingRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TTL)
    }
}

impl TypingRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TypingState::default())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Starts or refreshes (`true`) or clears (`false`) a typing entry.
    /// Must be called within a tokio runtime.
    pub fn set_typing(&self, conversation_id: ConversationId, user_id: UserId, is_typing: bool) {
        self.set_typing_named(conversation_id, user_id, None, is_typing);
    }

    pub fn set_typing_named(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        name: Option<String>,
        is_typing: bool,
    ) {
        if is_typing {
            self.start(conversation_id, user_id, name);
        } else {
            self.stop(conversation_id, user_id);
        }
    }

    pub fn typing_users(&self, conversation_id: ConversationId) -> Vec<TypingUser> {
        let state = self.lock();
        let mut users: Vec<_> = state
            .conversations
            .get(&conversation_id)
            .into_iter()
            .flat_map(|entries| entries.iter())
            .map(|(user_id, entry)| TypingUser {
                user_id: *user_id,
                name: entry.name.clone(),
            })
            .collect();
        users.sort_by_key(|user| user.user_id);
        users
    }

    pub fn is_typing(&self, conversation_id: ConversationId, user_id: UserId) -> bool {
        self.lock()
            .conversations
            .get(&conversation_id)
            .is_some_and(|entries| entries.contains_key(&user_id))
    }

    /// Drops every entry and cancels all timers.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn start(&self, conversation_id: ConversationId, user_id: UserId, name: Option<String>) {
        let deadline = Instant::now() + self.ttl;
        let weak = Arc::downgrade(&self.inner);
        let mut state = self.lock();
        state.next_generation += 1;
        let generation = state.next_generation;

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            expire(&weak, conversation_id, user_id, generation);
        })
        .abort_handle();

        let entries = state.conversations.entry(conversation_id).or_default();
        let name = name.or_else(|| {
            entries
                .get(&user_id)
                .and_then(|previous| previous.name.clone())
        });
        let previous = entries.insert(
            user_id,
            TypingEntry {
                name,
                generation,
                timer,
            },
        );
        if let Some(previous) = previous {
            previous.timer.abort();
        }
    }

    fn stop(&self, conversation_id: ConversationId, user_id: UserId) {
        let mut state = self.lock();
        let Some(entries) = state.conversations.get_mut(&conversation_id) else {
            return;
        };

        if let Some(entry) = entries.remove(&user_id) {
            entry.timer.abort();
        }
        if entries.is_empty() {
            state.conversations.remove(&conversation_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, TypingState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TypingState {
    fn clear(&mut self) {
        for entry in self
            .conversations
            .drain()
            .flat_map(|(_, entries)| entries.into_values())
        {
            entry.timer.abort();
        }
    }
}

impl Drop for TypingState {
    fn drop(&mut self) {
        self.clear();
    }
}

fn expire(
    inner: &Weak<Mutex<TypingState>>,
    conversation_id: ConversationId,
    user_id: UserId,
    generation: u64,
) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut state = inner
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let Some(entries) = state.conversations.get_mut(&conversation_id) else {
        return;
    };

    if entries
        .get(&user_id)
        .is_some_and(|entry| entry.generation == generation)
    {
        entries.remove(&user_id);
        tracing::trace!(conversation_id, user_id, "typing indicator expired");
    }
    if entries.is_empty() {
        state.conversations.remove(&conversation_id);
    }
}
