use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::{message::Message, pagination::MessagePage, MessageId, UserId};

/// Outcome of offering a message to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Added,
    /// Same id already cached; the cached copy was refreshed from a newer one.
    Updated,
    Duplicate,
}

/// Cached history of one conversation, ordered by creation time.
///
/// Message ids are unique within the cache. Deleted messages stay in place as
/// tombstones and are never brought back by a stale copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageCache {
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    has_more: bool,
    next_cursor: Option<MessageId>,
    pages_loaded: usize,
}

impl MessageCache {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.seen.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn pages_loaded(&self) -> usize {
        self.pages_loaded
    }

    pub fn needs_initial_page(&self) -> bool {
        self.pages_loaded == 0
    }

    /// Cursor for the next older page, if the server reported more history.
    pub fn next_page_cursor(&self) -> Option<MessageId> {
        if !self.has_more {
            return None;
        }

        self.next_cursor
            .or_else(|| self.messages.iter().map(|message| message.id).min())
    }

    pub fn insert(&mut self, message: Message) -> Insert {
        if self.seen.contains(&message.id) {
            return self.reconcile(message);
        }

        let index = self
            .messages
            .partition_point(|cached| cached.created_at <= message.created_at);
        self.seen.insert(message.id);
        self.messages.insert(index, message);
        Insert::Added
    }

    /// Live delivery path; identical to [`insert`](Self::insert).
    pub fn apply_live(&mut self, message: Message) -> Insert {
        self.insert(message)
    }

    /// Merges one REST page and records its cursor.
    pub fn apply_page(&mut self, page: MessagePage) -> usize {
        let MessagePage {
            messages,
            pagination,
        } = page;

        let mut added = 0;
        for message in messages {
            if self.insert(message) == Insert::Added {
                added += 1;
            }
        }

        self.has_more = pagination.has_more;
        if let Some(cursor) = pagination.next_cursor {
            self.next_cursor = Some(
                self.next_cursor
                    .map_or(cursor, |current| current.min(cursor)),
            );
        }
        self.pages_loaded += 1;
        added
    }

    /// Merges the newest page fetched after a stream gap. Older-page cursor
    /// state is kept unless the page cannot be joined to the cached history:
    /// a full page newer than everything cached replaces the cache.
    pub fn merge_latest(&mut self, page: MessagePage) -> usize {
        if self.pages_loaded == 0 {
            return self.apply_page(page);
        }

        let joinable = !page.pagination.has_more
            || page.messages.iter().any(|message| self.contains(message.id))
            || match (page.messages.first(), self.latest()) {
                (Some(oldest), Some(latest)) => oldest.created_at <= latest.created_at,
                _ => true,
            };
        if !joinable {
            *self = Self::default();
            return self.apply_page(page);
        }

        let mut added = 0;
        for message in page.messages {
            if self.insert(message) == Insert::Added {
                added += 1;
            }
        }
        added
    }

    pub fn edit(&mut self, id: MessageId, content: &str, at: DateTime<Utc>) -> Option<&Message> {
        let message = self.messages.iter_mut().find(|message| message.id == id)?;
        message.apply_edit(content, at);
        Some(message)
    }

    pub fn delete(&mut self, id: MessageId, at: DateTime<Utc>) -> Option<&Message> {
        let message = self.messages.iter_mut().find(|message| message.id == id)?;
        message.apply_delete(at);
        Some(message)
    }

    pub fn mark_read(&mut self, id: MessageId) -> bool {
        match self.messages.iter_mut().find(|message| message.id == id) {
            Some(message) if !message.is_read => {
                message.is_read = true;
                true
            }
            _ => false,
        }
    }

    /// Marks every message not sent by `reader` as read.
    pub fn mark_all_read(&mut self, reader: UserId) -> usize {
        let mut changed = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|message| message.sender_id != reader && !message.is_read)
        {
            message.is_read = true;
            changed += 1;
        }
        changed
    }

    pub fn latest(&self) -> Option<&Message> {
        self.messages.last()
    }

    fn reconcile(&mut self, incoming: Message) -> Insert {
        let Some(cached) = self
            .messages
            .iter_mut()
            .find(|message| message.id == incoming.id)
        else {
            return Insert::Duplicate;
        };

        if cached.is_deleted {
            return Insert::Duplicate;
        }

        if incoming.is_deleted || incoming.updated_at > cached.updated_at {
            let is_read = cached.is_read || incoming.is_read;
            *cached = incoming;
            cached.is_read = is_read;
            return Insert::Updated;
        }

        Insert::Duplicate
    }
}
