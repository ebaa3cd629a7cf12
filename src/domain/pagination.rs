use serde::{Deserialize, Serialize};

use super::{message::Message, MessageId};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// Keyset page request: up to `per_page` messages with id below `before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub per_page: usize,
    pub before: Option<MessageId>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::latest(DEFAULT_PAGE_SIZE)
    }
}

impl PageRequest {
    pub fn latest(per_page: usize) -> Self {
        Self {
            per_page: normalized_page_size(per_page),
            before: None,
        }
    }

    pub fn before(per_page: usize, cursor: MessageId) -> Self {
        Self {
            per_page: normalized_page_size(per_page),
            before: Some(cursor),
        }
    }
}

pub fn normalized_page_size(per_page: usize) -> usize {
    match per_page {
        0 => DEFAULT_PAGE_SIZE,
        size => size.min(MAX_PAGE_SIZE),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<MessageId>,
}

/// One page of history, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub pagination: PageInfo,
}

impl MessagePage {
    pub fn has_more(&self) -> bool {
        self.pagination.has_more
    }

    pub fn next_cursor(&self) -> Option<MessageId> {
        self.pagination.next_cursor
    }
}

/// Builds a page from rows fetched newest first with `LIMIT per_page`.
///
/// A full page means more rows may exist; the cursor is the oldest row's id.
pub fn keyset_page(mut newest_first: Vec<Message>, per_page: usize) -> MessagePage {
    let has_more = newest_first.len() == per_page && per_page > 0;
    let next_cursor = newest_first.last().map(|message| message.id);
    newest_first.reverse();

    MessagePage {
        messages: newest_first,
        pagination: PageInfo {
            has_more,
            next_cursor,
        },
    }
}
