use crate::domain::{
    pagination::{normalized_page_size, MessagePage, PageRequest, DEFAULT_PAGE_SIZE},
    ConversationId, MessageId,
};

use super::contracts::{ApiError, ChatApi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMessagesQuery {
    pub conversation_id: ConversationId,
    pub limit: usize,
    /// Keyset cursor: only messages with a smaller id are returned.
    pub before: Option<MessageId>,
}

impl LoadMessagesQuery {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            limit: DEFAULT_PAGE_SIZE,
            before: None,
        }
    }

    pub fn older_than(conversation_id: ConversationId, cursor: MessageId) -> Self {
        Self {
            before: Some(cursor),
            ..Self::new(conversation_id)
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn page_request(&self) -> PageRequest {
        PageRequest {
            per_page: normalized_page_size(self.limit),
            before: self.before,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMessagesError {
    Unauthorized,
    TemporarilyUnavailable,
    DataContractViolation,
    ConversationNotFound,
}

pub async fn load_messages(
    source: &dyn ChatApi,
    query: LoadMessagesQuery,
) -> Result<MessagePage, LoadMessagesError> {
    let mut page = source
        .list_messages(query.conversation_id, query.page_request())
        .await
        .map_err(map_source_error)?;

    if page
        .messages
        .iter()
        .any(|message| message.conversation_id != query.conversation_id)
    {
        return Err(LoadMessagesError::DataContractViolation);
    }

    page.messages.sort_by_key(|message| message.created_at);
    Ok(page)
}

fn map_source_error(error: ApiError) -> LoadMessagesError {
    match error {
        ApiError::Unauthorized => LoadMessagesError::Unauthorized,
        ApiError::NotFound => LoadMessagesError::ConversationNotFound,
        ApiError::Unavailable(_) => LoadMessagesError::TemporarilyUnavailable,
        ApiError::InvalidData(_) | ApiError::Rejected(_) => {
            LoadMessagesError::DataContractViolation
        }
    }
}
