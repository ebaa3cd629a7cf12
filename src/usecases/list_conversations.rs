use crate::domain::conversation::{sort_by_activity, Conversation};

use super::contracts::{ApiError, ChatApi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListConversationsError {
    Unauthorized,
    TemporarilyUnavailable,
    DataContractViolation,
}

/// Fetches every conversation of the caller, most recently active first.
pub async fn list_conversations(
    source: &dyn ChatApi,
) -> Result<Vec<Conversation>, ListConversationsError> {
    let mut conversations = source
        .list_conversations()
        .await
        .map_err(map_source_error)?;

    sort_by_activity(&mut conversations);
    Ok(conversations)
}

fn map_source_error(error: ApiError) -> ListConversationsError {
    match error {
        ApiError::Unauthorized => ListConversationsError::Unauthorized,
        ApiError::Unavailable(_) | ApiError::NotFound => {
            ListConversationsError::TemporarilyUnavailable
        }
        ApiError::InvalidData(_) | ApiError::Rejected(_) => {
            ListConversationsError::DataContractViolation
        }
    }
}
