//! Domain layer: core entities and business rules.

pub mod connection;
pub mod conversation;
pub mod envelope;
pub mod message;
pub mod message_cache;
pub mod mutation;
pub mod notification;
pub mod notification_list;
pub mod pagination;
pub mod status;
pub mod timestamp;

pub type UserId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;

/// Returns the domain module name for smoke checks.
pub fn module_name() -> &'static str {
    "domain"
}
