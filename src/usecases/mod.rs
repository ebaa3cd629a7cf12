//! Use case layer: client stores and the REST workflows behind them.

pub mod bootstrap;
pub mod chat_store;
pub mod context;
pub mod contracts;
pub mod list_conversations;
pub mod load_messages;
pub mod loading;
pub mod notification_store;
pub mod send_message;

/// Returns the usecases module name for smoke checks.
pub fn module_name() -> &'static str {
    "usecases"
}
