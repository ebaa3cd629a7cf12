use std::time::{SystemTime, UNIX_EPOCH};

use super::{connection::ConnectionStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    pub code: String,
    pub at_unix_ms: u128,
}

/// Observable view of a session's push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub identity: UserId,
    pub status: ConnectionStatus,
    pub attempts: u32,
    /// Set once the retry budget is spent; cleared by a manual reconnect.
    pub manual_reconnect_required: bool,
    pub updated_at_unix_ms: u128,
    pub last_error: Option<StatusError>,
}

impl ConnectionSnapshot {
    pub fn new(identity: UserId) -> Self {
        Self {
            identity,
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            manual_reconnect_required: false,
            updated_at_unix_ms: now_unix_ms(),
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

pub fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
