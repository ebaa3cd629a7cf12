use std::time::Duration;

use chrono::{DateTime, Utc};

use super::UserId;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Disconnected => "CONNECTION_DISCONNECTED",
            Self::Connecting => "CONNECTION_CONNECTING",
            Self::Connected => "CONNECTION_CONNECTED",
            Self::Error => "CONNECTION_ERROR",
        }
    }
}

/// Exponential backoff: the n-th retry (0-based) waits `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    RetryAfter(Duration),
    /// Retry budget spent; only an explicit reconnect starts over.
    Exhausted,
}

/// Push-stream connection state for one identity.
///
/// At most one connection exists per identity within a session; a
/// reconnect replaces it with a successor that inherits the retry counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub identity: UserId,
    pub status: ConnectionStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(identity: UserId) -> Self {
        Self {
            identity,
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    pub fn successor(&self) -> Self {
        Self {
            identity: self.identity,
            status: ConnectionStatus::Connecting,
            attempts: self.attempts,
            created_at: Utc::now(),
        }
    }

    pub fn begin_connect(&mut self) {
        self.status = ConnectionStatus::Connecting;
    }

    pub fn on_open(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.attempts = 0;
    }

    pub fn on_closed(&mut self) {
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// Records a transport failure and decides whether to retry.
    pub fn on_transport_error(&mut self, policy: &ReconnectPolicy) -> ReconnectDecision {
        let delay = policy.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        if self.attempts >= policy.max_attempts {
            self.status = ConnectionStatus::Disconnected;
            return ReconnectDecision::Exhausted;
        }

        self.status = ConnectionStatus::Error;
        ReconnectDecision::RetryAfter(delay)
    }

    pub fn is_exhausted(&self, policy: &ReconnectPolicy) -> bool {
        self.attempts >= policy.max_attempts
    }
}
