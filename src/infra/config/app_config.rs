use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{connection::ReconnectPolicy, UserId},
    infra::secrets::mask_token,
    realtime::connection_manager::ConnectionSettings,
    session::SessionSettings,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub stream: StreamConfig,
    pub api: ApiConfig,
    pub chat: ChatConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn session_settings(&self, identity: UserId) -> SessionSettings {
        SessionSettings {
            identity,
            page_size: self.chat.page_size,
            typing_ttl: Duration::from_millis(self.chat.typing_ttl_ms),
            presence_refresh: Duration::from_millis(self.chat.presence_refresh_ms),
            connection: self.stream.connection_settings(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamConfig {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub base_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/api/sse".to_owned(),
            connect_timeout_ms: 5_000,
            base_delay_ms: 1_000,
            max_attempts: 5,
        }
    }
}

impl StreamConfig {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            policy: ReconnectPolicy {
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_attempts: self.max_attempts,
            },
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_owned(),
            auth_token: None,
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_deref().map(mask_token))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatConfig {
    pub page_size: usize,
    pub typing_ttl_ms: u64,
    pub presence_refresh_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            page_size: crate::domain::pagination::DEFAULT_PAGE_SIZE,
            typing_ttl_ms: 3_000,
            presence_refresh_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionConfig {
    pub identity: Option<UserId>,
}
