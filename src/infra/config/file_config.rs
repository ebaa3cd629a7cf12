use serde::Deserialize;

use crate::{
    domain::UserId,
    infra::config::{ApiConfig, AppConfig, ChatConfig, LogConfig, SessionConfig, StreamConfig},
};

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub logging: Option<FileLogConfig>,
    pub stream: Option<FileStreamConfig>,
    pub api: Option<FileApiConfig>,
    pub chat: Option<FileChatConfig>,
    pub session: Option<FileSessionConfig>,
}

impl FileConfig {
    pub fn merge_into(self, config: &mut AppConfig) {
        if let Some(logging) = self.logging {
            logging.merge_into(&mut config.logging);
        }

        if let Some(stream) = self.stream {
            stream.merge_into(&mut config.stream);
        }

        if let Some(api) = self.api {
            api.merge_into(&mut config.api);
        }

        if let Some(chat) = self.chat {
            chat.merge_into(&mut config.chat);
        }

        if let Some(session) = self.session {
            session.merge_into(&mut config.session);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogConfig {
    pub level: Option<String>,
}

impl FileLogConfig {
    fn merge_into(self, config: &mut LogConfig) {
        if let Some(level) = self.level {
            config.level = level;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileStreamConfig {
    pub url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub base_delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl FileStreamConfig {
    fn merge_into(self, config: &mut StreamConfig) {
        if let Some(url) = self.url {
            config.url = url;
        }

        if let Some(timeout_ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = timeout_ms;
        }

        if let Some(delay_ms) = self.base_delay_ms {
            config.base_delay_ms = delay_ms;
        }

        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
    }
}

#[derive(Deserialize, Default)]
pub struct FileApiConfig {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for FileApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileApiConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl FileApiConfig {
    fn merge_into(self, config: &mut ApiConfig) {
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }

        if let Some(token) = self.auth_token.filter(|token| !token.trim().is_empty()) {
            config.auth_token = Some(token);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileChatConfig {
    pub page_size: Option<usize>,
    pub typing_ttl_ms: Option<u64>,
    pub presence_refresh_ms: Option<u64>,
}

impl FileChatConfig {
    fn merge_into(self, config: &mut ChatConfig) {
        if let Some(page_size) = self.page_size {
            config.page_size = crate::domain::pagination::normalized_page_size(page_size);
        }

        if let Some(ttl_ms) = self.typing_ttl_ms {
            config.typing_ttl_ms = ttl_ms;
        }

        if let Some(refresh_ms) = self.presence_refresh_ms.filter(|ms| *ms > 0) {
            config.presence_refresh_ms = refresh_ms;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileSessionConfig {
    pub identity: Option<UserId>,
}

impl FileSessionConfig {
    fn merge_into(self, config: &mut SessionConfig) {
        if let Some(identity) = self.identity {
            config.identity = Some(identity);
        }
    }
}
