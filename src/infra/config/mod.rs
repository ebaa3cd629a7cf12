mod app_config;
mod file_config;
mod loader;

pub use app_config::{ApiConfig, AppConfig, ChatConfig, LogConfig, SessionConfig, StreamConfig};
pub use loader::load;
