use tracing_subscriber::EnvFilter;

use crate::infra::{config::LogConfig, error::AppError};

/// Installs the fmt subscriber on stderr. `RUST_LOG` overrides the
/// configured level.
pub fn init(config: &LogConfig) -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(&config.level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(AppError::LoggingInit)
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{level},hyper=warn,reqwest=warn")))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
