use crate::{
    domain::UserId,
    infra::{config::AppConfig, error::AppError},
};

#[derive(Debug)]
pub struct AppContext {
    pub config: AppConfig,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// The command-line identity wins over the configured one.
    pub fn resolve_identity(&self, requested: Option<UserId>) -> Result<UserId, AppError> {
        requested
            .or(self.config.session.identity)
            .ok_or(AppError::MissingIdentity)
    }
}
