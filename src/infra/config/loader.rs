use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::infra::{
    config::{file_config::FileConfig, AppConfig},
    error::AppError,
};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_DIR_NAME: &str = "snd-live";

/// Loads the config file merged over defaults.
///
/// Without an explicit path the first existing of `./config.toml` and
/// `<user config dir>/snd-live/config.toml` is used. A missing file yields
/// defaults.
pub fn load(path: Option<&Path>) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::default();

    let Some(config_path) = resolve_path(path) else {
        return Ok(config);
    };

    if !config_path.exists() {
        return Ok(config);
    }

    let raw = fs::read_to_string(&config_path).map_err(|source| AppError::ConfigRead {
        path: config_path.clone(),
        source,
    })?;

    let file_config: FileConfig = toml::from_str(&raw).map_err(|source| AppError::ConfigParse {
        path: config_path.clone(),
        source,
    })?;

    file_config.merge_into(&mut config);
    tracing::debug!(path = %config_path.display(), "config loaded");
    Ok(config)
}

fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => candidate_paths().into_iter().find(|path| path.exists()),
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(DEFAULT_CONFIG_PATH)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(CONFIG_DIR_NAME).join(DEFAULT_CONFIG_PATH));
    }
    candidates
}
