//! Infrastructure layer: config, logging and the HTTP adapters.

pub mod config;
pub mod error;
pub mod http_api;
pub mod logging;
pub mod secrets;
pub mod sse;

/// Returns the infra module name for smoke checks.
pub fn module_name() -> &'static str {
    "infra"
}
