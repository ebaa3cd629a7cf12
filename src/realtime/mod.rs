//! Realtime layer: push connection lifecycle, frame routing and ephemeral
//! per-session state.

pub mod connection_manager;
pub mod presence;
pub mod router;
pub mod status_tracker;
pub mod typing;

/// Returns the realtime module name for smoke checks.
pub fn module_name() -> &'static str {
    "realtime"
}
