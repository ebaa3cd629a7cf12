//! Real-time update delivery: push connection lifecycle, event routing, the
//! chat and notification stores, and the server-side fan-out they talk to.

pub mod app;
pub mod cli;
pub mod domain;
pub mod infra;
pub mod realtime;
pub mod server;
pub mod session;
#[cfg(test)]
mod test_support;
pub mod usecases;
