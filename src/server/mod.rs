//! Server side of the push channel: fan-out hub and in-memory persistence.

pub mod hub;
pub mod local;
pub mod notifications;
pub mod persistence;

use std::sync::{Arc, Weak};

use crate::domain::{message::UserSummary, UserId};

use self::{
    hub::{FanoutHub, HubTransport, PresenceSink},
    local::LocalApi,
    notifications::NotificationService,
    persistence::MessageService,
};

/// Hub and services wired together, for running sessions in one process.
#[derive(Clone)]
pub struct InProcessServer {
    hub: FanoutHub,
    messages: Arc<MessageService>,
    notifications: Arc<NotificationService>,
}

impl Default for InProcessServer {
    fn default() -> Self {
        Self::new(FanoutHub::default())
    }
}

impl InProcessServer {
    pub fn new(hub: FanoutHub) -> Self {
        let broadcaster = Arc::new(hub.clone());
        let messages = Arc::new(MessageService::new(broadcaster.clone()));
        let sink: Weak<dyn PresenceSink> = Arc::downgrade(&messages) as Weak<dyn PresenceSink>;
        hub.set_presence_sink(sink);
        Self {
            messages,
            notifications: Arc::new(NotificationService::new(broadcaster)),
            hub,
        }
    }

    pub fn register_user(&self, user: UserSummary) {
        self.messages.register_user(user);
    }

    pub fn hub(&self) -> &FanoutHub {
        &self.hub
    }

    pub fn messages(&self) -> &Arc<MessageService> {
        &self.messages
    }

    pub fn notifications(&self) -> &Arc<NotificationService> {
        &self.notifications
    }

    /// REST surface as seen by `identity`.
    pub fn api_for(&self, identity: UserId) -> Arc<LocalApi> {
        Arc::new(LocalApi::new(
            identity,
            Arc::clone(&self.messages),
            Arc::clone(&self.notifications),
        ))
    }

    pub fn transport(&self) -> Arc<HubTransport> {
        Arc::new(HubTransport::new(self.hub.clone()))
    }
}

/// Returns the server module name for smoke checks.
pub fn module_name() -> &'static str {
    "server"
}
