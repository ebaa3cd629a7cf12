//! Per-identity notification storage. Creating a notification also pushes it
//! to the recipient's live streams. Every mutation is idempotent.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Utc;
use serde_json::Value;

use crate::domain::{
    envelope::{EventEnvelope, EventKind},
    notification::{Notification, NotificationLevel, Priority},
    UserId,
};

use super::hub::Broadcaster;

const NOTIFICATION_PUSH_ENCODE_FAILED: &str = "NOTIFICATION_PUSH_ENCODE_FAILED";

/// Fields a producer supplies; id and timestamp are assigned on create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationDraft {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub payload: Option<Value>,
    pub priority: Priority,
    pub action_url: Option<String>,
}

impl NotificationDraft {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: NotificationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }
}

pub struct NotificationService {
    state: Mutex<NotificationState>,
    broadcaster: Arc<dyn Broadcaster>,
}

#[derive(Debug, Default)]
struct NotificationState {
    inboxes: HashMap<UserId, Vec<Notification>>,
    next_id: u64,
}

impl NotificationService {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            state: Mutex::new(NotificationState::default()),
            broadcaster,
        }
    }

    /// Stores the notification and pushes it. Returns the stored copy and the
    /// number of streams that received it.
    pub fn create(&self, recipient: UserId, draft: NotificationDraft) -> (Notification, usize) {
        let notification = {
            let mut state = self.lock();
            state.next_id += 1;
            let notification = Notification {
                id: format!("n-{}", state.next_id),
                level: draft.level,
                title: draft.title,
                message: draft.message,
                payload: draft.payload,
                timestamp: Utc::now(),
                read: false,
                priority: draft.priority,
                action_url: draft.action_url,
            };
            state
                .inboxes
                .entry(recipient)
                .or_default()
                .push(notification.clone());
            notification
        };

        let delivered = match EventEnvelope::new(
            EventKind::Notification,
            &notification,
            Some(notification.id.clone()),
        ) {
            Ok(envelope) => self.broadcaster.broadcast(&[recipient], &envelope),
            Err(error) => {
                tracing::error!(
                    code = NOTIFICATION_PUSH_ENCODE_FAILED,
                    recipient,
                    error = %error,
                    "notification stored but not pushed"
                );
                0
            }
        };
        (notification, delivered)
    }

    /// Newest first.
    pub fn list(&self, recipient: UserId) -> Vec<Notification> {
        let mut notifications = self
            .lock()
            .inboxes
            .get(&recipient)
            .cloned()
            .unwrap_or_default();
        notifications.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        notifications
    }

    pub fn mark_read(&self, recipient: UserId, id: &str) {
        self.with_inbox(recipient, |inbox| {
            if let Some(notification) = inbox.iter_mut().find(|item| item.id == id) {
                notification.read = true;
            }
        });
    }

    pub fn mark_all_read(&self, recipient: UserId) {
        self.with_inbox(recipient, |inbox| {
            inbox.iter_mut().for_each(|notification| notification.read = true);
        });
    }

    pub fn delete(&self, recipient: UserId, id: &str) {
        self.with_inbox(recipient, |inbox| inbox.retain(|item| item.id != id));
    }

    pub fn clear(&self, recipient: UserId) {
        self.lock().inboxes.remove(&recipient);
    }

    fn with_inbox(&self, recipient: UserId, apply: impl FnOnce(&mut Vec<Notification>)) {
        if let Some(inbox) = self.lock().inboxes.get_mut(&recipient) {
            apply(inbox);
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotificationState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::notification::NotificationPayload,
        server::hub::FanoutHub,
    };

    fn service() -> (NotificationService, FanoutHub) {
        let hub = FanoutHub::default();
        (NotificationService::new(Arc::new(hub.clone())), hub)
    }

    #[test]
    fn create_pushes_to_the_recipient_only() {
        let (service, hub) = service();
        let mut recipient = hub.subscribe(1);
        let mut other = hub.subscribe(2);

        let (stored, delivered) = service.create(
            1,
            NotificationDraft::new("Rental approved", "Excavator #12")
                .with_level(NotificationLevel::Success)
                .with_action_url("/rentals/12"),
        );

        assert_eq!(delivered, 1);
        assert!(other.try_recv().is_none());
        let frame = recipient.try_recv().expect("pushed frame");
        let envelope = EventEnvelope::parse(&frame).expect("envelope");
        assert_eq!(envelope.id(), Some(stored.id.as_str()));
        let payload: NotificationPayload = envelope.decode().expect("payload");
        let received = payload.into_notification(envelope.id(), Utc::now());
        assert_eq!(received, stored);
    }

    #[test]
    fn mutations_are_idempotent() {
        let (service, _) = service();
        let (first, _) = service.create(1, NotificationDraft::new("a", ""));
        service.create(1, NotificationDraft::new("b", ""));

        service.mark_read(1, &first.id);
        service.mark_read(1, &first.id);
        service.mark_read(1, "missing");
        assert_eq!(service.list(1).iter().filter(|n| !n.read).count(), 1);

        service.delete(1, &first.id);
        service.delete(1, &first.id);
        assert_eq!(service.list(1).len(), 1);

        service.mark_all_read(1);
        service.mark_all_read(7);
        assert!(service.list(1).iter().all(|n| n.read));

        service.clear(1);
        service.clear(1);
        assert!(service.list(1).is_empty());
    }
}
