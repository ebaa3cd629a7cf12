//! Client-side notification list with a derived unread count.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{notification::Notification, notification_list::NotificationList};

use super::{
    contracts::{ApiError, NotificationApi},
    loading::LoadingFlag,
};

const NOTIFICATION_SYNC_FAILED: &str = "NOTIFICATION_SYNC_FAILED";

#[derive(Clone)]
pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    list: Arc<Mutex<NotificationList>>,
    loading: LoadingFlag,
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        Self {
            api,
            list: Arc::new(Mutex::new(NotificationList::default())),
            loading: LoadingFlag::default(),
        }
    }

    /// Replaces the list with the server's copy. On failure the current list
    /// is kept.
    pub async fn load(&self) -> Result<usize, ApiError> {
        let _loading = self.loading.begin();
        let notifications = self.api.list_notifications().await?;

        let mut list = self.lock();
        list.replace_all(notifications);
        Ok(list.len())
    }

    /// Prepends a pushed notification. A repeated id keeps its read state.
    pub fn push_live(&self, notification: Notification) {
        self.lock().push_front(notification);
    }

    pub async fn mark_as_read(&self, id: &str) {
        if !self.lock().mark_read(id) {
            return;
        }

        let result = self.api.mark_notification_read(id).await;
        log_sync_failure("mark_read", result);
    }

    pub async fn mark_all_as_read(&self) {
        self.lock().mark_all_read();

        let result = self.api.mark_all_notifications_read().await;
        log_sync_failure("mark_all_read", result);
    }

    pub async fn delete(&self, id: &str) {
        if self.lock().remove(id).is_none() {
            return;
        }

        let result = self.api.delete_notification(id).await;
        log_sync_failure("delete", result);
    }

    pub async fn clear_all(&self) {
        self.lock().clear();

        let result = self.api.clear_notifications().await;
        log_sync_failure("clear", result);
    }

    /// Newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().items().to_vec()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().unread_count()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    fn lock(&self) -> MutexGuard<'_, NotificationList> {
        self.list
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn log_sync_failure(operation: &'static str, result: Result<(), ApiError>) {
    if let Err(error) = result {
        tracing::warn!(
            code = NOTIFICATION_SYNC_FAILED,
            operation,
            error = %error,
            "notification change kept locally; server sync failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{notification, NotificationCall, StubNotificationApi};

    fn store_with(api: &Arc<StubNotificationApi>) -> NotificationStore {
        let api: Arc<dyn NotificationApi> = api.clone();
        NotificationStore::new(api)
    }

    fn ids(store: &NotificationStore) -> Vec<String> {
        store
            .notifications()
            .into_iter()
            .map(|notification| notification.id)
            .collect()
    }

    #[tokio::test]
    async fn load_orders_newest_first_and_counts_unread() {
        let api = Arc::new(StubNotificationApi::with_notifications(vec![
            notification("a", 10, false),
            notification("b", 30, true),
            notification("c", 20, false),
        ]));
        let store = store_with(&api);

        assert_eq!(store.load().await, Ok(3));

        assert_eq!(ids(&store), vec!["b", "c", "a"]);
        assert_eq!(store.unread_count(), 2);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn failed_load_keeps_current_list() {
        let api = Arc::new(StubNotificationApi::default());
        api.fail_list(ApiError::Unavailable("down".to_owned()));
        let store = store_with(&api);
        store.push_live(notification("live", 5, false));

        assert!(store.load().await.is_err());

        assert_eq!(ids(&store), vec!["live"]);
    }

    #[tokio::test]
    async fn pushed_notification_is_prepended_once() {
        let api = Arc::new(StubNotificationApi::with_notifications(vec![notification(
            "old", 1, true,
        )]));
        let store = store_with(&api);
        store.load().await.expect("load");

        store.push_live(notification("new", 2, false));
        store.push_live(notification("new", 2, false));

        assert_eq!(ids(&store), vec!["new", "old"]);
        assert_eq!(store.unread_count(), 1);

        store.push_live(notification("old", 1, false));
        assert_eq!(ids(&store), vec!["old", "new"]);
        assert_eq!(store.unread_count(), 1);
    }

    #[tokio::test]
    async fn mark_as_read_stays_local_when_server_fails() {
        let api = Arc::new(StubNotificationApi::default());
        api.fail_best_effort(ApiError::Unavailable("down".to_owned()));
        let store = store_with(&api);
        store.push_live(notification("n1", 1, false));

        store.mark_as_read("n1").await;

        assert_eq!(store.unread_count(), 0);
        assert_eq!(api.calls(), vec![NotificationCall::MarkRead("n1".to_owned())]);
    }

    #[tokio::test]
    async fn unknown_or_already_read_ids_skip_the_server() {
        let api = Arc::new(StubNotificationApi::default());
        let store = store_with(&api);
        store.push_live(notification("n1", 1, true));

        store.mark_as_read("n1").await;
        store.mark_as_read("missing").await;
        store.delete("missing").await;

        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn mark_all_delete_and_clear() {
        let api = Arc::new(StubNotificationApi::default());
        let store = store_with(&api);
        store.push_live(notification("a", 1, false));
        store.push_live(notification("b", 2, false));

        store.mark_all_as_read().await;
        assert_eq!(store.unread_count(), 0);

        store.delete("a").await;
        assert_eq!(ids(&store), vec!["b"]);

        store.clear_all().await;
        assert!(store.notifications().is_empty());
        assert_eq!(
            api.calls(),
            vec![
                NotificationCall::MarkAllRead,
                NotificationCall::Delete("a".to_owned()),
                NotificationCall::Clear,
            ]
        );
    }
}
