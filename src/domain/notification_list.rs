use super::notification::Notification;

/// Notifications for one identity, newest first. The unread count is always
/// derived from the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationList {
    items: Vec<Notification>,
}

impl NotificationList {
    pub fn replace_all(&mut self, mut items: Vec<Notification>) {
        items.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        let mut seen = std::collections::HashSet::new();
        items.retain(|item| seen.insert(item.id.clone()));
        self.items = items;
    }

    /// Prepends a live notification. A repeated id replaces the older copy
    /// but never turns a read notification back to unread.
    pub fn push_front(&mut self, mut notification: Notification) {
        if let Some(index) = self.items.iter().position(|item| item.id == notification.id) {
            notification.read |= self.items.remove(index).read;
        }
        self.items.insert(0, notification);
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) if !item.read => {
                item.read = true;
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for item in self.items.iter_mut().filter(|item| !item.read) {
            item.read = true;
            changed += 1;
        }
        changed
    }

    pub fn remove(&mut self, id: &str) -> Option<Notification> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|item| !item.read).count()
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::notification::{NotificationLevel, Priority};

    fn notification(id: &str, seconds: i64, read: bool) -> Notification {
        Notification {
            id: id.to_owned(),
            level: NotificationLevel::Info,
            title: format!("title {id}"),
            message: String::new(),
            payload: None,
            timestamp: Utc
                .timestamp_opt(1_700_000_000 + seconds, 0)
                .single()
                .expect("valid instant"),
            read,
            priority: Priority::Medium,
            action_url: None,
        }
    }

    #[test]
    fn replace_all_orders_newest_first() {
        let mut list = NotificationList::default();

        list.replace_all(vec![
            notification("a", 1, false),
            notification("b", 3, true),
            notification("c", 2, false),
        ]);

        let ids: Vec<_> = list.items().iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(list.unread_count(), 2);
    }

    #[test]
    fn live_notification_goes_first_and_replaces_duplicate() {
        let mut list = NotificationList::default();
        list.replace_all(vec![notification("a", 1, false), notification("b", 2, false)]);

        list.push_front(notification("a", 5, false));

        let ids: Vec<_> = list.items().iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn redelivered_notification_stays_read() {
        let mut list = NotificationList::default();
        list.push_front(notification("a", 1, false));
        list.mark_read("a");

        list.push_front(notification("a", 1, false));

        assert_eq!(list.len(), 1);
        assert_eq!(list.unread_count(), 0);
        assert!(list.items()[0].read);
    }

    #[test]
    fn unread_count_follows_read_marks() {
        let mut list = NotificationList::default();
        list.replace_all(vec![
            notification("a", 1, false),
            notification("b", 2, false),
            notification("c", 3, false),
        ]);

        assert!(list.mark_read("b"));
        assert!(!list.mark_read("b"));
        assert!(!list.mark_read("missing"));
        assert_eq!(list.unread_count(), 2);

        assert_eq!(list.mark_all_read(), 2);
        assert_eq!(list.unread_count(), 0);
    }

    #[test]
    fn removing_unread_item_lowers_unread_count() {
        let mut list = NotificationList::default();
        list.replace_all(vec![notification("a", 1, false), notification("b", 2, true)]);

        assert!(list.remove("a").is_some());
        assert!(list.remove("a").is_none());

        assert_eq!(list.unread_count(), 0);
        list.clear();
        assert!(list.is_empty());
    }
}
