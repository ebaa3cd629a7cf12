use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use crate::domain::UserId;

/// Identities reported online by `user:online` / `user:offline` frames.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    online: Arc<Mutex<BTreeSet<UserId>>>,
}

impl Presence {
    pub fn set_online(&self, user_id: UserId, online: bool) -> bool {
        let mut set = self
            .online
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if online {
            set.insert(user_id)
        } else {
            set.remove(&user_id)
        }
    }

    /// Replaces the set with a server snapshot.
    pub fn replace(&self, users: impl IntoIterator<Item = UserId>) {
        *self
            .online
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = users.into_iter().collect();
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online
            .lock()
            .map(|set| set.contains(&user_id))
            .unwrap_or(false)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.online
            .lock()
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_online_transitions() {
        let presence = Presence::default();

        assert!(presence.set_online(4, true));
        assert!(!presence.set_online(4, true));
        assert!(presence.set_online(2, true));
        assert_eq!(presence.online_users(), vec![2, 4]);

        assert!(presence.set_online(4, false));
        assert!(!presence.is_online(4));
    }

    #[test]
    fn snapshot_replaces_live_state() {
        let presence = Presence::default();
        presence.set_online(4, true);

        presence.replace([9, 2, 9]);

        assert_eq!(presence.online_users(), vec![2, 9]);
        assert!(!presence.is_online(4));
    }
}
