use std::sync::{mpsc, Arc, Mutex};

use crate::{
    domain::{
        connection::{Connection, ConnectionStatus},
        status::{now_unix_ms, ConnectionSnapshot, StatusError},
        UserId,
    },
    infra::secrets::sanitize_error_code,
};

/// Shared, observable connection status for one session.
#[derive(Clone, Debug)]
pub struct ConnectionStatusTracker {
    inner: Arc<Mutex<TrackerState>>,
}

#[derive(Debug)]
struct TrackerState {
    snapshot: ConnectionSnapshot,
    subscribers: Vec<mpsc::Sender<ConnectionSnapshot>>,
}

impl ConnectionStatusTracker {
    pub fn new(identity: UserId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerState {
                snapshot: ConnectionSnapshot::new(identity),
                subscribers: Vec::new(),
            })),
        }
    }

    /// Receives the current snapshot immediately, then every change.
    pub fn subscribe(&self) -> mpsc::Receiver<ConnectionSnapshot> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut state) = self.inner.lock() {
            let _ = tx.send(state.snapshot.clone());
            state.subscribers.push(tx);
        }
        rx
    }

    pub fn snapshot(&self) -> Option<ConnectionSnapshot> {
        self.inner.lock().map(|state| state.snapshot.clone()).ok()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot()
            .map(|snapshot| snapshot.status)
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    pub fn on_connecting(&self, connection: &Connection) {
        self.mutate(|snapshot| {
            snapshot.status = ConnectionStatus::Connecting;
            snapshot.attempts = connection.attempts;
            snapshot.manual_reconnect_required = false;
        });
    }

    pub fn on_connected(&self, connection: &Connection) {
        self.mutate(|snapshot| {
            snapshot.status = ConnectionStatus::Connected;
            snapshot.attempts = connection.attempts;
            snapshot.last_error = None;
        });
    }

    pub fn on_error(&self, connection: &Connection, code: &str) {
        self.mutate(|snapshot| {
            snapshot.status = connection.status;
            snapshot.attempts = connection.attempts;
            snapshot.last_error = Some(StatusError {
                code: sanitize_error_code(code),
                at_unix_ms: now_unix_ms(),
            });
        });
    }

    pub fn on_exhausted(&self, connection: &Connection) {
        self.mutate(|snapshot| {
            snapshot.status = ConnectionStatus::Disconnected;
            snapshot.attempts = connection.attempts;
            snapshot.manual_reconnect_required = true;
        });
    }

    pub fn on_disconnected(&self, connection: &Connection) {
        self.mutate(|snapshot| {
            snapshot.status = ConnectionStatus::Disconnected;
            snapshot.attempts = connection.attempts;
        });
    }

    fn mutate<F>(&self, mutator: F)
    where
        F: FnOnce(&mut ConnectionSnapshot),
    {
        if let Ok(mut state) = self.inner.lock() {
            mutator(&mut state.snapshot);
            state.snapshot.updated_at_unix_ms = now_unix_ms();
            let payload = state.snapshot.clone();
            state
                .subscribers
                .retain(|sub| sub.send(payload.clone()).is_ok());
        }
    }
}
