//! One client session: stores, ephemeral state and the push connection for a
//! single identity, with an explicit start and dispose.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    domain::{connection::ConnectionStatus, ConversationId, UserId},
    realtime::{
        connection_manager::{ConnectionManager, ConnectionSettings, PushTransport},
        presence::Presence,
        router::{EventRouter, SessionSignal},
        status_tracker::ConnectionStatusTracker,
        typing::{TypingRegistry, DEFAULT_TYPING_TTL},
    },
    usecases::{
        chat_store::ChatStore,
        contracts::{ChatApi, NotificationApi},
        list_conversations::ListConversationsError,
        notification_store::NotificationStore,
    },
};

const SESSION_STARTED: &str = "SESSION_STARTED";
const SESSION_DISPOSED: &str = "SESSION_DISPOSED";
const SESSION_LIST_REFRESH_FAILED: &str = "SESSION_LIST_REFRESH_FAILED";
const SESSION_RESYNCED: &str = "SESSION_RESYNCED";
const SESSION_PRESENCE_LOAD_FAILED: &str = "SESSION_PRESENCE_LOAD_FAILED";

pub const DEFAULT_PRESENCE_REFRESH: Duration = Duration::from_secs(30);
const SESSION_NOTIFICATIONS_LOAD_FAILED: &str = "SESSION_NOTIFICATIONS_LOAD_FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub identity: UserId,
    pub page_size: usize,
    pub typing_ttl: Duration,
    /// Period of the online-users refresh while the stream is connected.
    pub presence_refresh: Duration,
    pub connection: ConnectionSettings,
}

impl SessionSettings {
    pub fn new(identity: UserId) -> Self {
        Self {
            identity,
            page_size: crate::domain::pagination::DEFAULT_PAGE_SIZE,
            typing_ttl: DEFAULT_TYPING_TTL,
            presence_refresh: DEFAULT_PRESENCE_REFRESH,
            connection: ConnectionSettings::default(),
        }
    }
}

/// REST and push endpoints a session talks to.
#[derive(Clone)]
pub struct SessionPorts {
    pub chat: Arc<dyn ChatApi>,
    pub notifications: Arc<dyn NotificationApi>,
    pub transport: Arc<dyn PushTransport>,
}

pub struct Session {
    identity: UserId,
    chat_api: Arc<dyn ChatApi>,
    presence_refresh: Duration,
    chat: ChatStore,
    notifications: NotificationStore,
    typing: TypingRegistry,
    presence: Presence,
    router: EventRouter,
    connection: ConnectionManager,
    refresher: Option<JoinHandle<()>>,
}

impl Session {
    /// Builds the session without connecting. Must be called within a tokio
    /// runtime.
    pub fn new(settings: SessionSettings, ports: SessionPorts) -> Self {
        let identity = settings.identity;
        let typing = TypingRegistry::new(settings.typing_ttl);
        let presence = Presence::default();
        let chat_api = Arc::clone(&ports.chat);
        let chat = ChatStore::new(identity, ports.chat, typing.clone(), settings.page_size);
        let notifications = NotificationStore::new(ports.notifications);
        let router = EventRouter::new(
            identity,
            chat.clone(),
            notifications.clone(),
            typing.clone(),
            presence.clone(),
        );
        let connection = ConnectionManager::spawn(
            identity,
            ports.transport,
            router.clone(),
            settings.connection,
        );

        Self {
            identity,
            chat_api,
            presence_refresh: settings.presence_refresh,
            chat,
            notifications,
            typing,
            presence,
            router,
            connection,
            refresher: None,
        }
    }

    /// Builds the session and opens the push stream. Every time a stream
    /// opens, the conversation list, cached histories and online users are
    /// fetched again; the list is also refetched when the stream reports it
    /// stale.
    pub fn start(settings: SessionSettings, ports: SessionPorts) -> Self {
        let mut session = Self::new(settings, ports);
        session.refresher = Some(spawn_refresher(Refresher {
            identity: session.identity,
            chat: session.chat.clone(),
            chat_api: Arc::clone(&session.chat_api),
            presence: session.presence.clone(),
            connection: session.connection.tracker().clone(),
            presence_refresh: session.presence_refresh,
            signals: session.router.subscribe_signals(),
        }));
        session.connection.connect();

        tracing::info!(code = SESSION_STARTED, identity = session.identity, "session started");
        session
    }

    /// Loads the conversation list and notifications. A failed notification
    /// load is logged and does not fail the bootstrap.
    pub async fn bootstrap(&self) -> Result<usize, ListConversationsError> {
        let (conversations, notifications) =
            tokio::join!(self.chat.fetch_conversations(), self.notifications.load());

        if let Err(error) = notifications {
            tracing::warn!(
                code = SESSION_NOTIFICATIONS_LOAD_FAILED,
                identity = self.identity,
                error = %error,
                "notifications unavailable; continuing with live updates only"
            );
        }
        conversations.map(|list| list.len())
    }

    pub async fn set_typing(&self, conversation_id: ConversationId, is_typing: bool) {
        self.chat.set_typing(conversation_id, is_typing).await;
    }

    pub fn identity(&self) -> UserId {
        self.identity
    }

    pub fn chat(&self) -> &ChatStore {
        &self.chat
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    pub fn typing(&self) -> &TypingRegistry {
        &self.typing
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<SessionSignal> {
        self.router.subscribe_signals()
    }

    /// Closes the push stream, stops background work and drops typing state.
    pub async fn dispose(mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
        self.typing.clear();
        self.connection.shutdown().await;

        tracing::info!(code = SESSION_DISPOSED, identity = self.identity, "session disposed");
    }
}

struct Refresher {
    identity: UserId,
    chat: ChatStore,
    chat_api: Arc<dyn ChatApi>,
    presence: Presence,
    connection: ConnectionStatusTracker,
    presence_refresh: Duration,
    signals: broadcast::Receiver<SessionSignal>,
}

fn spawn_refresher(mut refresher: Refresher) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = refresher.presence_refresh.max(Duration::from_millis(1));
        let mut presence_tick = tokio::time::interval_at(Instant::now() + period, period);
        presence_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                signal = refresher.signals.recv() => match signal {
                    Ok(SessionSignal::StreamOpened) => refresher.resync().await,
                    Ok(SessionSignal::ConversationListStale) | Err(RecvError::Lagged(_)) => {
                        refresher.refresh_list().await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Closed) => return,
                },
                _ = presence_tick.tick() => {
                    if refresher.connection.status() == ConnectionStatus::Connected {
                        refresher.refresh_presence().await;
                    }
                }
            }
        }
    })
}

impl Refresher {
    /// Catches up on everything pushed while no stream was open.
    async fn resync(&self) {
        let (_, added, _) = tokio::join!(
            self.refresh_list(),
            self.chat.resync_cached(),
            self.refresh_presence()
        );
        tracing::debug!(
            code = SESSION_RESYNCED,
            identity = self.identity,
            added,
            "state resynced after stream opened"
        );
    }

    async fn refresh_list(&self) {
        if let Err(error) = self.chat.fetch_conversations().await {
            tracing::warn!(
                code = SESSION_LIST_REFRESH_FAILED,
                identity = self.identity,
                error = ?error,
                "conversation list refresh failed"
            );
        }
    }

    async fn refresh_presence(&self) {
        match self.chat_api.online_users().await {
            Ok(users) => self.presence.replace(users),
            Err(error) => tracing::warn!(
                code = SESSION_PRESENCE_LOAD_FAILED,
                identity = self.identity,
                error = %error,
                "online users unavailable; keeping live presence"
            ),
        }
    }
}
