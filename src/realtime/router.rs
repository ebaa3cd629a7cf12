//! Maps push-stream envelopes onto the client stores.

use chrono::Utc;
use tokio::sync::broadcast;

use crate::{
    domain::{
        envelope::{
            ChatMessagePayload, ConversationCreatedPayload, EnvelopeError, EventEnvelope,
            EventKind, MessageDeletedPayload, MessageEditedPayload, PresencePayload,
            ReadReceiptPayload, SystemAction, TypingPayload, UpdatePayload,
        },
        notification::NotificationPayload,
        UserId,
    },
    usecases::{
        chat_store::{ChatStore, LiveOutcome},
        notification_store::NotificationStore,
    },
};

use super::{connection_manager::FrameHandler, presence::Presence, typing::TypingRegistry};

const ROUTER_FRAME_MALFORMED: &str = "ROUTER_FRAME_MALFORMED";
const ROUTER_FRAME_IGNORED: &str = "ROUTER_FRAME_IGNORED";
const SIGNAL_CAPACITY: usize = 64;

/// Session-level events that are not store mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    System(SystemAction),
    EntityUpdated { entity: String },
    /// The conversation list no longer matches the server and should be
    /// fetched again.
    ConversationListStale,
    /// A push stream opened. Anything pushed while it was down was missed.
    StreamOpened,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled(EventKind),
    /// Well-formed frame nobody acts on; carries the wire type.
    Ignored(String),
    Malformed,
}

#[derive(Clone)]
pub struct EventRouter {
    identity: UserId,
    chat: ChatStore,
    notifications: NotificationStore,
    typing: TypingRegistry,
    presence: Presence,
    signals: broadcast::Sender<SessionSignal>,
}

impl EventRouter {
    pub fn new(
        identity: UserId,
        chat: ChatStore,
        notifications: NotificationStore,
        typing: TypingRegistry,
        presence: Presence,
    ) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            identity,
            chat,
            notifications,
            typing,
            presence,
            signals,
        }
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }

    /// Parses and dispatches one raw frame. Never fails; bad frames are
    /// logged and reported as [`Dispatch::Malformed`].
    pub fn route_frame(&self, raw: &str) -> Dispatch {
        match EventEnvelope::parse(raw) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(error) => {
                log_malformed(None, &error);
                Dispatch::Malformed
            }
        }
    }

    pub fn dispatch(&self, envelope: &EventEnvelope) -> Dispatch {
        let kind = envelope.kind();
        let routed = match kind {
            EventKind::Notification => self.on_notification(envelope),
            EventKind::System => self.on_system(envelope),
            EventKind::Update => envelope.decode::<UpdatePayload>().map(|payload| {
                self.emit(SessionSignal::EntityUpdated {
                    entity: payload.entity,
                });
                true
            }),
            EventKind::ChatMessage => self.on_chat_message(envelope),
            EventKind::ChatMessageEdited => envelope
                .decode::<MessageEditedPayload>()
                .map(|payload| self.chat.apply_live_edit(&payload)),
            EventKind::ChatMessageDeleted => envelope
                .decode::<MessageDeletedPayload>()
                .map(|payload| self.chat.apply_live_delete(&payload)),
            EventKind::ChatTyping => self.on_typing(envelope),
            EventKind::ChatReadReceipt => envelope
                .decode::<ReadReceiptPayload>()
                .map(|payload| self.chat.apply_read_receipt(&payload)),
            EventKind::ConversationCreated => envelope
                .decode::<ConversationCreatedPayload>()
                .map(|_| {
                    self.emit(SessionSignal::ConversationListStale);
                    true
                }),
            EventKind::UserOnline | EventKind::UserOffline => envelope
                .decode::<PresencePayload>()
                .map(|payload| {
                    self.presence
                        .set_online(payload.user_id, kind == EventKind::UserOnline)
                }),
            EventKind::Unknown => Ok(false),
        };

        match routed {
            Ok(_) if kind == EventKind::Unknown => {
                tracing::debug!(
                    code = ROUTER_FRAME_IGNORED,
                    event_type = envelope.raw_kind(),
                    "ignoring frame of unknown type"
                );
                Dispatch::Ignored(envelope.raw_kind().to_owned())
            }
            Ok(changed) => {
                tracing::debug!(event_type = kind.as_wire(), changed, "frame dispatched");
                Dispatch::Handled(kind)
            }
            Err(error) => {
                log_malformed(Some(envelope.raw_kind()), &error);
                Dispatch::Malformed
            }
        }
    }

    fn on_notification(&self, envelope: &EventEnvelope) -> Result<bool, EnvelopeError> {
        let payload: NotificationPayload = envelope.decode()?;
        let received_at = envelope.timestamp().unwrap_or_else(Utc::now);

        self.notifications
            .push_live(payload.into_notification(envelope.id(), received_at));
        Ok(true)
    }

    fn on_system(&self, envelope: &EventEnvelope) -> Result<bool, EnvelopeError> {
        let action = SystemAction::from_payload(envelope.payload()).map_err(|source| {
            EnvelopeError::Payload {
                kind: envelope.raw_kind().to_owned(),
                source,
            }
        })?;

        self.emit(SessionSignal::System(action));
        Ok(true)
    }

    fn on_chat_message(&self, envelope: &EventEnvelope) -> Result<bool, EnvelopeError> {
        let payload: ChatMessagePayload = envelope.decode()?;

        let outcome = self.chat.apply_live_message(payload.message);
        if outcome == LiveOutcome::NewConversation {
            self.emit(SessionSignal::ConversationListStale);
        }
        Ok(outcome != LiveOutcome::Duplicate)
    }

    fn on_typing(&self, envelope: &EventEnvelope) -> Result<bool, EnvelopeError> {
        let payload: TypingPayload = envelope.decode()?;
        // Own typing is shown locally before the server echoes it back.
        if payload.user_id == self.identity {
            return Ok(false);
        }

        self.typing.set_typing_named(
            payload.conversation_id,
            payload.user_id,
            payload.user_name,
            payload.is_typing,
        );
        Ok(true)
    }

    fn emit(&self, signal: SessionSignal) {
        // No receiver only means nobody is listening right now.
        let _ = self.signals.send(signal);
    }
}

impl FrameHandler for EventRouter {
    fn handle_frame(&mut self, raw: &str) {
        self.route_frame(raw);
    }

    fn stream_opened(&mut self) {
        self.emit(SessionSignal::StreamOpened);
    }
}

fn log_malformed(event_type: Option<&str>, error: &EnvelopeError) {
    tracing::warn!(
        code = ROUTER_FRAME_MALFORMED,
        event_type = event_type.unwrap_or("unparsed"),
        error = %error,
        "dropping malformed frame"
    );
}
