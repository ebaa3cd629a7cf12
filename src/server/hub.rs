//! In-process fan-out of push frames to every live stream of an identity.
//!
//! The hub also reports presence: an identity comes online when its first
//! stream subscribes and goes offline when its last stream is dropped.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock, RwLock, Weak,
    },
};

use async_trait::async_trait;
use futures::stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    domain::{envelope::EventEnvelope, UserId},
    realtime::connection_manager::{FrameStream, PushTransport, TransportError},
};

const HUB_FRAME_ENCODE_FAILED: &str = "HUB_FRAME_ENCODE_FAILED";
const HUB_SUBSCRIBER_LAGGING: &str = "HUB_SUBSCRIBER_LAGGING";

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Pushes an envelope to the live streams of a set of identities.
pub trait Broadcaster: Send + Sync {
    /// Returns the number of streams the frame was handed to. Identities
    /// without a live stream miss the push.
    fn broadcast(&self, targets: &[UserId], envelope: &EventEnvelope) -> usize;
}

/// Told when an identity gains its first live stream or loses its last one.
pub trait PresenceSink: Send + Sync {
    fn presence_changed(&self, identity: UserId, online: bool);
}

#[derive(Debug, Clone)]
pub struct FanoutHub {
    subscribers: Arc<RwLock<HashMap<UserId, Vec<Subscriber>>>>,
    presence: Arc<OnceLock<Weak<dyn PresenceSink>>>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    frames: mpsc::Sender<Arc<str>>,
}

/// One live stream. Dropping it closes the stream and releases its slot in
/// the hub.
#[derive(Debug)]
pub struct Subscription {
    identity: UserId,
    id: u64,
    frames: mpsc::Receiver<Arc<str>>,
    lease: StreamLease,
}

/// Releases a subscriber slot when the stream that owns it is dropped.
#[derive(Debug)]
struct StreamLease {
    hub: FanoutHub,
    identity: UserId,
    id: u64,
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.hub.release(self.identity, self.id);
    }
}

impl Subscription {
    pub fn identity(&self) -> UserId {
        self.identity
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.frames.try_recv().ok()
    }

    pub fn into_stream(self) -> FrameStream {
        let Subscription { frames, lease, .. } = self;
        Box::pin(stream::unfold((frames, lease), |(mut frames, lease)| async move {
            let frame = frames.recv().await?;
            Some((Ok(frame.to_string()), (frames, lease)))
        }))
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl FanoutHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            presence: Arc::new(OnceLock::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        }
    }

    /// Registers the receiver of presence transitions. Only the first call
    /// takes effect.
    pub fn set_presence_sink(&self, sink: Weak<dyn PresenceSink>) -> bool {
        self.presence.set(sink).is_ok()
    }

    pub fn subscribe(&self, identity: UserId) -> Subscription {
        let (frames_tx, frames_rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let first = {
            let mut subscribers = self.write();
            let streams = subscribers.entry(identity).or_default();
            let first = streams.is_empty();
            streams.push(Subscriber {
                id,
                frames: frames_tx,
            });
            first
        };
        if first {
            self.announce(identity, true);
        }

        Subscription {
            identity,
            id,
            frames: frames_rx,
            lease: StreamLease {
                hub: self.clone(),
                identity,
                id,
            },
        }
    }

    /// Live streams of an identity, not counting ones already closed.
    pub fn connection_count(&self, identity: UserId) -> usize {
        self.read()
            .get(&identity)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|subscriber| !subscriber.frames.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn connected_identities(&self) -> Vec<UserId> {
        let mut identities: Vec<_> = self
            .read()
            .iter()
            .filter(|(_, subscribers)| subscribers.iter().any(|s| !s.frames.is_closed()))
            .map(|(identity, _)| *identity)
            .collect();
        identities.sort_unstable();
        identities
    }

    /// Hands an already encoded frame to every live stream of `targets`.
    /// Full buffers lose the frame; closed streams are pruned.
    pub fn broadcast_frame(&self, targets: &[UserId], frame: Arc<str>) -> usize {
        let targets: BTreeSet<UserId> = targets.iter().copied().collect();
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.read();
            for identity in &targets {
                let Some(streams) = subscribers.get(identity) else {
                    continue;
                };
                for subscriber in streams {
                    match subscriber.frames.try_send(Arc::clone(&frame)) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(
                                code = HUB_SUBSCRIBER_LAGGING,
                                identity,
                                subscriber = subscriber.id,
                                "subscriber buffer full; frame dropped"
                            );
                        }
                        Err(TrySendError::Closed(_)) => closed.push((*identity, subscriber.id)),
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.prune(&closed);
        }
        delivered
    }

    /// Drops closed senders. Emptied entries stay until a lease releases
    /// them; the offline transition is reported there.
    fn prune(&self, closed: &[(UserId, u64)]) {
        let mut subscribers = self.write();
        for (identity, id) in closed {
            if let Some(streams) = subscribers.get_mut(identity) {
                streams.retain(|subscriber| subscriber.id != *id);
            }
        }
    }

    fn release(&self, identity: UserId, id: u64) {
        {
            let mut subscribers = self.write();
            let Some(streams) = subscribers.get_mut(&identity) else {
                return;
            };
            streams.retain(|subscriber| subscriber.id != id);
            if !streams.is_empty() {
                return;
            }
            subscribers.remove(&identity);
        }
        self.announce(identity, false);
    }

    fn announce(&self, identity: UserId, online: bool) {
        if let Some(sink) = self.presence.get().and_then(Weak::upgrade) {
            sink.presence_changed(identity, online);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<UserId, Vec<Subscriber>>> {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<UserId, Vec<Subscriber>>> {
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Broadcaster for FanoutHub {
    fn broadcast(&self, targets: &[UserId], envelope: &EventEnvelope) -> usize {
        match envelope.to_frame() {
            Ok(frame) => self.broadcast_frame(targets, Arc::from(frame)),
            Err(error) => {
                tracing::error!(
                    code = HUB_FRAME_ENCODE_FAILED,
                    event_type = envelope.raw_kind(),
                    error = %error,
                    "failed to encode frame; nothing delivered"
                );
                0
            }
        }
    }
}

/// [`PushTransport`] backed by a [`FanoutHub`] in the same process.
#[derive(Debug, Clone)]
pub struct HubTransport {
    hub: FanoutHub,
}

impl HubTransport {
    pub fn new(hub: FanoutHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl PushTransport for HubTransport {
    async fn open(&self, identity: UserId) -> Result<FrameStream, TransportError> {
        Ok(self.hub.subscribe(identity).into_stream())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::domain::envelope::EventKind;

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(EventKind::Update, &json!({ "entity": "rental" }), None)
            .expect("envelope")
    }

    #[test]
    fn delivers_to_every_stream_of_each_target_once() {
        let hub = FanoutHub::default();
        let mut phone = hub.subscribe(1);
        let mut laptop = hub.subscribe(1);
        let mut other = hub.subscribe(2);
        let mut bystander = hub.subscribe(3);

        let delivered = hub.broadcast(&[1, 2, 2], &envelope());

        assert_eq!(delivered, 3);
        assert!(phone.try_recv().is_some());
        assert!(laptop.try_recv().is_some());
        assert!(other.try_recv().is_some());
        assert!(other.try_recv().is_none());
        assert!(bystander.try_recv().is_none());
    }

    #[test]
    fn identities_without_streams_miss_the_push() {
        let hub = FanoutHub::default();

        assert_eq!(hub.broadcast(&[7], &envelope()), 0);
    }

    #[test]
    fn closed_streams_are_pruned() {
        let hub = FanoutHub::default();
        let gone = hub.subscribe(1);
        let mut alive = hub.subscribe(1);
        drop(gone);

        assert_eq!(hub.broadcast(&[1], &envelope()), 1);
        assert!(alive.try_recv().is_some());
        assert_eq!(hub.connection_count(1), 1);

        drop(alive);
        hub.broadcast(&[1], &envelope());
        assert!(hub.connected_identities().is_empty());
    }

    #[test]
    fn full_subscriber_loses_the_frame_without_blocking() {
        let hub = FanoutHub::new(1);
        let mut slow = hub.subscribe(1);

        assert_eq!(hub.broadcast(&[1], &envelope()), 1);
        assert_eq!(hub.broadcast(&[1], &envelope()), 0);

        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_none());
        assert_eq!(hub.connection_count(1), 1);
    }

    #[derive(Default)]
    struct RecordingSink {
        changes: std::sync::Mutex<Vec<(UserId, bool)>>,
    }

    impl PresenceSink for RecordingSink {
        fn presence_changed(&self, identity: UserId, online: bool) {
            self.changes.lock().expect("changes").push((identity, online));
        }
    }

    impl RecordingSink {
        fn take(&self) -> Vec<(UserId, bool)> {
            std::mem::take(&mut *self.changes.lock().expect("changes"))
        }
    }

    fn hub_with_sink() -> (FanoutHub, Arc<RecordingSink>) {
        let hub = FanoutHub::default();
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn PresenceSink> = Arc::downgrade(&sink) as Weak<dyn PresenceSink>;
        assert!(hub.set_presence_sink(weak));
        (hub, sink)
    }

    #[test]
    fn first_stream_and_last_close_change_presence() {
        let (hub, sink) = hub_with_sink();

        let phone = hub.subscribe(1);
        let laptop = hub.subscribe(1);
        assert_eq!(sink.take(), vec![(1, true)]);

        drop(phone);
        assert!(sink.take().is_empty());
        assert_eq!(hub.connection_count(1), 1);

        drop(laptop);
        assert_eq!(sink.take(), vec![(1, false)]);
        assert!(hub.connected_identities().is_empty());
    }

    #[test]
    fn pruned_stream_still_reports_offline_once() {
        let (hub, sink) = hub_with_sink();
        let stream = hub.subscribe(2);
        sink.take();

        let Subscription { frames, lease, .. } = stream;
        drop(frames);
        assert_eq!(hub.broadcast(&[2], &envelope()), 0);
        assert!(sink.take().is_empty());

        drop(lease);
        assert_eq!(sink.take(), vec![(2, false)]);
    }

    #[tokio::test]
    async fn closing_a_transport_stream_reports_offline() {
        let (hub, sink) = hub_with_sink();
        let transport = HubTransport::new(hub.clone());

        let frames = transport.open(4).await.expect("open");
        assert_eq!(sink.take(), vec![(4, true)]);

        drop(frames);
        assert_eq!(sink.take(), vec![(4, false)]);
    }

    #[tokio::test]
    async fn transport_stream_yields_encoded_frames() {
        let hub = FanoutHub::default();
        let transport = HubTransport::new(hub.clone());
        let mut frames = transport.open(4).await.expect("open");

        hub.broadcast(&[4], &envelope());

        let raw = frames.next().await.expect("frame").expect("ok frame");
        let parsed = EventEnvelope::parse(&raw).expect("parse");
        assert_eq!(parsed.kind(), EventKind::Update);
    }
}
