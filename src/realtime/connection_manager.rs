//! Push-stream lifecycle for one identity.
//!
//! A single driver task owns the [`Connection`] model and the open stream.
//! Frames are handed to the [`FrameHandler`] one at a time in arrival order.
//! Control calls on [`ConnectionManager`] are queued to the driver and never
//! block.

use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::domain::{
    connection::{Connection, ConnectionStatus, ReconnectDecision, ReconnectPolicy},
    status::ConnectionSnapshot,
    UserId,
};

use super::status_tracker::ConnectionStatusTracker;

const STREAM_CONNECTING: &str = "STREAM_CONNECTING";
const STREAM_CONNECTED: &str = "STREAM_CONNECTED";
const STREAM_RECONNECT_SCHEDULED: &str = "STREAM_RECONNECT_SCHEDULED";
const STREAM_BACKOFF_EXHAUSTED: &str = "STREAM_BACKOFF_EXHAUSTED";
const STREAM_DISCONNECTED: &str = "STREAM_DISCONNECTED";
const STREAM_NETWORK_LOST: &str = "STREAM_NETWORK_LOST";
const STREAM_WORKER_STOPPED: &str = "STREAM_WORKER_STOPPED";
const STREAM_WORKER_JOIN_FAILED: &str = "STREAM_WORKER_JOIN_FAILED";
const STREAM_COMMAND_DROPPED: &str = "STREAM_COMMAND_DROPPED";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("push stream connect failed: {0}")]
    Connect(String),
    #[error("push stream connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("push stream broke: {0}")]
    Stream(String),
    #[error("push stream rejected the session credentials")]
    Unauthorized,
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "STREAM_CONNECT_FAILED",
            Self::Timeout(_) => "STREAM_TIMEOUT",
            Self::Stream(_) => "STREAM_BROKEN",
            Self::Unauthorized => "STREAM_UNAUTHORIZED",
        }
    }
}

/// Opens the server-push stream for an identity.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn open(&self, identity: UserId) -> Result<FrameStream, TransportError>;
}

/// Consumer of raw frames. Called from the driver task only, so frames are
/// never processed concurrently.
pub trait FrameHandler: Send + 'static {
    fn handle_frame(&mut self, raw: &str);

    /// Called each time a stream opens, before its first frame. Frames pushed
    /// while no stream was open are not replayed.
    fn stream_opened(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Reconnect,
    NetworkRecovered,
    NetworkLost,
    Shutdown(oneshot::Sender<()>),
}

pub struct ConnectionManager {
    identity: UserId,
    commands: mpsc::UnboundedSender<Command>,
    tracker: ConnectionStatusTracker,
    worker: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawns the driver task. The manager stays disconnected until
    /// [`connect`](Self::connect) is called.
    pub fn spawn<H>(
        identity: UserId,
        transport: Arc<dyn PushTransport>,
        handler: H,
        settings: ConnectionSettings,
    ) -> Self
    where
        H: FrameHandler,
    {
        let tracker = ConnectionStatusTracker::new(identity);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            connection: Connection::new(identity),
            settings,
            transport,
            handler,
            tracker: tracker.clone(),
            commands: command_rx,
            idle: IdleReason::NotStarted,
        };

        Self {
            identity,
            commands,
            tracker,
            worker: Some(tokio::spawn(driver.run())),
        }
    }

    pub fn identity(&self) -> UserId {
        self.identity
    }

    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Closes the stream and suppresses automatic reconnects, including the
    /// ones triggered by network recovery.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Manual reconnect: drops any current stream, resets the retry counter
    /// and connects immediately.
    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    pub fn network_recovered(&self) {
        self.send(Command::NetworkRecovered);
    }

    pub fn network_lost(&self) {
        self.send(Command::NetworkLost);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.tracker.status()
    }

    pub fn snapshot(&self) -> Option<ConnectionSnapshot> {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<ConnectionSnapshot> {
        self.tracker.subscribe()
    }

    pub fn tracker(&self) -> &ConnectionStatusTracker {
        &self.tracker
    }

    /// Closes the stream and waits for the driver task to finish.
    pub async fn shutdown(mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }

        if let Some(worker) = self.worker.take() {
            if let Err(error) = worker.await {
                tracing::warn!(
                    code = STREAM_WORKER_JOIN_FAILED,
                    identity = self.identity,
                    error = %error,
                    "push stream driver ended abnormally"
                );
            }
        }
    }

    fn send(&self, command: Command) {
        if let Err(error) = self.commands.send(command) {
            tracing::debug!(
                code = STREAM_COMMAND_DROPPED,
                identity = self.identity,
                command = ?error.0,
                "push stream driver is gone; command dropped"
            );
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleReason {
    NotStarted,
    UserClosed,
    Offline,
    Exhausted,
}

enum Phase {
    Idle,
    Connecting,
    Streaming(FrameStream),
    Backoff(Duration),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    Connecting,
    Streaming,
    Backoff,
}

struct Driver<H> {
    connection: Connection,
    settings: ConnectionSettings,
    transport: Arc<dyn PushTransport>,
    handler: H,
    tracker: ConnectionStatusTracker,
    commands: mpsc::UnboundedReceiver<Command>,
    idle: IdleReason,
}

impl<H: FrameHandler> Driver<H> {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Streaming(stream) => self.streaming(stream).await,
                Phase::Backoff(delay) => self.backoff(delay).await,
                Phase::Stopped => break,
            };
        }

        tracing::debug!(
            code = STREAM_WORKER_STOPPED,
            identity = self.connection.identity,
            "push stream driver stopped"
        );
    }

    async fn idle(&mut self) -> Phase {
        loop {
            let Some(command) = self.commands.recv().await else {
                return Phase::Stopped;
            };

            match command {
                Command::Connect | Command::Reconnect => {
                    self.connection.reset_attempts();
                    return Phase::Connecting;
                }
                Command::NetworkRecovered if self.idle == IdleReason::Offline => {
                    return Phase::Connecting;
                }
                Command::NetworkRecovered | Command::NetworkLost => {}
                Command::Disconnect => {
                    self.idle = IdleReason::UserClosed;
                }
                Command::Shutdown(ack) => {
                    let _ = ack.send(());
                    return Phase::Stopped;
                }
            }
        }
    }

    async fn connecting(&mut self) -> Phase {
        self.connection = self.connection.successor();
        self.tracker.on_connecting(&self.connection);
        tracing::info!(
            code = STREAM_CONNECTING,
            identity = self.connection.identity,
            attempt = self.connection.attempts,
            "opening push stream"
        );

        let transport = Arc::clone(&self.transport);
        let identity = self.connection.identity;
        let timeout = self.settings.connect_timeout;
        let open = tokio::time::timeout(timeout, async move { transport.open(identity).await });
        tokio::pin!(open);

        loop {
            tokio::select! {
                result = &mut open => {
                    return match result {
                        Ok(Ok(stream)) => {
                            self.connection.on_open();
                            self.tracker.on_connected(&self.connection);
                            tracing::info!(
                                code = STREAM_CONNECTED,
                                identity,
                                "push stream connected"
                            );
                            self.handler.stream_opened();
                            Phase::Streaming(stream)
                        }
                        Ok(Err(error)) => self.on_failure(error),
                        Err(_) => self.on_failure(TransportError::Timeout(timeout)),
                    };
                }
                command = self.commands.recv() => {
                    if let Some(phase) = self.on_command(command, Active::Connecting) {
                        return phase;
                    }
                }
            }
        }
    }

    async fn streaming(&mut self, mut stream: FrameStream) -> Phase {
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(raw)) => self.handler.handle_frame(&raw),
                    Some(Err(error)) => return self.on_failure(error),
                    None => {
                        return self.on_failure(TransportError::Stream(
                            "server closed the stream".to_owned(),
                        ))
                    }
                },
                command = self.commands.recv() => {
                    if let Some(phase) = self.on_command(command, Active::Streaming) {
                        return phase;
                    }
                }
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Phase::Connecting,
                command = self.commands.recv() => {
                    if let Some(phase) = self.on_command(command, Active::Backoff) {
                        return phase;
                    }
                }
            }
        }
    }

    fn on_failure(&mut self, error: TransportError) -> Phase {
        let identity = self.connection.identity;
        match self.connection.on_transport_error(&self.settings.policy) {
            ReconnectDecision::RetryAfter(delay) => {
                self.tracker.on_error(&self.connection, error.code());
                tracing::warn!(
                    code = STREAM_RECONNECT_SCHEDULED,
                    identity,
                    attempts = self.connection.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "push stream failed; reconnect scheduled"
                );
                Phase::Backoff(delay)
            }
            ReconnectDecision::Exhausted => {
                self.tracker.on_error(&self.connection, error.code());
                self.tracker.on_exhausted(&self.connection);
                self.idle = IdleReason::Exhausted;
                tracing::error!(
                    code = STREAM_BACKOFF_EXHAUSTED,
                    identity,
                    attempts = self.connection.attempts,
                    error = %error,
                    "push stream retry budget exhausted; waiting for manual reconnect"
                );
                Phase::Idle
            }
        }
    }

    /// Handles a control command while a stream is open or pending.
    /// Returns the next phase, or None to keep the current one.
    fn on_command(&mut self, command: Option<Command>, active: Active) -> Option<Phase> {
        let identity = self.connection.identity;
        let Some(command) = command else {
            return Some(Phase::Stopped);
        };

        match command {
            Command::Connect => None,
            Command::NetworkRecovered if active == Active::Backoff => Some(Phase::Connecting),
            Command::NetworkRecovered => None,
            Command::Reconnect => {
                self.connection.reset_attempts();
                Some(Phase::Connecting)
            }
            Command::NetworkLost => {
                self.close(IdleReason::Offline);
                tracing::info!(
                    code = STREAM_NETWORK_LOST,
                    identity,
                    "network lost; push stream parked"
                );
                Some(Phase::Idle)
            }
            Command::Disconnect => {
                self.close(IdleReason::UserClosed);
                tracing::info!(
                    code = STREAM_DISCONNECTED,
                    identity,
                    "push stream closed by request"
                );
                Some(Phase::Idle)
            }
            Command::Shutdown(ack) => {
                self.close(IdleReason::UserClosed);
                let _ = ack.send(());
                Some(Phase::Stopped)
            }
        }
    }

    fn close(&mut self, reason: IdleReason) {
        self.connection.on_closed();
        self.tracker.on_disconnected(&self.connection);
        self.idle = reason;
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use futures::stream;
    use tokio::time::{sleep, Instant};

    use super::*;

    enum Script {
        Fail,
        Hang,
        Open { frames: Vec<&'static str>, keep_open: bool },
    }

    struct ScriptedTransport {
        script: Mutex<VecDeque<Script>>,
        opened_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                opened_at: Mutex::new(Vec::new()),
            })
        }

        fn push(&self, step: Script) {
            self.script.lock().expect("script lock").push_back(step);
        }

        fn open_offsets(&self, start: Instant) -> Vec<Duration> {
            self.opened_at
                .lock()
                .expect("opened lock")
                .iter()
                .map(|at| at.duration_since(start))
                .collect()
        }

        fn open_count(&self) -> usize {
            self.opened_at.lock().expect("opened lock").len()
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn open(&self, _identity: UserId) -> Result<FrameStream, TransportError> {
            self.opened_at
                .lock()
                .expect("opened lock")
                .push(Instant::now());
            let step = self.script.lock().expect("script lock").pop_front();

            match step {
                Some(Script::Open { frames, keep_open }) => {
                    let frames = stream::iter(
                        frames
                            .into_iter()
                            .map(|frame| Ok::<_, TransportError>(frame.to_owned()))
                            .collect::<Vec<_>>(),
                    );
                    if keep_open {
                        Ok(Box::pin(frames.chain(stream::pending())))
                    } else {
                        Ok(Box::pin(frames))
                    }
                }
                Some(Script::Hang) => futures::future::pending().await,
                Some(Script::Fail) | None => {
                    Err(TransportError::Connect("connection refused".to_owned()))
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingHandler {
        frames: Arc<Mutex<Vec<String>>>,
        opens: Arc<Mutex<usize>>,
    }

    impl FrameHandler for RecordingHandler {
        fn handle_frame(&mut self, raw: &str) {
            self.frames.lock().expect("frames lock").push(raw.to_owned());
        }

        fn stream_opened(&mut self) {
            *self.opens.lock().expect("opens lock") += 1;
        }
    }

    fn open(frames: Vec<&'static str>) -> Script {
        Script::Open {
            frames,
            keep_open: true,
        }
    }

    fn manager(transport: &Arc<ScriptedTransport>, handler: RecordingHandler) -> ConnectionManager {
        let transport: Arc<dyn PushTransport> = transport.clone();
        ConnectionManager::spawn(7, transport, handler, ConnectionSettings::default())
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_delivers_frames_in_order() {
        let transport = ScriptedTransport::new(vec![open(vec!["a", "b", "c"])]);
        let handler = RecordingHandler::default();
        let manager = manager(&transport, handler.clone());

        manager.connect();
        settle().await;

        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(
            *handler.frames.lock().expect("frames lock"),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stays_disconnected_until_connect_is_called() {
        let transport = ScriptedTransport::new(vec![open(vec![])]);
        let manager = manager(&transport, RecordingHandler::default());

        settle().await;

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_doubling_delays_then_gives_up() {
        let transport = ScriptedTransport::new(vec![]);
        let manager = manager(&transport, RecordingHandler::default());
        let start = Instant::now();

        manager.connect();
        sleep(Duration::from_secs(120)).await;

        let offsets = transport.open_offsets(start);
        let gaps: Vec<_> = offsets.windows(2).map(|pair| pair[1] - pair[0]).collect();
        assert_eq!(offsets.len(), 5);
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );

        let snapshot = manager.snapshot().expect("snapshot");
        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.attempts, 5);
        assert!(snapshot.manual_reconnect_required);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_after_exhaustion_resets_attempts() {
        let transport = ScriptedTransport::new(vec![]);
        let manager = manager(&transport, RecordingHandler::default());
        manager.connect();
        sleep(Duration::from_secs(120)).await;

        transport.push(open(vec![]));
        manager.reconnect();
        settle().await;

        let snapshot = manager.snapshot().expect("snapshot");
        assert_eq!(snapshot.status, ConnectionStatus::Connected);
        assert_eq!(snapshot.attempts, 0);
        assert!(!snapshot.manual_reconnect_required);
    }

    #[tokio::test(start_paused = true)]
    async fn network_recovery_skips_pending_backoff() {
        let transport = ScriptedTransport::new(vec![Script::Fail, open(vec![])]);
        let manager = manager(&transport, RecordingHandler::default());
        let start = Instant::now();

        manager.connect();
        settle().await;
        assert_eq!(manager.status(), ConnectionStatus::Error);

        manager.network_recovered();
        settle().await;

        assert_eq!(manager.status(), ConnectionStatus::Connected);
        let offsets = transport.open_offsets(start);
        assert!(offsets[1] < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn network_recovery_after_exhaustion_does_not_reconnect() {
        let transport = ScriptedTransport::new(vec![]);
        let manager = manager(&transport, RecordingHandler::default());
        manager.connect();
        sleep(Duration::from_secs(120)).await;

        manager.network_recovered();
        sleep(Duration::from_secs(60)).await;

        assert_eq!(transport.open_count(), 5);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_disconnect_suppresses_network_recovery() {
        let transport = ScriptedTransport::new(vec![open(vec![]), open(vec![])]);
        let manager = manager(&transport, RecordingHandler::default());
        manager.connect();
        settle().await;

        manager.disconnect();
        manager.network_recovered();
        sleep(Duration::from_secs(30)).await;

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_loss_parks_without_consuming_attempts() {
        let transport = ScriptedTransport::new(vec![open(vec![]), open(vec![])]);
        let manager = manager(&transport, RecordingHandler::default());
        manager.connect();
        settle().await;

        manager.network_lost();
        settle().await;
        let parked = manager.snapshot().expect("snapshot");
        assert_eq!(parked.status, ConnectionStatus::Disconnected);
        assert_eq!(parked.attempts, 0);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.open_count(), 1);

        manager.network_recovered();
        settle().await;

        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_counts_as_transport_error() {
        let transport = ScriptedTransport::new(vec![Script::Hang, open(vec![])]);
        let manager = manager(&transport, RecordingHandler::default());
        let start = Instant::now();

        manager.connect();
        sleep(Duration::from_millis(5_500)).await;

        let snapshot = manager.snapshot().expect("snapshot");
        assert_eq!(snapshot.status, ConnectionStatus::Error);
        assert_eq!(
            snapshot.last_error.map(|error| error.code),
            Some("STREAM_TIMEOUT".to_owned())
        );

        sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        let offsets = transport.open_offsets(start);
        assert_eq!(offsets.len(), 2);
        assert!(offsets[1] >= Duration::from_secs(6));
        assert!(offsets[1] < Duration::from_millis(6_100));
    }

    #[tokio::test(start_paused = true)]
    async fn server_closing_the_stream_triggers_a_reconnect() {
        let transport = ScriptedTransport::new(vec![
            Script::Open {
                frames: vec!["x"],
                keep_open: false,
            },
            open(vec!["y"]),
        ]);
        let handler = RecordingHandler::default();
        let manager = manager(&transport, handler.clone());

        manager.connect();
        sleep(Duration::from_millis(1_500)).await;

        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(
            *handler.frames.lock().expect("frames lock"),
            vec!["x".to_owned(), "y".to_owned()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn every_opened_stream_is_reported_before_its_frames() {
        let transport = ScriptedTransport::new(vec![open(vec!["a"]), open(vec!["b"])]);
        let handler = RecordingHandler::default();
        let manager = manager(&transport, handler.clone());

        manager.connect();
        settle().await;
        assert_eq!(*handler.opens.lock().expect("opens lock"), 1);

        manager.network_lost();
        settle().await;
        manager.network_recovered();
        settle().await;

        assert_eq!(*handler.opens.lock().expect("opens lock"), 2);
        assert_eq!(
            *handler.frames.lock().expect("frames lock"),
            vec!["a".to_owned(), "b".to_owned()]
        );
        manager.shutdown().await;
    }
}
