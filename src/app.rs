use std::{collections::BTreeMap, fmt, fs, path::Path, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;

use crate::{
    cli::{Cli, Command},
    domain::{self, status::ConnectionSnapshot, UserId},
    infra::{self, config::AppConfig, error::AppError, http_api::HttpApi, sse::HttpPushTransport},
    realtime::{
        self,
        router::{Dispatch, SessionSignal},
    },
    server::{self, InProcessServer},
    session::{Session, SessionPorts},
    usecases::{self, bootstrap, context::AppContext},
};

const LISTEN_BOOTSTRAP_FAILED: &str = "LISTEN_BOOTSTRAP_FAILED";
const LISTEN_STATUS_CHANGED: &str = "LISTEN_STATUS_CHANGED";
const LISTEN_SIGNAL: &str = "LISTEN_SIGNAL";
const LISTEN_SIGNALS_LAGGED: &str = "LISTEN_SIGNALS_LAGGED";
const LISTEN_CTRL_C_FAILED: &str = "LISTEN_CTRL_C_FAILED";

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn run(cli: Cli) -> Result<()> {
    let context = bootstrap::bootstrap(cli.config.as_deref())?;
    tracing::debug!(
        domain = domain::module_name(),
        realtime = realtime::module_name(),
        server = server::module_name(),
        usecases = usecases::module_name(),
        infra = infra::module_name(),
        "module boundaries loaded"
    );

    let identity = context.resolve_identity(cli.identity)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command_or_default() {
        Command::Listen => runtime.block_on(listen(&context, identity))?,
        Command::Replay { frames } => {
            let lines = read_frame_log(&frames)?;
            let summary =
                runtime.block_on(replay_frames(&context.config, identity, lines.lines()));
            println!("{summary}");
        }
    }

    Ok(())
}

async fn listen(context: &AppContext, identity: UserId) -> Result<()> {
    let config = &context.config;
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(config.stream.connect_timeout_ms))
        .build()
        .map_err(AppError::HttpClient)?;
    let token = config.api.auth_token.clone();
    let api = Arc::new(HttpApi::new(
        client.clone(),
        config.api.base_url.clone(),
        token.clone(),
    ));
    let transport = Arc::new(HttpPushTransport::new(
        client,
        config.stream.url.clone(),
        token,
    ));

    let session = Session::start(
        config.session_settings(identity),
        SessionPorts {
            chat: api.clone(),
            notifications: api,
            transport,
        },
    );
    match session.bootstrap().await {
        Ok(conversations) => tracing::info!(
            identity,
            conversations,
            unread = session.chat().total_unread(),
            notifications = session.notifications().unread_count(),
            "session bootstrapped"
        ),
        Err(error) => tracing::warn!(
            code = LISTEN_BOOTSTRAP_FAILED,
            identity,
            error = ?error,
            "conversation list unavailable; waiting for live updates"
        ),
    }

    let mut signals = session.subscribe_signals();
    let statuses = session.connection().subscribe();
    let mut poll = tokio::time::interval(STATUS_POLL_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(error) = result {
                    tracing::warn!(code = LISTEN_CTRL_C_FAILED, error = %error, "ctrl-c handler failed");
                }
                break;
            }
            signal = signals.recv() => match signal {
                Ok(signal) => log_signal(&signal),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(code = LISTEN_SIGNALS_LAGGED, skipped, "session signals dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = poll.tick() => {
                while let Ok(snapshot) = statuses.try_recv() {
                    log_snapshot(&snapshot);
                }
            }
        }
    }

    session.dispose().await;
    Ok(())
}

fn log_signal(signal: &SessionSignal) {
    match signal {
        SessionSignal::System(action) => {
            tracing::info!(code = LISTEN_SIGNAL, action = ?action, "system action received")
        }
        SessionSignal::EntityUpdated { entity } => {
            tracing::info!(code = LISTEN_SIGNAL, entity = %entity, "entity updated")
        }
        SessionSignal::ConversationListStale => {
            tracing::debug!(code = LISTEN_SIGNAL, "conversation list refresh requested")
        }
        SessionSignal::StreamOpened => {
            tracing::debug!(code = LISTEN_SIGNAL, "push stream opened; resyncing")
        }
    }
}

fn log_snapshot(snapshot: &ConnectionSnapshot) {
    tracing::info!(
        code = LISTEN_STATUS_CHANGED,
        identity = snapshot.identity,
        status = snapshot.status.as_label(),
        attempts = snapshot.attempts,
        manual_reconnect_required = snapshot.manual_reconnect_required,
        last_error = snapshot.last_error.as_ref().map(|error| error.code.as_str()),
        "push connection status"
    );
}

fn read_frame_log(path: &Path) -> Result<String, AppError> {
    fs::read_to_string(path).map_err(|source| AppError::FrameLogRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Outcome of routing a recorded frame log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub frames: usize,
    pub handled: BTreeMap<&'static str, usize>,
    pub ignored: usize,
    pub malformed: usize,
    pub cached_messages: usize,
    pub notifications: usize,
    pub unread_notifications: usize,
    pub online_users: Vec<UserId>,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "frames: {} (ignored {}, malformed {})",
            self.frames, self.ignored, self.malformed
        )?;
        for (kind, count) in &self.handled {
            writeln!(f, "  {kind}: {count}")?;
        }
        writeln!(f, "cached messages: {}", self.cached_messages)?;
        writeln!(
            f,
            "notifications: {} ({} unread)",
            self.notifications, self.unread_notifications
        )?;
        write!(f, "online users: {:?}", self.online_users)
    }
}

/// Routes each non-blank line as one push frame into a fresh session backed
/// by an empty in-process server.
pub async fn replay_frames<'a>(
    config: &AppConfig,
    identity: UserId,
    lines: impl IntoIterator<Item = &'a str>,
) -> ReplaySummary {
    let server = InProcessServer::default();
    let api = server.api_for(identity);
    let session = Session::new(
        config.session_settings(identity),
        SessionPorts {
            chat: api.clone(),
            notifications: api,
            transport: server.transport(),
        },
    );

    let mut summary = ReplaySummary::default();
    for line in lines.into_iter().map(str::trim).filter(|line| !line.is_empty()) {
        summary.frames += 1;
        match session.router().route_frame(line) {
            Dispatch::Handled(kind) => *summary.handled.entry(kind.as_wire()).or_default() += 1,
            Dispatch::Ignored(_) => summary.ignored += 1,
            Dispatch::Malformed => summary.malformed += 1,
        }
    }

    summary.cached_messages = session.chat().cached_message_count();
    summary.notifications = session.notifications().notifications().len();
    summary.unread_notifications = session.notifications().unread_count();
    summary.online_users = session.presence().online_users();

    session.dispose().await;
    summary
}
