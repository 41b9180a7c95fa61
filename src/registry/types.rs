//! Data model entities owned by the [`super::Registry`] (§3).

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Instant;

use axum::extract::ws::Message;
use tokio::sync::mpsc::UnboundedSender;

use crate::constants::STARTUP_TIMEOUT;

/// Declared app configuration. Immutable after config load.
#[derive(Debug, Clone)]
pub struct AppSpec {
    pub name: String,
    pub path: String,
    pub resident: bool,
    pub port: u16,
}

/// Runtime handle for a running backend process.
#[derive(Debug)]
pub struct AppProcess {
    pub pid: u32,
    pub child: tokio::process::Child,
    pub stdout_log: String,
    pub stderr_log: String,
    pub spawned_at: Instant,
}

impl AppProcess {
    /// True if the OS process has not exited. Reaps the child if it has,
    /// per `tokio::process::Child::try_wait`'s contract.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// State of an app mid-transition from dormant to ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPhase {
    Starting,
    Timeout,
}

/// Tracks an app's progress from spawn to ready, self-expiring into
/// [`StartupPhase::Timeout`] once [`STARTUP_TIMEOUT`] has elapsed.
#[derive(Debug, Clone)]
pub struct AppStartupState {
    pub started_at: Instant,
}

impl AppStartupState {
    pub fn new(started_at: Instant) -> Self {
        Self { started_at }
    }

    /// The phase as observed *right now*: `Starting` until the deadline,
    /// `Timeout` exactly once it has passed.
    pub fn phase(&self, now: Instant) -> StartupPhase {
        if now.saturating_duration_since(self.started_at) >= STARTUP_TIMEOUT {
            StartupPhase::Timeout
        } else {
            StartupPhase::Starting
        }
    }
}

/// One live public WebSocket connection.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub session_id: String,
    pub app_name: String,
    pub client_ip: IpAddr,
    pub user_agent: String,
    pub created_at: Instant,
    pub last_activity: Instant,
    /// Channel into the task that owns the client-side socket's write half.
    pub sender: UnboundedSender<Message>,
}

/// The supervisor-owned WebSocket to a backend, paired 1:1 with a
/// [`ClientSession`] by `session_id`.
#[derive(Debug)]
pub struct BackendSession {
    pub session_id: String,
    pub ready: bool,
    pub pending: VecDeque<String>,
    pub last_activity: Instant,
    /// Channel into the task that owns the backend-side socket's write half.
    /// `None` until the backend connection is actually dialed. Uses
    /// tungstenite's own message type since that's what the backend client
    /// socket speaks; no value in bridging it through axum's type too.
    pub sender: Option<UnboundedSender<tokio_tungstenite::tungstenite::Message>>,
}

impl BackendSession {
    pub fn new(session_id: String, now: Instant) -> Self {
        Self {
            session_id,
            ready: false,
            pending: VecDeque::new(),
            last_activity: now,
            sender: None,
        }
    }
}

/// Snapshot of metadata needed to register a new [`ClientSession`].
#[derive(Debug, Clone)]
pub struct ClientSessionInfo {
    pub app_name: String,
    pub client_ip: IpAddr,
    pub user_agent: String,
}
