//! Crate-wide fixed constants. Kept separate from `Config` because these are
//! protocol invariants, not operator-tunable knobs.

use std::time::Duration;

/// Max number of queued client frames a [`crate::registry::BackendSession`]
/// holds while the backend socket isn't ready yet. Oldest frame is dropped
/// on overflow.
pub const PENDING_QUEUE_MAX: usize = 100;

/// A session with no activity for this long is considered stale and swept
/// by the cleanup scheduler.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Interval between cleanup scheduler sweeps.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Max time an app may spend in the `starting` state before the supervisor
/// gives up and reports a startup failure.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Max accepted length of an HTTP request path.
pub const MAX_PATH: usize = 1000;

/// Max accepted length of an HTTP request query string.
pub const MAX_QUERY: usize = 2048;

/// Max accepted WebSocket frame payload size, in bytes.
pub const MAX_WS_FRAME: usize = 1024 * 1024;

/// Interval at which the port allocator / supervisor poll a starting
/// backend's loopback port for readiness.
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default health-check loop interval, overridable via [`crate::config::Config`].
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Default delay before restarting a crashed resident app.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Default public proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 3838;

/// Default management/admin API port.
pub const DEFAULT_MANAGEMENT_PORT: u16 = 3839;

/// Default proxy bind host.
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";
