//! The Registry (C1): the single source of truth for live app state. All
//! mutation goes through here so the session map and its derived counter
//! cache always move together (§3 "Ownership summary").
//!
//! Guarded by one `std::sync::Mutex` rather than the per-key locking a
//! `dashmap::DashMap` would give, because several operations here need to
//! touch the session map and the counter cache as a single atomic step —
//! exactly the kind of cross-key invariant a sharded map can't provide.

mod types;

pub use types::{
    AppProcess, AppSpec, AppStartupState, BackendSession, ClientSession, ClientSessionInfo,
    StartupPhase,
};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, warn};

use crate::constants::PENDING_QUEUE_MAX;

#[derive(Debug, Default)]
struct Inner {
    apps: HashMap<String, AppSpec>,
    processes: HashMap<String, AppProcess>,
    startup: HashMap<String, AppStartupState>,
    client_sessions: HashMap<String, ClientSession>,
    backend_sessions: HashMap<String, BackendSession>,
    counts: HashMap<String, u64>,
    /// Set when an app's process went away unexpectedly (spawn failure,
    /// readiness timeout, or a health-loop death detection) rather than
    /// through a deliberate stop. Cleared on the next successful spawn and
    /// on any deliberate stop.
    crashed: HashMap<String, bool>,
}

/// Result of [`Registry::audit_counts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub consistent: bool,
    /// `(app_name, cached, actual)` for every app whose cache disagreed.
    pub inconsistencies: Vec<(String, u64, u64)>,
}

/// Read-only view of one app's status, used by `/api/apps` and the admin API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AppStatusView {
    pub name: String,
    pub resident: bool,
    pub port: u16,
    pub running: bool,
    pub starting: bool,
    pub crashed: bool,
    pub client_count: u64,
}

impl AppStatusView {
    /// One of `starting`, `running`, `crashed`, `stopped`, `dormant` — the
    /// same classification `/api/apps` and the landing page both use.
    ///
    /// `crashed` means the last time this app's process went away it was
    /// unexpected (spawn failure, readiness timeout, or a death the health
    /// loop detected). `stopped` is a resident app with no process that
    /// wasn't crashed — deliberately stopped (admin restart's teardown
    /// step, graceful shutdown) and not yet respawned. A non-resident app
    /// with no process and no crash on record is just `dormant`.
    pub fn status_class(&self) -> &'static str {
        if self.starting {
            "starting"
        } else if self.running {
            "running"
        } else if self.crashed {
            "crashed"
        } else if self.resident {
            "stopped"
        } else {
            "dormant"
        }
    }
}

pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Build a registry pre-populated with the app specs loaded from config.
    /// Specs are immutable afterwards (§3).
    pub fn new(apps: Vec<AppSpec>) -> Self {
        let mut by_name = HashMap::with_capacity(apps.len());
        let mut counts = HashMap::with_capacity(apps.len());
        for app in apps {
            counts.insert(app.name.clone(), 0);
            by_name.insert(app.name.clone(), app);
        }
        Self {
            inner: Mutex::new(Inner {
                apps: by_name,
                counts,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- AppSpec (read-only) ----------------------------------------

    pub fn get_app(&self, name: &str) -> Option<AppSpec> {
        self.lock().apps.get(name).cloned()
    }

    pub fn app_names(&self) -> Vec<String> {
        self.lock().apps.keys().cloned().collect()
    }

    pub fn app_exists(&self, name: &str) -> bool {
        self.lock().apps.contains_key(name)
    }

    // ---- Client sessions ----------------------------------------------

    /// Idempotent: the first call for a given id inserts and increments the
    /// per-app counter; later calls with the same id just refresh the
    /// session's metadata. Rejects a malformed id (§4.1 "rejects null id")
    /// without touching the map.
    pub fn add_client_session(&self, session: ClientSession) -> bool {
        if crate::validation::validate_session_id(&session.session_id).is_err() {
            warn!(session_id = %session.session_id, "rejected client session with malformed id");
            return false;
        }
        let mut inner = self.lock();
        let is_new = !inner.client_sessions.contains_key(&session.session_id);
        if is_new {
            *inner.counts.entry(session.app_name.clone()).or_insert(0) += 1;
            debug!(app = %session.app_name, session_id = %session.session_id, "client session added");
        } else {
            // Refresh mutable metadata on the existing entry without touching
            // the counter.
            if let Some(existing) = inner.client_sessions.get_mut(&session.session_id) {
                existing.client_ip = session.client_ip;
                existing.user_agent = session.user_agent.clone();
                existing.last_activity = session.last_activity;
            }
        }
        inner.client_sessions.insert(session.session_id.clone(), session);
        is_new
    }

    /// Idempotent: returns `true` only for the call that actually removes
    /// the session. Decrements the per-app counter, floored at zero.
    pub fn remove_client_session(&self, id: &str) -> bool {
        let mut inner = self.lock();
        match inner.client_sessions.remove(id) {
            Some(session) => {
                let counter = inner.counts.entry(session.app_name.clone()).or_insert(0);
                *counter = counter.saturating_sub(1);
                debug!(app = %session.app_name, session_id = %id, "client session removed");
                true
            }
            None => false,
        }
    }

    pub fn get_client_session(&self, id: &str) -> Option<ClientSession> {
        self.lock().client_sessions.get(id).cloned()
    }

    pub fn touch_client_session(&self, id: &str, now: Instant) {
        let mut inner = self.lock();
        if let Some(session) = inner.client_sessions.get_mut(id) {
            session.last_activity = now;
        }
    }

    pub fn get_client_count(&self, app_name: &str) -> u64 {
        self.lock().counts.get(app_name).copied().unwrap_or(0)
    }

    /// Recomputes every app's client count from the session map. When `fix`
    /// is true, overwrites the cache with the recomputed values.
    pub fn audit_counts(&self, fix: bool) -> AuditReport {
        let mut inner = self.lock();
        let mut actual: HashMap<String, u64> = HashMap::new();
        for session in inner.client_sessions.values() {
            *actual.entry(session.app_name.clone()).or_insert(0) += 1;
        }

        let mut inconsistencies = Vec::new();
        let app_names: Vec<String> = inner.apps.keys().cloned().collect();
        for name in &app_names {
            let cached = inner.counts.get(name).copied().unwrap_or(0);
            let real = actual.get(name).copied().unwrap_or(0);
            if cached != real {
                inconsistencies.push((name.clone(), cached, real));
            }
        }

        if fix {
            for (name, _, real) in &inconsistencies {
                inner.counts.insert(name.clone(), *real);
            }
            if !inconsistencies.is_empty() {
                warn!(count = inconsistencies.len(), "repaired connection count drift");
            }
        }

        AuditReport {
            consistent: inconsistencies.is_empty(),
            inconsistencies,
        }
    }

    // ---- Backend sessions -----------------------------------------------

    /// Idempotent: returns `true` only when inserting a session that did not
    /// already exist. Rejects a malformed id, same contract as
    /// [`Registry::add_client_session`] — both sides of a pair share one id.
    pub fn add_backend_session(&self, session: BackendSession) -> bool {
        if crate::validation::validate_session_id(&session.session_id).is_err() {
            warn!(session_id = %session.session_id, "rejected backend session with malformed id");
            return false;
        }
        let mut inner = self.lock();
        let is_new = !inner.backend_sessions.contains_key(&session.session_id);
        inner
            .backend_sessions
            .insert(session.session_id.clone(), session);
        is_new
    }

    pub fn remove_backend_session(&self, id: &str) -> bool {
        self.lock().backend_sessions.remove(id).is_some()
    }

    pub fn has_backend_session(&self, id: &str) -> bool {
        self.lock().backend_sessions.contains_key(id)
    }

    pub fn backend_session_ready(&self, id: &str) -> bool {
        self.lock()
            .backend_sessions
            .get(id)
            .map(|s| s.ready)
            .unwrap_or(false)
    }

    /// Drains the pending FIFO into `sender` and marks the session ready, all
    /// under one lock acquisition. [`Registry::backend_session_ready`] also
    /// takes this lock to read `ready`, so a concurrent direct send (which
    /// only proceeds once it observes `ready == true`) cannot reach `sender`
    /// until every previously-queued frame has already been pushed onto it —
    /// otherwise a frame sent right after this call could overtake the
    /// frames queued before it.
    pub fn mark_backend_ready(
        &self,
        id: &str,
        sender: &tokio::sync::mpsc::UnboundedSender<tokio_tungstenite::tungstenite::Message>,
    ) {
        let mut inner = self.lock();
        if let Some(session) = inner.backend_sessions.get_mut(id) {
            let pending = std::mem::take(&mut session.pending);
            for frame in pending {
                let _ = sender.send(tokio_tungstenite::tungstenite::Message::Text(frame.into()));
            }
            session.ready = true;
        }
    }

    pub fn set_backend_sender(
        &self,
        id: &str,
        sender: tokio::sync::mpsc::UnboundedSender<tokio_tungstenite::tungstenite::Message>,
    ) {
        let mut inner = self.lock();
        if let Some(session) = inner.backend_sessions.get_mut(id) {
            session.sender = Some(sender);
        }
    }

    pub fn backend_sender(
        &self,
        id: &str,
    ) -> Option<tokio::sync::mpsc::UnboundedSender<tokio_tungstenite::tungstenite::Message>> {
        self.lock()
            .backend_sessions
            .get(id)
            .and_then(|s| s.sender.clone())
    }

    pub fn touch_backend_session(&self, id: &str, now: Instant) {
        let mut inner = self.lock();
        if let Some(session) = inner.backend_sessions.get_mut(id) {
            session.last_activity = now;
        }
    }

    /// Appends `frame` to the pending FIFO, dropping the oldest frame first
    /// if the queue is already at [`PENDING_QUEUE_MAX`]. Returns `true` if a
    /// frame was dropped to make room.
    pub fn enqueue_pending(&self, id: &str, frame: String) -> bool {
        let mut inner = self.lock();
        let mut dropped = false;
        if let Some(session) = inner.backend_sessions.get_mut(id) {
            if session.pending.len() >= PENDING_QUEUE_MAX {
                session.pending.pop_front();
                dropped = true;
            }
            session.pending.push_back(frame);
        }
        dropped
    }

    // ---- App processes ----------------------------------------------------

    pub fn add_process(&self, name: &str, process: AppProcess) -> bool {
        let mut inner = self.lock();
        let is_new = !inner.processes.contains_key(name);
        inner.processes.insert(name.to_string(), process);
        is_new
    }

    pub fn remove_process(&self, name: &str) -> Option<AppProcess> {
        self.lock().processes.remove(name)
    }

    pub fn has_process(&self, name: &str) -> bool {
        self.lock().processes.contains_key(name)
    }

    pub fn process_pid(&self, name: &str) -> Option<u32> {
        self.lock().processes.get(name).map(|p| p.pid)
    }

    /// Marks `name`'s last process exit as unexpected, so the next status
    /// read reports `crashed` instead of `stopped`/`dormant`.
    pub fn mark_crashed(&self, name: &str) {
        self.lock().crashed.insert(name.to_string(), true);
    }

    /// Clears the crash marker — called on a deliberate stop and on a
    /// successful (re)spawn.
    pub fn clear_crashed(&self, name: &str) {
        self.lock().crashed.insert(name.to_string(), false);
    }

    /// Reaps and returns the names of apps whose recorded process has
    /// exited, without removing them (the caller, the supervisor's health
    /// loop, decides what cleanup follows).
    pub fn dead_process_names(&self) -> Vec<String> {
        let mut inner = self.lock();
        inner
            .processes
            .iter_mut()
            .filter(|(_, proc)| !proc.is_alive())
            .map(|(name, _)| name.clone())
            .collect()
    }

    // ---- Startup state ------------------------------------------------

    pub fn set_starting(&self, app: &str, now: Instant) {
        self.lock()
            .startup
            .insert(app.to_string(), AppStartupState::new(now));
    }

    pub fn clear_startup(&self, app: &str) {
        self.lock().startup.remove(app);
    }

    /// True while the app is in the `starting` phase. Self-expires: once the
    /// deadline passes this returns `false` and the entry is cleared (the
    /// timeout is surfaced exactly once via [`Registry::get_startup_state`]).
    pub fn is_starting(&self, app: &str) -> bool {
        matches!(self.get_startup_state(app, Instant::now()), Some(StartupPhase::Starting))
    }

    /// Reads the startup phase, if any. Observing `Timeout` clears the
    /// entry as a side effect, per §4.1's self-expiry contract.
    pub fn get_startup_state(&self, app: &str, now: Instant) -> Option<StartupPhase> {
        let mut inner = self.lock();
        let phase = inner.startup.get(app).map(|s| s.phase(now))?;
        if phase == StartupPhase::Timeout {
            inner.startup.remove(app);
        }
        Some(phase)
    }

    // ---- Aggregate views -----------------------------------------------

    pub fn snapshot_apps(&self) -> Vec<AppStatusView> {
        let inner = self.lock();
        let now = Instant::now();
        let mut views: Vec<AppStatusView> = inner
            .apps
            .values()
            .map(|spec| AppStatusView {
                name: spec.name.clone(),
                resident: spec.resident,
                port: spec.port,
                running: inner.processes.contains_key(&spec.name),
                starting: inner
                    .startup
                    .get(&spec.name)
                    .map(|s| s.phase(now) == StartupPhase::Starting)
                    .unwrap_or(false),
                crashed: inner.crashed.get(&spec.name).copied().unwrap_or(false),
                client_count: inner.counts.get(&spec.name).copied().unwrap_or(0),
            })
            .collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views
    }

    /// All client session ids bound to `app_name`, for teardown sweeps.
    pub fn client_sessions_for_app(&self, app_name: &str) -> Vec<String> {
        self.lock()
            .client_sessions
            .values()
            .filter(|s| s.app_name == app_name)
            .map(|s| s.session_id.clone())
            .collect()
    }

    /// Every client session whose `last_activity` is older than `cutoff`.
    pub fn stale_client_sessions(&self, cutoff: Instant) -> Vec<String> {
        self.lock()
            .client_sessions
            .values()
            .filter(|s| s.last_activity < cutoff)
            .map(|s| s.session_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    /// A syntactically valid 64-hex session id, distinguishable by its last
    /// digit so tests can tell sessions apart.
    fn sid(n: u8) -> String {
        format!("{}{n}", "a".repeat(63))
    }

    fn test_app(name: &str) -> AppSpec {
        AppSpec {
            name: name.to_string(),
            path: "/tmp/app".to_string(),
            resident: false,
            port: 9000,
        }
    }

    fn resident_app(name: &str) -> AppSpec {
        AppSpec {
            resident: true,
            ..test_app(name)
        }
    }

    fn fake_client_session(id: &str, app: &str) -> ClientSession {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let now = Instant::now();
        ClientSession {
            session_id: id.to_string(),
            app_name: app.to_string(),
            client_ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            user_agent: "test-agent".to_string(),
            created_at: now,
            last_activity: now,
            sender: tx,
        }
    }

    #[test]
    fn add_client_session_is_idempotent_on_the_counter() {
        let registry = Registry::new(vec![test_app("a")]);
        assert!(registry.add_client_session(fake_client_session(&sid(1), "a")));
        assert_eq!(registry.get_client_count("a"), 1);

        // second call with the same id updates metadata, does not double-count
        assert!(!registry.add_client_session(fake_client_session(&sid(1), "a")));
        assert_eq!(registry.get_client_count("a"), 1);
    }

    #[test]
    fn add_client_session_rejects_a_malformed_id() {
        let registry = Registry::new(vec![test_app("a")]);
        assert!(!registry.add_client_session(fake_client_session("not-hex-64", "a")));
        assert_eq!(registry.get_client_count("a"), 0);
    }

    #[test]
    fn remove_client_session_is_idempotent() {
        let registry = Registry::new(vec![test_app("a")]);
        registry.add_client_session(fake_client_session(&sid(1), "a"));
        assert!(registry.remove_client_session(&sid(1)));
        assert!(!registry.remove_client_session(&sid(1)));
        assert_eq!(registry.get_client_count("a"), 0);
    }

    #[test]
    fn counter_floors_at_zero() {
        let registry = Registry::new(vec![test_app("a")]);
        assert!(!registry.remove_client_session("never-added"));
        assert_eq!(registry.get_client_count("a"), 0);
    }

    #[test]
    fn audit_counts_detects_and_repairs_drift() {
        let registry = Registry::new(vec![test_app("a")]);
        registry.add_client_session(fake_client_session(&sid(1), "a"));
        registry.add_client_session(fake_client_session(&sid(2), "a"));

        {
            let mut inner = registry.lock();
            inner.counts.insert("a".to_string(), 999);
        }

        let report = registry.audit_counts(false);
        assert!(!report.consistent);
        assert_eq!(report.inconsistencies, vec![("a".to_string(), 999, 2)]);
        // fix=false must not have mutated the cache
        assert_eq!(registry.get_client_count("a"), 999);

        let report = registry.audit_counts(true);
        assert!(!report.consistent);
        assert_eq!(registry.get_client_count("a"), 2);

        let report = registry.audit_counts(true);
        assert!(report.consistent);
    }

    #[test]
    fn pending_queue_drops_oldest_on_overflow() {
        let registry = Registry::new(vec![test_app("a")]);
        registry.add_backend_session(BackendSession::new(sid(1), Instant::now()));
        for i in 0..(PENDING_QUEUE_MAX + 50) {
            registry.enqueue_pending(&sid(1), format!("frame-{i}"));
        }
        let inner = registry.lock();
        let session = inner.backend_sessions.get(&sid(1)).unwrap();
        assert_eq!(session.pending.len(), PENDING_QUEUE_MAX);
        assert_eq!(session.pending.front().unwrap(), "frame-50");
        assert_eq!(session.pending.back().unwrap(), &format!("frame-{}", PENDING_QUEUE_MAX + 49));
    }

    #[test]
    fn startup_state_self_expires_to_timeout_once() {
        let registry = Registry::new(vec![test_app("a")]);
        let started = Instant::now() - Duration::from_secs(31);
        registry.set_starting("a", started);

        let now = Instant::now();
        assert_eq!(
            registry.get_startup_state("a", now),
            Some(StartupPhase::Timeout)
        );
        // entry is cleared after being observed as Timeout
        assert_eq!(registry.get_startup_state("a", now), None);
    }

    #[test]
    fn is_starting_true_before_timeout() {
        let registry = Registry::new(vec![test_app("a")]);
        registry.set_starting("a", Instant::now());
        assert!(registry.is_starting("a"));
    }

    #[test]
    fn snapshot_apps_reflects_running_and_starting_flags() {
        let registry = Registry::new(vec![test_app("a"), test_app("b")]);
        registry.set_starting("a", Instant::now());
        let views = registry.snapshot_apps();
        assert_eq!(views.len(), 2);
        let a = views.iter().find(|v| v.name == "a").unwrap();
        assert!(a.starting);
        assert!(!a.running);
    }

    #[test]
    fn status_class_distinguishes_stopped_from_crashed() {
        let registry = Registry::new(vec![resident_app("sales"), test_app("reports")]);

        // no process yet, no crash on record
        let views = registry.snapshot_apps();
        assert_eq!(views.iter().find(|v| v.name == "sales").unwrap().status_class(), "stopped");
        assert_eq!(views.iter().find(|v| v.name == "reports").unwrap().status_class(), "dormant");

        registry.mark_crashed("sales");
        registry.mark_crashed("reports");
        let views = registry.snapshot_apps();
        assert_eq!(views.iter().find(|v| v.name == "sales").unwrap().status_class(), "crashed");
        assert_eq!(views.iter().find(|v| v.name == "reports").unwrap().status_class(), "crashed");

        registry.clear_crashed("sales");
        let views = registry.snapshot_apps();
        assert_eq!(views.iter().find(|v| v.name == "sales").unwrap().status_class(), "stopped");
    }
}
