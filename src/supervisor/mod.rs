//! Process Supervisor (C4): spawn, stop, restart, health loop, on-demand
//! start, and readiness gating for backend app processes.
//!
//! State machine per app (§4.4):
//!
//! ```text
//!        spawn()          probe success
//! dormant ─────→ starting ───────────→ running
//!    ↑              │ probe fail / death / timeout     │
//!    │              ↓                                  │
//!    └──────── (cleanup) ←──── crashed ←── process dies
//!                                   │
//!                   resident? yes → restart after delay
//!                   resident? no  → stay dormant
//! ```

mod readiness;

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use tokio::fs::OpenOptions;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::constants::{READINESS_POLL_INTERVAL, STARTUP_TIMEOUT};
use crate::registry::{AppProcess, AppSpec, Registry};
use crate::support::errors::SupervisorError;
use crate::support::shutdown::ShutdownSignal;

#[derive(Clone)]
pub struct Supervisor {
    registry: Arc<Registry>,
    log_dir: String,
    restart_delay: Duration,
    health_check_interval: Duration,
    shutdown: ShutdownSignal,
}

impl Supervisor {
    pub fn new(
        registry: Arc<Registry>,
        log_dir: String,
        restart_delay: Duration,
        health_check_interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            registry,
            log_dir,
            restart_delay,
            health_check_interval,
            shutdown,
        }
    }

    /// Spawns a backend process for `app`. Returns once the process has been
    /// forked and the readiness probe task started — it does not wait for
    /// readiness.
    pub async fn spawn(&self, app: &AppSpec) -> Result<(), SupervisorError> {
        let stdout_log = format!("{}/{}_output.log", self.log_dir, app.name);
        let stderr_log = format!("{}/{}_error.log", self.log_dir, app.name);

        let stdout_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stdout_log)
            .await
            .map_err(SupervisorError::Io)?
            .into_std()
            .await;
        let stderr_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_log)
            .await
            .map_err(SupervisorError::Io)?
            .into_std()
            .await;

        self.registry.set_starting(&app.name, Instant::now());

        let mut command = Command::new(&app.path);
        command
            .env("APP_PORT", app.port.to_string())
            .env("APP_BIND_HOST", "127.0.0.1")
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(false);

        let child = command.spawn().map_err(|e| {
            self.registry.clear_startup(&app.name);
            self.registry.mark_crashed(&app.name);
            SupervisorError::SpawnFailed(app.name.clone(), e.to_string())
        })?;

        let pid = child.id().ok_or_else(|| {
            self.registry.mark_crashed(&app.name);
            SupervisorError::SpawnFailed(app.name.clone(), "child has no pid".to_string())
        })?;

        self.registry.add_process(
            &app.name,
            AppProcess {
                pid,
                child,
                stdout_log,
                stderr_log,
                spawned_at: Instant::now(),
            },
        );
        self.registry.clear_crashed(&app.name);

        info!(app = %app.name, pid, port = app.port, "spawned backend process");

        let supervisor = self.clone();
        let app = app.clone();
        tokio::spawn(async move {
            supervisor.run_readiness_probe(app).await;
        });

        Ok(())
    }

    async fn run_readiness_probe(&self, app: AppSpec) {
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        loop {
            if Instant::now() >= deadline {
                warn!(app = %app.name, "readiness probe timed out");
                self.registry.get_startup_state(&app.name, Instant::now());
                self.registry.mark_crashed(&app.name);
                self.kill_process(&app.name).await;
                return;
            }

            let alive = self
                .registry
                .dead_process_names()
                .iter()
                .all(|n| n != &app.name);
            if !alive {
                warn!(app = %app.name, "process died during startup");
                self.registry.clear_startup(&app.name);
                self.registry.remove_process(&app.name);
                self.registry.mark_crashed(&app.name);
                return;
            }

            if readiness::probe_once(app.port).await == readiness::ProbeOutcome::Ready {
                self.registry.clear_startup(&app.name);
                info!(app = %app.name, "backend became ready");
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(READINESS_POLL_INTERVAL) => {}
                _ = self.shutdown.notified().wait() => return,
            }
        }
    }

    /// Starts `app` if it is not already starting or running. Idempotent by
    /// design (§4.4 "On-demand start").
    pub async fn on_demand_start(&self, app: &AppSpec) -> Result<(), SupervisorError> {
        if self.registry.is_starting(&app.name) {
            return Ok(());
        }
        if self.registry.has_process(&app.name) {
            return Ok(());
        }
        self.spawn(app).await
    }

    async fn kill_process(&self, app_name: &str) {
        if let Some(mut process) = self.registry.remove_process(app_name) {
            let _ = terminate_gracefully(process.pid);
            let graced = tokio::time::timeout(Duration::from_millis(500), process.child.wait()).await;
            if graced.is_err() {
                let _ = process.child.start_kill();
                let _ = process.child.wait().await;
            }
        }
    }

    /// Closes and removes every client/backend session bound to `app_name`.
    fn teardown_sessions(&self, app_name: &str) {
        for session_id in self.registry.client_sessions_for_app(app_name) {
            if let Some(session) = self.registry.get_client_session(&session_id) {
                let _ = session.sender.send(Message::Close(None));
            }
            if let Some(sender) = self.registry.backend_sender(&session_id) {
                let _ = sender.send(tokio_tungstenite::tungstenite::Message::Close(None));
            }
            self.registry.remove_backend_session(&session_id);
            self.registry.remove_client_session(&session_id);
        }
    }

    /// Graceful stop: terminate the process, clean up its sessions. Always
    /// deliberate, so it clears any stale crash marker — a resident app
    /// stopped this way reports `stopped`, not `crashed`, until it respawns.
    pub async fn stop(&self, app_name: &str) {
        self.teardown_sessions(app_name);
        self.kill_process(app_name).await;
        self.registry.clear_startup(app_name);
        self.registry.clear_crashed(app_name);
        info!(app = %app_name, "app stopped");
    }

    /// Invoked by the WebSocket bridge when a non-resident app's client
    /// count transitions to zero. Resident apps are never stopped this way.
    pub async fn immediate_idle_stop(&self, app: &AppSpec) {
        if app.resident {
            return;
        }
        if self.registry.get_client_count(&app.name) != 0 {
            return;
        }
        self.stop(&app.name).await;
    }

    /// Restarts `app`: tears down sessions, stops, waits `restart_delay`,
    /// then spawns. Refuses a dormant non-resident app.
    pub async fn restart(&self, app: &AppSpec) -> Result<(), SupervisorError> {
        let dormant = !app.resident && !self.registry.has_process(&app.name);
        if dormant {
            return Err(SupervisorError::Dormant(app.name.clone()));
        }
        self.stop(&app.name).await;
        tokio::time::sleep(self.restart_delay).await;
        self.spawn(app).await
    }

    /// Runs the periodic health loop until shutdown. Dead processes are
    /// cleaned up; resident apps with no process (dead or never started)
    /// are (re)spawned.
    pub async fn run_health_loop(&self, apps: Vec<AppSpec>) {
        let mut ticker = tokio::time::interval(self.health_check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.notified().wait() => {
                    info!("health loop stopping on shutdown");
                    return;
                }
            }

            for app in &apps {
                let dead = self
                    .registry
                    .dead_process_names()
                    .into_iter()
                    .any(|n| n == app.name);

                if dead {
                    warn!(app = %app.name, "detected dead process in health loop");
                    self.teardown_sessions(&app.name);
                    self.registry.remove_process(&app.name);
                    self.registry.clear_startup(&app.name);
                    self.registry.mark_crashed(&app.name);
                    if app.resident {
                        let supervisor = self.clone();
                        let app = app.clone();
                        let delay = self.restart_delay;
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if let Err(e) = supervisor.spawn(&app).await {
                                error!(app = %app.name, error = %e, "scheduled respawn failed");
                            }
                        });
                    }
                    continue;
                }

                if app.resident && !self.registry.has_process(&app.name) {
                    if let Err(e) = self.spawn(app).await {
                        error!(app = %app.name, error = %e, "resident spawn failed");
                    }
                }
            }
        }
    }

    /// Stops every running app. Used during graceful shutdown.
    pub async fn stop_all(&self, apps: &[AppSpec]) {
        for app in apps {
            if self.registry.has_process(&app.name) {
                self.stop(&app.name).await;
            }
        }
    }
}

#[cfg(unix)]
fn terminate_gracefully(pid: u32) -> std::io::Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(_pid: u32) -> std::io::Result<()> {
    Ok(())
}
