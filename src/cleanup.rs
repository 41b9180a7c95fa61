//! Cleanup Scheduler (C7): a periodic sweep for stale sessions, dead
//! processes, and counter-cache drift. Shaped exactly like the supervisor's
//! health loop — an interval racing a shutdown signal — since both are the
//! same "periodic background sweep with cooperative shutdown" pattern.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message;
use tracing::{info, warn};

use crate::constants::{CLEANUP_INTERVAL, SESSION_IDLE_TIMEOUT};
use crate::registry::Registry;
use crate::support::shutdown::ShutdownSignal;
use crate::supervisor::Supervisor;

pub struct CleanupScheduler {
    registry: Arc<Registry>,
    supervisor: Supervisor,
    shutdown: ShutdownSignal,
}

impl CleanupScheduler {
    pub fn new(registry: Arc<Registry>, supervisor: Supervisor, shutdown: ShutdownSignal) -> Self {
        Self {
            registry,
            supervisor,
            shutdown,
        }
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.notified().wait() => {
                    info!("cleanup scheduler stopping on shutdown");
                    return;
                }
            }
            self.sweep().await;
        }
    }

    async fn sweep(&self) {
        let cutoff = Instant::now() - SESSION_IDLE_TIMEOUT;

        let stale = self.registry.stale_client_sessions(cutoff);
        for session_id in &stale {
            if let Some(session) = self.registry.get_client_session(session_id) {
                let _ = session.sender.send(Message::Close(None));
            }
            if let Some(sender) = self.registry.backend_sender(session_id) {
                let _ = sender.send(tokio_tungstenite::tungstenite::Message::Close(None));
            }
            self.registry.remove_backend_session(session_id);
            self.registry.remove_client_session(session_id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "swept stale sessions");
        }

        for app_name in self.registry.dead_process_names() {
            warn!(app = %app_name, "cleanup sweep found dead process");
            for session_id in self.registry.client_sessions_for_app(&app_name) {
                self.registry.remove_backend_session(&session_id);
                self.registry.remove_client_session(&session_id);
            }
            self.registry.remove_process(&app_name);
            self.registry.clear_startup(&app_name);
            if let Some(app) = self.registry.get_app(&app_name) {
                if app.resident {
                    let supervisor = self.supervisor.clone();
                    tokio::spawn(async move {
                        if let Err(e) = supervisor.restart(&app).await {
                            warn!(app = %app.name, error = %e, "cleanup-triggered restart failed");
                        }
                    });
                }
            }
        }

        let report = self.registry.audit_counts(true);
        if !report.consistent {
            warn!(
                inconsistencies = ?report.inconsistencies,
                "repaired connection count drift during cleanup sweep"
            );
        }
    }
}
