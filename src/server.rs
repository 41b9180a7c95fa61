//! Reusable server runtime.
//!
//! Provides [`ServerHandle`], which encapsulates the full lifecycle: config,
//! registry, supervisor, public proxy listener, admin listener, health
//! loop, cleanup scheduler, and graceful shutdown. The CLI binary is a thin
//! wrapper around this.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::cleanup::CleanupScheduler;
use crate::config::{resolve_bind_host, Config};
use crate::registry::Registry;
use crate::state::AppState;
use crate::supervisor::Supervisor;
use crate::support::errors::ConfigError;
use crate::support::shutdown::{ShutdownCoordinator, ShutdownSignal};

/// Initializes the global `tracing` subscriber: a stdout layer plus a daily
/// rolling file layer under `<log_dir>/server.log`. Call once, before
/// [`ServerHandle::start`]. Returns the file writer's guard — drop it only
/// at process exit, or buffered log lines get lost.
pub fn init_tracing(log_dir: &str, log_level: &str, json: bool) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file_appender = tracing_appender::rolling::daily(log_dir, "server.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let file_layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(file_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .with(file_layer)
            .init();
    }

    guard
}

/// Options for starting the server.
pub struct ServerOptions {
    pub config: Config,
}

/// Handle to a running server. Holds the background task handles and the
/// shutdown coordinator needed to stop them in order.
pub struct ServerHandle {
    pub registry: Arc<Registry>,
    pub config: Config,
    pub proxy_addr: SocketAddr,
    pub admin_addr: SocketAddr,

    supervisor: Supervisor,
    shutdown: ShutdownCoordinator,
    proxy_task: tokio::task::JoinHandle<()>,
    admin_task: tokio::task::JoinHandle<()>,
    health_task: tokio::task::JoinHandle<()>,
    cleanup_task: tokio::task::JoinHandle<()>,
    sentinel_task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Starts every component: spawns resident apps, binds the public and
    /// admin listeners, and kicks off the health loop and cleanup
    /// scheduler. Returns once both listeners are bound — it does not wait
    /// for resident apps to become ready.
    pub async fn start(opts: ServerOptions) -> Result<Self, ConfigError> {
        let config = opts.config;
        info!(apps = config.apps.len(), "starting appgate");

        std::fs::create_dir_all(&config.log_dir).map_err(|e| {
            ConfigError::Invalid(format!("cannot create log_dir {}: {e}", config.log_dir))
        })?;

        let registry = Arc::new(Registry::new(config.apps.clone()));
        let shutdown = ShutdownCoordinator::new(30);

        let supervisor = Supervisor::new(
            registry.clone(),
            config.log_dir.clone(),
            config.restart_delay,
            config.health_check_interval,
            shutdown.signal(),
        );

        for app in &config.apps {
            if app.resident {
                if let Err(e) = supervisor.spawn(app).await {
                    error!(app = %app.name, error = %e, "failed to spawn resident app at startup");
                }
            }
        }

        let state = AppState::new(registry.clone(), supervisor.clone(), Arc::new(config.clone()));

        let proxy_host = resolve_bind_host(&config.proxy_host);
        let proxy_addr = SocketAddr::new(proxy_host, config.proxy_port);
        let proxy_router = crate::proxy::router().with_state(state.clone());
        let proxy_listener = tokio::net::TcpListener::bind(proxy_addr)
            .await
            .map_err(|e| ConfigError::Invalid(format!("cannot bind proxy listener {proxy_addr}: {e}")))?;
        let proxy_addr = proxy_listener.local_addr().unwrap_or(proxy_addr);

        let admin_addr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), config.management_port);
        let admin_router = crate::admin::router().with_state(state.clone());
        let admin_listener = tokio::net::TcpListener::bind(admin_addr)
            .await
            .map_err(|e| ConfigError::Invalid(format!("cannot bind admin listener {admin_addr}: {e}")))?;
        let admin_addr = admin_listener.local_addr().unwrap_or(admin_addr);

        let proxy_shutdown = shutdown.signal();
        let proxy_task = tokio::spawn(async move {
            let result = axum::serve(
                proxy_listener,
                proxy_router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(proxy_shutdown.notified().wait())
            .await;
            if let Err(e) = result {
                error!(error = %e, "proxy listener exited with error");
            }
        });

        let admin_shutdown = shutdown.signal();
        let admin_task = tokio::spawn(async move {
            let result = axum::serve(admin_listener, admin_router.into_make_service())
                .with_graceful_shutdown(admin_shutdown.notified().wait())
                .await;
            if let Err(e) = result {
                error!(error = %e, "admin listener exited with error");
            }
        });

        let health_supervisor = supervisor.clone();
        let health_apps = config.apps.clone();
        let health_task = tokio::spawn(async move {
            health_supervisor.run_health_loop(health_apps).await;
        });

        let cleanup = CleanupScheduler::new(registry.clone(), supervisor.clone(), shutdown.signal());
        let cleanup_task = tokio::spawn(async move {
            cleanup.run().await;
        });

        let sentinel_shutdown = shutdown.signal();
        let sentinel_path = std::path::PathBuf::from(&config.log_dir).join("shutdown.flag");
        let sentinel_task = tokio::spawn(async move {
            poll_shutdown_sentinel(sentinel_path, sentinel_shutdown).await;
        });

        info!(%proxy_addr, %admin_addr, "appgate listening");

        Ok(Self {
            registry,
            config,
            proxy_addr,
            admin_addr,
            supervisor,
            shutdown,
            proxy_task,
            admin_task,
            health_task,
            cleanup_task,
            sentinel_task,
        })
    }

    /// Installs OS signal listeners (SIGTERM/SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Waits for every background task to finish after shutdown has been
    /// triggered, then stops all app processes.
    pub async fn wait(self) {
        info!("waiting for server tasks to stop");

        let _ = tokio::join!(
            self.proxy_task,
            self.admin_task,
            self.health_task,
            self.cleanup_task,
            self.sentinel_task,
        );

        self.supervisor.stop_all(&self.config.apps).await;

        let sentinel_path = std::path::PathBuf::from(&self.config.log_dir).join("shutdown.flag");
        if sentinel_path.exists() {
            if let Err(e) = tokio::fs::remove_file(&sentinel_path).await {
                warn!(error = %e, "failed to remove shutdown sentinel");
            }
        }

        info!("appgate shutdown complete");
    }

    pub async fn shutdown(self) {
        self.trigger_shutdown();
        self.wait().await;
    }
}

async fn poll_shutdown_sentinel(path: std::path::PathBuf, shutdown: ShutdownSignal) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if path.exists() {
                    info!(path = %path.display(), "shutdown sentinel detected");
                    shutdown.trigger();
                    return;
                }
            }
            _ = shutdown.notified().wait() => return,
        }
    }
}
