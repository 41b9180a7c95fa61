//! Appgate — multi-tenant reverse proxy and process supervisor.
//!
//! ```sh
//! # Run with a config file
//! appgate --config /etc/appgate/config.json
//!
//! # Override the log level
//! appgate --config config.json --log-level debug
//!
//! # Validate config without starting
//! appgate --config config.json --check
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use appgate::{Config, ServerHandle, ServerOptions};

/// Appgate — reverse proxy and process supervisor for interactive web apps.
#[derive(Parser, Debug)]
#[command(
    name = "appgate",
    version,
    about = "Reverse proxy and process supervisor for interactive web-app backends"
)]
struct Cli {
    /// Path to the configuration file (JSON).
    #[arg(short, long, env = "APPGATE_CONFIG")]
    config: PathBuf,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON instead of plain text.
    #[arg(long)]
    log_json: bool,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // No tracing subscriber yet, config couldn't even be read.
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            return ExitCode::from(2);
        }
    };

    if cli.check {
        println!("configuration is valid");
        println!("  apps             : {}", config.apps.len());
        println!("  proxy address    : {}:{}", config.proxy_host.0, config.proxy_port);
        println!("  management port  : {}", config.management_port);
        println!("  log_dir          : {}", config.log_dir);
        return ExitCode::SUCCESS;
    }

    let _guard = appgate::init_tracing(&config.log_dir, &cli.log_level, cli.log_json);
    info!(config = %cli.config.display(), "configuration loaded");

    let handle = match ServerHandle::start(ServerOptions { config }).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to start server");
            return ExitCode::from(1);
        }
    };

    handle.install_signal_handler();
    info!(proxy = %handle.proxy_addr, admin = %handle.admin_addr, "appgate listening, press Ctrl+C to shut down");

    handle.wait().await;

    ExitCode::SUCCESS
}
