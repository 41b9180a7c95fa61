//! Shared application state handed to every axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::registry::Registry;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub supervisor: Supervisor,
    pub config: Arc<Config>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, supervisor: Supervisor, config: Arc<Config>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client configuration is static and always valid");

        Self {
            registry,
            supervisor,
            config,
            http_client,
        }
    }
}
