//! Config Loader (C10): reads the JSON config file, applies defaults exactly
//! once, validates semantically, assigns ports, and produces the fully
//! populated [`Config`] downstream code builds the initial Registry from.
//! Nothing past this module ever sees an unvalidated or partially-defaulted
//! value.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_MANAGEMENT_PORT, DEFAULT_PROXY_HOST,
    DEFAULT_PROXY_PORT, DEFAULT_RESTART_DELAY,
};
use crate::port_allocator::allocate_ports;
use crate::registry::AppSpec;
use crate::support::errors::ConfigError;
use crate::validation::validate_app_name;

const ALLOWED_PROXY_HOSTS: [&str; 5] = ["localhost", "127.0.0.1", "0.0.0.0", "::1", "::"];

#[derive(Debug, Deserialize)]
struct RawAppEntry {
    name: String,
    path: String,
    #[serde(default)]
    resident: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    apps: Vec<RawAppEntry>,
    starting_port: u16,
    log_dir: String,
    proxy_port: Option<u16>,
    proxy_host: Option<String>,
    management_port: Option<u16>,
    restart_delay: Option<u64>,
    health_check_interval: Option<u64>,
}

/// Fully validated, defaults-applied configuration. Once built, every field
/// is guaranteed semantically valid — downstream code never checks again.
#[derive(Debug, Clone)]
pub struct Config {
    pub apps: Vec<AppSpec>,
    pub log_dir: String,
    pub proxy_host: IpOrHostname,
    pub proxy_port: u16,
    pub management_port: u16,
    pub restart_delay: std::time::Duration,
    pub health_check_interval: std::time::Duration,
}

/// The `proxy_host` config value: kept as the original string since
/// `0.0.0.0`/`::`/`localhost` aren't all valid [`IpAddr`] literals in the
/// sense axum's bind wants, but they're exactly the restricted enum §6
/// allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpOrHostname(pub String);

impl Config {
    /// Reads, parses, defaults, validates, and assigns ports — the complete
    /// pipeline from file path to a ready-to-serve [`Config`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw_text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        let raw: RawConfig = serde_json::from_str(&raw_text)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.apps.is_empty() {
            return Err(ConfigError::Invalid("apps must not be empty".to_string()));
        }

        let mut seen_names = HashSet::new();
        for entry in &raw.apps {
            validate_app_name(&entry.name)
                .map_err(|_| ConfigError::Invalid(format!("invalid app name: {}", entry.name)))?;
            if !seen_names.insert(entry.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate app name: {}",
                    entry.name
                )));
            }
            if entry.path.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "app {} has an empty path",
                    entry.name
                )));
            }
        }

        if raw.starting_port == 0 {
            return Err(ConfigError::Invalid(
                "starting_port must be between 1 and 65535".to_string(),
            ));
        }
        if raw.log_dir.trim().is_empty() {
            return Err(ConfigError::Invalid("log_dir must not be empty".to_string()));
        }

        let proxy_port = raw.proxy_port.unwrap_or(DEFAULT_PROXY_PORT);
        let management_port = raw.management_port.unwrap_or(DEFAULT_MANAGEMENT_PORT);

        let proxy_host = raw
            .proxy_host
            .unwrap_or_else(|| DEFAULT_PROXY_HOST.to_string());
        if !ALLOWED_PROXY_HOSTS.contains(&proxy_host.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "proxy_host {proxy_host} is not one of {ALLOWED_PROXY_HOSTS:?}"
            )));
        }

        let restart_delay = std::time::Duration::from_secs(
            raw.restart_delay
                .unwrap_or(DEFAULT_RESTART_DELAY.as_secs()),
        );
        let health_check_interval = std::time::Duration::from_secs(
            raw.health_check_interval
                .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL.as_secs()),
        );

        let mut reserved = HashSet::new();
        reserved.insert(proxy_port);
        reserved.insert(management_port);

        let app_names: Vec<String> = raw.apps.iter().map(|a| a.name.clone()).collect();
        let assigned_ports = allocate_ports(&app_names, raw.starting_port, &reserved)?;

        let apps: Vec<AppSpec> = raw
            .apps
            .into_iter()
            .zip(assigned_ports.into_iter())
            .map(|(entry, (_, port))| AppSpec {
                name: entry.name,
                path: entry.path,
                resident: entry.resident,
                port,
            })
            .collect();

        Ok(Config {
            apps,
            log_dir: raw.log_dir,
            proxy_host: IpOrHostname(proxy_host),
            proxy_port,
            management_port,
            restart_delay,
            health_check_interval,
        })
    }
}

/// Parses a `proxy_host` string into something suitable for `TcpListener`
/// binding, mapping the `localhost` sentinel to its loopback literal.
pub fn resolve_bind_host(host: &IpOrHostname) -> IpAddr {
    match host.0.as_str() {
        "localhost" => IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
        other => other.parse().expect("proxy_host already validated at load time"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "apps": [{"name": "reports", "path": "/srv/reports"}],
            "starting_port": 41000,
            "log_dir": "/tmp/logs"
        }"#
    }

    #[test]
    fn applies_defaults() {
        let raw: RawConfig = serde_json::from_str(minimal_json()).unwrap();
        let config = Config::from_raw(raw).unwrap();
        assert_eq!(config.proxy_port, DEFAULT_PROXY_PORT);
        assert_eq!(config.management_port, DEFAULT_MANAGEMENT_PORT);
        assert_eq!(config.proxy_host.0, DEFAULT_PROXY_HOST);
        assert_eq!(config.restart_delay, DEFAULT_RESTART_DELAY);
        assert!(!config.apps[0].resident);
        assert!(config.apps[0].port >= 41000);
    }

    #[test]
    fn rejects_duplicate_app_names() {
        let json = r#"{
            "apps": [
                {"name": "a", "path": "/x"},
                {"name": "a", "path": "/y"}
            ],
            "starting_port": 41000,
            "log_dir": "/tmp/logs"
        }"#;
        let raw: RawConfig = serde_json::from_str(json).unwrap();
        assert!(Config::from_raw(raw).is_err());
    }

    #[test]
    fn rejects_invalid_proxy_host() {
        let json = r#"{
            "apps": [{"name": "a", "path": "/x"}],
            "starting_port": 41000,
            "log_dir": "/tmp/logs",
            "proxy_host": "evil.example.com"
        }"#;
        let raw: RawConfig = serde_json::from_str(json).unwrap();
        assert!(Config::from_raw(raw).is_err());
    }

    #[test]
    fn rejects_invalid_app_name() {
        let json = r#"{
            "apps": [{"name": "bad name!", "path": "/x"}],
            "starting_port": 41000,
            "log_dir": "/tmp/logs"
        }"#;
        let raw: RawConfig = serde_json::from_str(json).unwrap();
        assert!(Config::from_raw(raw).is_err());
    }

    #[test]
    fn skips_starting_port_equal_to_proxy_port() {
        let json = r#"{
            "apps": [{"name": "a", "path": "/x"}],
            "starting_port": 3838,
            "log_dir": "/tmp/logs",
            "proxy_port": 3838
        }"#;
        let raw: RawConfig = serde_json::from_str(json).unwrap();
        let config = Config::from_raw(raw).unwrap();
        assert_ne!(config.apps[0].port, 3838);
    }
}
