//! Error taxonomy.
//!
//! Three tiers, same split the rest of this crate's ancestry uses: validation
//! errors are the caller's fault (4xx, no state change), supervisor/proxy
//! errors are ours (5xx, may require cleanup), and `AppError` is the
//! top-level enum every HTTP handler converges on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors from the input validator (§4.2). Always maps to 400, except
/// method validation which maps to 405.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("path too long")]
    PathTooLong,
    #[error("invalid path")]
    InvalidPath,
    #[error("unsupported method")]
    UnsupportedMethod,
    #[error("query string too long")]
    QueryTooLong,
    #[error("malformed query string")]
    MalformedQuery,
    #[error("frame too large")]
    FrameTooLarge,
    #[error("invalid frame")]
    InvalidFrame,
    #[error("invalid app name")]
    InvalidAppName,
    #[error("invalid session id")]
    InvalidSessionId,
    #[error("invalid ip address")]
    InvalidIp,
}

/// Errors from the process supervisor (§4.4, §7).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("app {0} is unknown")]
    UnknownApp(String),
    #[error("app {0} is dormant and cannot be restarted")]
    Dormant(String),
    #[error("failed to spawn app {0}: {1}")]
    SpawnFailed(String, String),
    #[error("app {0} timed out during startup")]
    StartupTimeout(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the reverse proxy (§4.5, §7).
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unknown app {0}")]
    UnknownApp(String),
    #[error("app {0} is starting up")]
    Starting(String, u64),
    #[error("app {0} startup timed out")]
    StartupTimedOut(String),
    #[error("app {0} failed to start: {1}")]
    StartFailed(String, String),
    #[error("upstream error: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Errors raised while loading or validating the configuration file (§6/§4.10).
/// Fatal by construction: the process aborts rather than running with a
/// partially-valid config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("port allocation exhausted above starting_port {0}")]
    PortsExhausted(u16),
}

/// Top-level error every handler converges on.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(ValidationError::UnsupportedMethod) => {
                (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED")
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::NotFound | AppError::Supervisor(SupervisorError::UnknownApp(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            AppError::Proxy(ProxyError::UnknownApp(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Proxy(ProxyError::Starting(..)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STARTING")
            }
            AppError::Proxy(ProxyError::StartupTimedOut(_))
            | AppError::Proxy(ProxyError::StartFailed(..))
            | AppError::Proxy(ProxyError::Upstream(_)) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY"),
            AppError::Supervisor(SupervisorError::Dormant(_)) => {
                (StatusCode::CONFLICT, "DORMANT")
            }
            AppError::Supervisor(_) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();

        let mut body = json!({ "error": format!("{} - {}", code, message) });

        let mut response = if let AppError::Proxy(ProxyError::Starting(_, retry_after)) = &self {
            body["retry_after_seconds"] = json!(retry_after);
            (status, Json(body)).into_response()
        } else {
            (status, Json(body.clone())).into_response()
        };

        if let AppError::Proxy(ProxyError::Starting(_, retry_after)) = &self {
            response
                .headers_mut()
                .insert("Retry-After", retry_after.to_string().parse().unwrap());
        }

        response
    }
}
