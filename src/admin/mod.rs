//! Admin API (C8): loopback-only management surface — status views plus
//! restart/shutdown commands. Mounted on its own listener, separate from
//! the public router, and always bound to 127.0.0.1 regardless of config.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tracing::info;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/apps", get(apps))
        .route("/api/connections", get(connections))
        .route("/api/apps/{name}/restart", post(restart))
        .route("/api/shutdown", post(shutdown))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let views = state.registry.snapshot_apps();
    let running = views.iter().filter(|v| v.running).count();
    Json(json!({
        "status": "healthy",
        "app_count": views.len(),
        "running_count": running,
    }))
}

async fn apps(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.snapshot_apps())
}

async fn connections(State(state): State<AppState>) -> impl IntoResponse {
    let views = state.registry.snapshot_apps();
    let map: serde_json::Map<String, serde_json::Value> = views
        .into_iter()
        .map(|v| (v.name.clone(), json!(v.client_count)))
        .collect();
    Json(serde_json::Value::Object(map))
}

async fn restart(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let Some(app) = state.registry.get_app(&name) else {
        return Json(json!({ "success": false, "message": format!("unknown app {name}") }));
    };

    match state.supervisor.restart(&app).await {
        Ok(()) => Json(json!({ "success": true, "message": "restarting" })),
        Err(crate::support::errors::SupervisorError::Dormant(_)) => {
            Json(json!({ "success": false, "message": "Cannot restart dormant app" }))
        }
        Err(e) => Json(json!({ "success": false, "message": e.to_string() })),
    }
}

async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    let sentinel = PathBuf::from(&state.config.log_dir).join("shutdown.flag");
    match tokio::fs::write(&sentinel, b"shutdown").await {
        Ok(()) => {
            info!(path = %sentinel.display(), "wrote shutdown sentinel");
            Json(json!({ "success": true, "message": "shutdown requested" }))
        }
        Err(e) => Json(json!({ "success": false, "message": e.to_string() })),
    }
}
