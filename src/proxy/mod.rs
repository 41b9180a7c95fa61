//! HTTP Router / Proxy (C5): the public endpoint — landing page, health,
//! status API, static assets, and the `/proxy/<app>/<rest>` reverse proxy.

mod forward;

use axum::extract::{Path, State};
use axum::http::Method;
use axum::response::{IntoResponse, Json};
use axum::routing::{any, get};
use axum::Router;
use serde_json::json;

use crate::state::AppState;
use crate::support::errors::{AppError, ProxyError};
use crate::validation::{validate_app_name, validate_method, validate_path, validate_query};

/// Upper bound on a forwarded request body. Not part of the declared
/// invariants, just a sane ceiling so a runaway upload can't exhaust memory.
const MAX_FORWARDED_BODY: usize = 16 * 1024 * 1024;

/// A GET to `/proxy/<app>/<rest>` can be either a plain HTTP request or a
/// WebSocket upgrade handshake — both arrive as GET with no way to tell
/// them apart from the route alone, so both variants dispatch here and the
/// `Upgrade` header picks the path at runtime.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(crate::templates::landing_page))
        .route("/health", get(health))
        .route("/api/apps", get(list_apps))
        .route("/templates/{*path}", get(crate::templates::static_asset))
        .route("/proxy/{app}/{*rest}", any(dispatch))
        .route("/proxy/{app}", any(dispatch_no_rest))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn list_apps(State(state): State<AppState>) -> impl IntoResponse {
    let views = state.registry.snapshot_apps();
    let map: serde_json::Map<String, serde_json::Value> = views
        .into_iter()
        .map(|v| {
            let status = v.status_class();
            let app = state.registry.get_app(&v.name);
            let pid = state.registry.process_pid(&v.name);
            let value = json!({
                "name": v.name,
                "status": status,
                "resident": v.resident,
                "port": v.port,
                "path": app.map(|a| a.path).unwrap_or_default(),
                "connections": v.client_count,
                "pid": pid,
            });
            (v.name.clone(), value)
        })
        .collect();
    Json(serde_json::Value::Object(map))
}

async fn dispatch_no_rest(
    state: State<AppState>,
    Path(app): Path<String>,
    req: axum::extract::Request,
) -> axum::response::Response {
    dispatch_inner(state, app, String::new(), req).await
}

async fn dispatch(
    state: State<AppState>,
    Path((app, rest)): Path<(String, String)>,
    req: axum::extract::Request,
) -> axum::response::Response {
    dispatch_inner(state, app, rest, req).await
}

async fn dispatch_inner(
    State(state): State<AppState>,
    app_name: String,
    rest: String,
    req: axum::extract::Request,
) -> axum::response::Response {
    if crate::ws_bridge::is_upgrade_request(req.headers()) {
        let app = match resolve_app(&state, &app_name).await {
            Ok(app) => app,
            Err(err) => return err.into_response(),
        };
        return crate::ws_bridge::handle_upgrade(state, app, req).await;
    }

    if let Err(e) = validate_method(req.method().as_str()) {
        return AppError::from(e).into_response();
    }

    let method = req.method().clone();
    let query = req.uri().query().map(str::to_string);
    let headers = req.headers().clone();
    let body = match axum::body::to_bytes(req.into_body(), MAX_FORWARDED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AppError::from(ProxyError::StartFailed(app_name, "body too large".into()))
                .into_response()
        }
    };

    match run_proxy(&state, &method, &app_name, &rest, query.as_deref(), &headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn resolve_app(state: &AppState, app_name: &str) -> Result<crate::registry::AppSpec, AppError> {
    validate_app_name(app_name)?;

    let app = state
        .registry
        .get_app(app_name)
        .ok_or_else(|| ProxyError::UnknownApp(app_name.to_string()))?;

    if !app.resident && !state.registry.has_process(&app.name) {
        state
            .supervisor
            .on_demand_start(&app)
            .await
            .map_err(|e| ProxyError::StartFailed(app.name.clone(), e.to_string()))?;
    }

    if let Some(phase) = state
        .registry
        .get_startup_state(&app.name, std::time::Instant::now())
    {
        return Err(match phase {
            crate::registry::StartupPhase::Starting => {
                ProxyError::Starting(app.name.clone(), 3).into()
            }
            crate::registry::StartupPhase::Timeout => {
                ProxyError::StartupTimedOut(app.name.clone()).into()
            }
        });
    }

    Ok(app)
}

async fn run_proxy(
    state: &AppState,
    method: &Method,
    app_name: &str,
    rest: &str,
    query: Option<&str>,
    headers: &axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<axum::response::Response, AppError> {
    let full_path = format!("/{rest}");
    validate_path(&full_path)?;
    let query_string = query.unwrap_or("");
    if !query_string.is_empty() {
        validate_query(query_string)?;
    }

    let app = resolve_app(state, app_name).await?;

    if !forward::port_accepting(app.port).await {
        return Err(ProxyError::Starting(app.name.clone(), 3).into());
    }

    forward::forward_request(
        &state.http_client,
        &app,
        method,
        rest,
        query_string,
        headers,
        body,
    )
    .await
    .map_err(AppError::from)
}
