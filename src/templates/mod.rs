//! Template/Static (C9): renders the landing page and serves embedded
//! static assets under `/templates/*`, keeping the binary self-contained.

use askama::Template;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use rust_embed::RustEmbed;

use crate::registry::AppStatusView;
use crate::state::AppState;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Assets;

#[derive(Template)]
#[template(path = "landing.html")]
struct LandingTemplate {
    apps: Vec<AppStatusView>,
}

pub async fn landing_page(State(state): State<AppState>) -> impl IntoResponse {
    let apps = state.registry.snapshot_apps();
    let template = LandingTemplate { apps };
    match template.render() {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render landing page");
            (StatusCode::INTERNAL_SERVER_ERROR, "template render failure").into_response()
        }
    }
}

pub async fn static_asset(Path(path): Path<String>) -> Response {
    match Assets::get(&path) {
        Some(file) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                file.data.to_vec(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
