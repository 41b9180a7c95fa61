//! WebSocket Bridge (C6): pairs one public client WebSocket with one
//! backend WebSocket, forwards frames in both directions, and queues
//! pre-readiness frames in strict FIFO order.

mod backend;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::constants::PENDING_QUEUE_MAX;
use crate::registry::{BackendSession, ClientSession};
use crate::state::AppState;
use crate::support::id::generate_session_id;
use crate::validation::{validate_ip, validate_ws_frame};

/// True if `req`'s headers ask for a WebSocket upgrade — the signal the
/// combined `/proxy/<app>/<rest>` route uses to decide between this module
/// and a plain HTTP reverse-proxy forward.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Completes the WebSocket handshake for an already-resolved, already
/// on-demand-started `app` and hands the connection off to
/// [`handle_socket`]. `req` must not have had its body consumed yet.
pub async fn handle_upgrade(
    state: AppState,
    app: crate::registry::AppSpec,
    req: axum::extract::Request,
) -> axum::response::Response {
    let headers = req.headers().clone();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|c| c.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));

    let (mut parts, _body) = req.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let client_ip = extract_client_ip(&headers, remote_addr);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, app.name.clone(), app.port, client_ip, user_agent)
    })
}

/// Candidates are validated with [`validate_ip`] before they're trusted: a
/// header that fails validation (garbage, or a non-address sentinel other
/// than the ones `validate_ip` accepts) falls through to the next source
/// instead of being parsed on faith.
fn extract_client_ip(headers: &HeaderMap, remote: IpAddr) -> IpAddr {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let candidate = first.trim();
            if validate_ip(candidate).is_ok() {
                if let Ok(ip) = candidate.parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let candidate = real_ip.trim();
        if validate_ip(candidate).is_ok() {
            if let Ok(ip) = candidate.parse::<IpAddr>() {
                return ip;
            }
        }
    }
    remote
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    app_name: String,
    port: u16,
    client_ip: IpAddr,
    user_agent: String,
) {
    let session_id = generate_session_id(&user_agent, client_ip, chrono::Utc::now().timestamp_millis());
    let (mut client_sink, mut client_stream) = socket.split();

    let (client_tx, mut client_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();

    let now = Instant::now();
    state.registry.add_client_session(ClientSession {
        session_id: session_id.clone(),
        app_name: app_name.clone(),
        client_ip,
        user_agent,
        created_at: now,
        last_activity: now,
        sender: client_tx.clone(),
    });

    debug!(session_id = %session_id, app = %app_name, "client session established");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if client_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let registry = state.registry.clone();
    let supervisor = state.supervisor.clone();
    let sid = session_id.clone();
    let app_name_for_recv = app_name.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = client_stream.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(_e) = validate_ws_frame(&text) {
                        let _ = client_tx.send(Message::Text(
                            r#"{"error":"Invalid message"}"#.to_string().into(),
                        ));
                        break;
                    }
                    registry.touch_client_session(&sid, Instant::now());

                    if !registry.has_backend_session(&sid) {
                        registry.add_backend_session(BackendSession::new(sid.clone(), Instant::now()));
                        let registry_for_dial = registry.clone();
                        let sid_for_dial = sid.clone();
                        let client_tx_for_dial = client_tx.clone();
                        tokio::spawn(async move {
                            backend::run(registry_for_dial, sid_for_dial, port, client_tx_for_dial).await;
                        });
                    }

                    if registry.backend_session_ready(&sid) {
                        if let Some(sender) = registry.backend_sender(&sid) {
                            let _ = sender.send(tokio_tungstenite::tungstenite::Message::Text(
                                text.to_string().into(),
                            ));
                            registry.touch_backend_session(&sid, Instant::now());
                        } else {
                            enqueue(&registry, &sid, text.to_string());
                        }
                    } else {
                        enqueue(&registry, &sid, text.to_string());
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        teardown(&registry, &supervisor, &sid, &app_name_for_recv).await;
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }
}

fn enqueue(registry: &crate::registry::Registry, session_id: &str, frame: String) {
    if registry.enqueue_pending(session_id, frame) {
        warn!(session_id = %session_id, queue_max = PENDING_QUEUE_MAX, "pending queue at capacity, dropped oldest");
    }
}

async fn teardown(
    registry: &crate::registry::Registry,
    supervisor: &crate::supervisor::Supervisor,
    session_id: &str,
    app_name: &str,
) {
    registry.remove_client_session(session_id);
    if registry.remove_backend_session(session_id) {
        debug!(session_id = %session_id, "backend session closed on teardown");
    }

    if let Some(app) = registry.get_app(app_name) {
        if !app.resident && registry.get_client_count(app_name) == 0 {
            supervisor.immediate_idle_stop(&app).await;
        }
    }
}
