//! Backend-side half of the bridge: dials the backend WebSocket lazily on a
//! session's first message and relays frames until either side closes.

use std::sync::Arc;

use axum::extract::ws::Message as AxumMessage;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{debug, warn};

use crate::registry::Registry;

/// Dials `ws://127.0.0.1:<port>/websocket/`, registers the send handle with
/// the backend session, drains whatever accumulated in `pending`, and relays
/// frames in both directions until the socket closes.
pub async fn run(
    registry: Arc<Registry>,
    session_id: String,
    port: u16,
    client_sender: UnboundedSender<AxumMessage>,
) {
    let url = format!("ws://127.0.0.1:{port}/websocket/");

    let stream = match tokio_tungstenite::connect_async(&url).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "backend dial failed");
            registry.remove_backend_session(&session_id);
            return;
        }
    };

    let (mut backend_sink, mut backend_stream) = stream.split();
    let (backend_tx, mut backend_rx) =
        tokio::sync::mpsc::unbounded_channel::<TungsteniteMessage>();
    registry.set_backend_sender(&session_id, backend_tx.clone());

    registry.mark_backend_ready(&session_id, &backend_tx);
    debug!(session_id = %session_id, "backend connection ready");

    let send_half = {
        let session_id = session_id.clone();
        async move {
            while let Some(msg) = backend_rx.recv().await {
                if backend_sink.send(msg).await.is_err() {
                    break;
                }
            }
            debug!(session_id = %session_id, "backend send half closed");
        }
    };

    let recv_half = {
        let registry = registry.clone();
        let session_id = session_id.clone();
        async move {
            while let Some(frame) = backend_stream.next().await {
                match frame {
                    Ok(TungsteniteMessage::Text(text)) => {
                        registry.touch_backend_session(&session_id, std::time::Instant::now());
                        if client_sender
                            .send(AxumMessage::Text(text.to_string().into()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(TungsteniteMessage::Binary(data)) => {
                        if client_sender.send(AxumMessage::Binary(data)).is_err() {
                            break;
                        }
                    }
                    Ok(TungsteniteMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            registry.remove_backend_session(&session_id);
            debug!(session_id = %session_id, "backend session removed");
        }
    };

    tokio::select! {
        _ = send_half => {}
        _ = recv_half => {}
    }
}
