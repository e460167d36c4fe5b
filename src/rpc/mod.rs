pub mod handler;
pub mod messages;

pub use handler::MessageHandler;
pub use messages::{ClientMessage, ServerMessage};

use std::collections::HashSet;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::state::AppState;

/// Inbound frames larger than this close the connection.
const MAX_FRAME_BYTES: usize = 1024 * 1024;

// ============================================================================
// Upgrade handler
// ============================================================================

/// GET /rpc — upgrade to a WebSocket connection.
///
/// When allowed origins are configured, handshakes from other origins are
/// refused before the upgrade; requests without an Origin header pass.
pub async fn rpc_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(&state.allowed_origins, origin) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    ws.max_frame_size(MAX_FRAME_BYTES)
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

fn origin_allowed(allowed: &HashSet<String>, origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match origin.filter(|o| !o.is_empty()) {
        None => true,
        Some(origin) => allowed.contains("*") || allowed.contains(origin),
    }
}

// ============================================================================
// Connection lifecycle
// ============================================================================

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let read_timeout = state.read_timeout;
    let write_timeout = state.write_timeout;
    let mut message_handler = MessageHandler::new(state, tx);

    // Single writer: drains the mailbox and owns the socket's send half.
    // Heartbeats go out as the bare byte `h`; everything else as JSON.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg {
                ServerMessage::Heartbeat => Message::Text("h".to_owned()),
                other => match serde_json::to_string(&other) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::error!(error = ?e, "failed to serialize server message");
                        continue;
                    }
                },
            };
            match timeout(write_timeout, ws_sender.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
    });

    // Read loop: exactly one reader drives the message handler, so responses
    // on a connection keep the order their requests were processed in.
    loop {
        let frame = match timeout(read_timeout, ws_receiver.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                tracing::debug!("read deadline exceeded; closing connection");
                break;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = message_handler.handle_frame(&text).await {
                    tracing::warn!(error = %e, "closing connection");
                    break;
                }
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if let Err(e) = message_handler.handle_frame(&text).await {
                        tracing::warn!(error = %e, "closing connection");
                        break;
                    }
                }
                Err(_) => {
                    tracing::warn!("non-UTF-8 binary frame; closing connection");
                    break;
                }
            },
            Some(Ok(Message::Close(_))) => break,
            // Ping/Pong frames are answered by the websocket layer.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(error = ?e, "websocket receive error; closing connection");
                break;
            }
            None => break,
        }
    }

    message_handler.cleanup().await;
    send_task.abort();
}
