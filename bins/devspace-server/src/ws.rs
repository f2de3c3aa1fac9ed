//! WebSocket endpoint: one connection is one session.
//!
//! The socket is split in two. A writer task owns the sink and is the only
//! code that sends frames; the reader side feeds text frames to the
//! protocol handler, which answers through an mpsc channel.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use devspace_common::config::USER_ID_PARAM;
use devspace_common::protocol::{encode, OutboundMessage};
use futures_util::{future, SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Replies buffered per connection before the handler waits on the writer
const OUTBOUND_BUFFER: usize = 32;

/// GET /ws?id=<user>
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let user_id = params.get(USER_ID_PARAM).cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut sink, stream) = socket.split();

    let session = match state.registry.open(&user_id).await {
        Ok(session) => session,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Rejecting connection");
            if let Ok(text) = encode(&OutboundMessage::error(e.to_string())) {
                let _ = sink.send(Message::Text(text)).await;
            }
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_BUFFER);
    let session_id = session.id;

    let writer = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            let text = match encode(&reply) {
                Ok(text) => text,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Failed to encode reply");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!(session_id = %session_id, error = %e, "Write to closed connection");
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let frames = stream
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text),
                Ok(Message::Binary(bytes)) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                _ => None,
            })
        });

    state.protocol.serve_session(&session, frames, tx).await;

    if let Err(e) = writer.await {
        error!(session_id = %session_id, error = %e, "Writer task failed");
    }
    state.registry.close(session_id).await;
}
