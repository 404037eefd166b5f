//! WebSocket handler for real-time sync.
//!
//! Handles WebSocket connections, answers `sync` frames with the table's
//! canonical view and forwards pushes from other clients.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tablesync_engine::{ClientFrame, ServerFrame, SyncMessage};
use tokio::sync::mpsc;

use super::handle_sync;
use crate::AppState;

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing frames
/// 3. Processes incoming frames in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let conn_id = state.conn_manager.register(tx);

    tracing::info!(conn_id = %conn_id, "WebSocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "Failed to send WebSocket frame");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize WebSocket frame");
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_frame(text.as_str(), &state, &conn_id);
                state.conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(conn_id = %conn_id, "Binary frames not supported");
                state.conn_manager.send_to(
                    &conn_id,
                    ServerFrame::error(None, "binary frames are not supported"),
                );
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!(bytes = data.len(), "Received ping");
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = state.conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client frame and return the reply.
fn process_frame(text: &str, state: &AppState, conn_id: &str) -> ServerFrame {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return ServerFrame::error(None, format!("Invalid frame: {}", e)),
    };

    match frame {
        ClientFrame::Sync {
            table,
            items,
            request_id,
        } => match handle_sync(state, SyncMessage::new(table.clone(), items), Some(conn_id)) {
            Ok(reply) => ServerFrame::sync_result(reply, request_id),
            Err(e) => ServerFrame::error(Some(table), e.to_string()).with_request_id(request_id),
        },
        ClientFrame::Ping => ServerFrame::Pong,
    }
}
