//! Progress WebSocket (GET /ws/{client_id})

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};

use super::state::AppState;
use crate::registry::ConnectionRegistry;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Upgrades the request and attaches the socket to `client_id`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state.connections))
}

/// Manage one connection after upgrade.
///
/// A sender task forwards routed events as JSON text frames and pings the
/// client periodically. Inbound frames only keep the connection alive. On
/// disconnect the registration is released unless a newer socket for the
/// same client already replaced it.
async fn handle_socket(socket: WebSocket, client_id: String, connections: Arc<ConnectionRegistry>) {
    let (conn_id, mut rx) = connections.connect(&client_id).await;
    tracing::info!(client_id = %client_id, conn_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let sender_client = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            let message = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(json) => Message::Text(json.into()),
                        Err(e) => {
                            tracing::warn!(client_id = %sender_client, error = %e, "Event encoding failed");
                            continue;
                        }
                    },
                    // replaced by a newer connection, or registry cleared
                    None => Message::Close(None),
                },
                _ = ping.tick() => Message::Ping(Bytes::new()),
            };

            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                tracing::debug!(client_id = %sender_client, "WebSocket sink closed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(client_id = %client_id, "Pong received");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client_id = %client_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    connections.release(&client_id, conn_id).await;
    send_task.abort();
    tracing::info!(client_id = %client_id, conn_id, "WebSocket disconnected");
}
