//! WebSocket push: every connected client receives the periodic
//! `stats_update` / `system_update` snapshots emitted by the broadcaster
//! task in `server::run`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::state::AppState;

/// GET /api/ws — upgrade and stream snapshots until the client leaves.
pub async fn snapshot_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.events_tx.subscribe();
    tracing::debug!("websocket client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(message) => {
                        if sink.send(Message::Text(message)).await.is_err() {
                            break;
                        }
                    }
                    // Skipped messages on lag are fine; snapshots are
                    // self-contained.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "websocket client lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {} // Inbound data is ignored.
                    Some(Err(_)) => break,
                }
            }
        }
    }
    tracing::debug!("websocket client disconnected");
}
