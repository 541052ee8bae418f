use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use easel_core::protocol::Envelope;
use futures::{SinkExt, StreamExt};

use crate::state::AppState;

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Outbound traffic (replies and broadcasts) goes through the manager's
/// channel and a dedicated sender task. Each inbound call is dispatched
/// on its own task so a slow handler never blocks the read loop or other
/// calls on the same connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = state.ws_manager.add(conn_id.clone()).await;
    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => dispatch_frame(&state, &conn_id, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(conn_id = %conn_id, "Binary frame dropped");
            }
            Ok(Message::Ping(_)) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Decode one text frame and run its handler in the background.
/// Malformed frames are logged and dropped.
fn dispatch_frame(state: &AppState, conn_id: &str, text: &str) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "Malformed frame dropped");
            return;
        }
    };

    tracing::debug!(
        conn_id,
        kind = %envelope.kind,
        request_id = envelope.request_id,
        "Inbound call",
    );

    let state = state.clone();
    let conn_id = conn_id.to_string();
    tokio::spawn(async move {
        let registry = state.registry.clone();
        if let Some(reply) = registry.dispatch(envelope, &state).await {
            if !state.ws_manager.send_envelope(&conn_id, &reply).await {
                tracing::debug!(conn_id = %conn_id, kind = %reply.kind, "Reply dropped, connection gone");
            }
        }
    });
}
