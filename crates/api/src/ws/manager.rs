use std::collections::HashMap;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::Message;
use easel_core::protocol::Envelope;
use tokio::sync::{mpsc, RwLock};

use crate::engine::Broadcaster;

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Tracks every open WebSocket connection.
///
/// Thread-safe via interior `RwLock`; shared across the application in
/// an `Arc`.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsSender>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(&self, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(conn_id, tx);
        rx
    }

    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Send a message to one connection. Returns `false` when the
    /// connection is gone or its channel is closed.
    pub async fn send_to(&self, conn_id: &str, message: Message) -> bool {
        match self.connections.read().await.get(conn_id) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Encode an envelope and send it to one connection.
    pub async fn send_envelope(&self, conn_id: &str, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(text) => self.send_to(conn_id, Message::Text(text.into())).await,
            Err(e) => {
                tracing::error!(conn_id, kind = %envelope.kind, error = %e, "Failed to encode envelope");
                false
            }
        }
    }

    /// Broadcast a message to all connected clients.
    ///
    /// Connections whose send channels are closed are skipped; they are
    /// cleaned up when their receive loop ends.
    pub async fn broadcast(&self, message: Message) {
        let conns = self.connections.read().await;
        for sender in conns.values() {
            let _ = sender.send(message.clone());
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for sender in conns.values() {
            let _ = sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for sender in conns.values() {
            let _ = sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broadcaster for WsManager {
    /// Serialize once and fan out to every open connection.
    async fn broadcast(&self, envelope: Envelope) {
        match envelope.encode() {
            Ok(text) => WsManager::broadcast(self, Message::Text(text.into())).await,
            Err(e) => {
                tracing::error!(kind = %envelope.kind, error = %e, "Failed to encode broadcast");
            }
        }
    }
}
