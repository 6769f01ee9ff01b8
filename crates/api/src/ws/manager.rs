use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use fetchplane_core::types::{DbId, JobId, Timestamp};

/// Channel sender half for pushing control frames to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single live stream connection.
pub struct WsConnection {
    /// Authenticated user that opened the stream.
    pub user_id: DbId,
    /// Job being watched.
    pub job_id: JobId,
    /// Channel sender for control frames (ping, close).
    pub sender: WsSender,
    /// When this connection was established.
    pub connected_at: Timestamp,
}

/// Manages all active stream connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. Progress events do not pass through
/// here: each connection reads its own progress subscription.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    /// Create a new, empty connection manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the control channel so the caller can
    /// forward frames to the WebSocket sink.
    pub async fn add(
        &self,
        conn_id: String,
        user_id: DbId,
        job_id: JobId,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            user_id,
            job_id,
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a connection by its ID.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Number of open streams watching `job_id`.
    pub async fn watchers_of(&self, job_id: JobId) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.job_id == job_id)
            .count()
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all clients before the
    /// server stops.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Ping every stream. A stream whose receiver is gone is removed;
    /// returns how many were removed.
    pub async fn ping_all(&self) -> usize {
        let mut conns = self.connections.write().await;
        let before = conns.len();
        conns.retain(|_, conn| conn.sender.send(Message::Ping(Bytes::new())).is_ok());
        before - conns.len()
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_connections_per_job() {
        let manager = WsManager::new();
        let job_a = uuid::Uuid::from_u128(1);
        let job_b = uuid::Uuid::from_u128(2);

        let _rx1 = manager.add("c1".into(), 7, job_a).await;
        let _rx2 = manager.add("c2".into(), 8, job_a).await;
        let _rx3 = manager.add("c3".into(), 7, job_b).await;

        assert_eq!(manager.connection_count().await, 3);
        assert_eq!(manager.watchers_of(job_a).await, 2);

        manager.remove("c1").await;
        assert_eq!(manager.watchers_of(job_a).await, 1);
    }

    #[tokio::test]
    async fn shutdown_sends_close_and_clears() {
        let manager = WsManager::new();
        let mut rx = manager.add("c1".into(), 1, uuid::Uuid::from_u128(1)).await;

        manager.shutdown_all().await;

        assert!(matches!(rx.recv().await, Some(Message::Close(None))));
        assert_eq!(manager.connection_count().await, 0);
    }

    #[tokio::test]
    async fn ping_prunes_streams_with_dropped_receivers() {
        let manager = WsManager::new();
        let job = uuid::Uuid::from_u128(1);
        let mut live = manager.add("live".into(), 1, job).await;
        drop(manager.add("gone".into(), 2, job).await);

        assert_eq!(manager.ping_all().await, 1);
        assert_eq!(manager.connection_count().await, 1);
        assert!(matches!(live.recv().await, Some(Message::Ping(_))));
    }
}
