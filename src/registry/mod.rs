//! Live client connection registry
//!
//! Maps a client identifier to the outbound channel of its WebSocket. The
//! bridge listener calls [`ConnectionRegistry::route`] for every event it
//! receives; a missing or dead recipient is reported as `false` and never
//! fails the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use crate::events::ProgressEvent;

/// Sender half feeding one client connection
pub type ConnectionSender = mpsc::UnboundedSender<ProgressEvent>;

/// Identifies one registration; distinguishes a replaced socket from its successor
pub type ConnectionId = u64;

struct Connection {
    id: ConnectionId,
    sender: ConnectionSender,
}

/// At most one active connection per client identifier.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connection handle, replacing any prior one for `client_id`.
    pub async fn register(&self, client_id: &str, sender: ConnectionSender) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Connection { id, sender };

        let previous = self
            .connections
            .write()
            .await
            .insert(client_id.to_string(), conn);

        match previous {
            Some(old) => info!(
                client_id,
                conn_id = id,
                replaced = old.id,
                "Connection replaced"
            ),
            None => info!(client_id, conn_id = id, "Connection registered"),
        }

        id
    }

    /// Create a channel, register its sender, and hand back the receiver.
    pub async fn connect(
        &self,
        client_id: &str,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(client_id, tx).await;
        (id, rx)
    }

    /// Remove whatever connection is registered for `client_id`.
    pub async fn unregister(&self, client_id: &str) -> bool {
        let removed = self.connections.write().await.remove(client_id).is_some();
        if removed {
            info!(client_id, "Connection unregistered");
        }
        removed
    }

    /// Remove the entry only if it still belongs to connection `id`.
    ///
    /// Called when a socket closes; a newer registration for the same client
    /// is left in place.
    pub async fn release(&self, client_id: &str, id: ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get(client_id) {
            Some(conn) if conn.id == id => {
                conns.remove(client_id);
                info!(client_id, conn_id = id, "Connection released");
                true
            }
            _ => false,
        }
    }

    /// Push an event to the client's live connection.
    ///
    /// Returns `false` when no connection is registered or the connection
    /// has gone away; a dead entry is dropped.
    pub async fn route(&self, client_id: &str, event: &ProgressEvent) -> bool {
        let failed_id = {
            let conns = self.connections.read().await;
            let Some(conn) = conns.get(client_id) else {
                debug!(client_id, "No connection for client, event dropped");
                return false;
            };

            match conn.sender.send(event.clone()) {
                Ok(()) => return true,
                Err(_) => conn.id,
            }
        };

        debug!(client_id, conn_id = failed_id, "Send failed, removing connection");
        self.release(client_id, failed_id).await;
        false
    }

    pub async fn is_connected(&self, client_id: &str) -> bool {
        self.connections.read().await.contains_key(client_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Drop every registration; used at shutdown.
    pub async fn clear(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        conns.clear();
        info!(count, "Cleared all connections");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::JobState;

    fn event(client_id: &str) -> ProgressEvent {
        ProgressEvent::new("job-1", client_id, JobState::Processing, "working")
    }

    #[tokio::test]
    async fn test_route_to_unknown_client_returns_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.route("nobody", &event("nobody")).await);
    }

    #[tokio::test]
    async fn test_route_delivers_to_registered_client() {
        let registry = ConnectionRegistry::new();
        let (_id, mut rx) = registry.connect("c1").await;

        assert!(registry.route("c1", &event("c1")).await);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.client_id, "c1");
        assert_eq!(received.message, "working");
    }

    #[tokio::test]
    async fn test_reregister_routes_only_to_new_handle() {
        let registry = ConnectionRegistry::new();
        let (_old_id, mut old_rx) = registry.connect("c1").await;
        let (_new_id, mut new_rx) = registry.connect("c1").await;

        assert_eq!(registry.connection_count().await, 1);
        assert!(registry.route("c1", &event("c1")).await);

        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_release_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let (old_id, _old_rx) = registry.connect("c1").await;
        let (new_id, _new_rx) = registry.connect("c1").await;

        assert!(!registry.release("c1", old_id).await);
        assert!(registry.is_connected("c1").await);

        assert!(registry.release("c1", new_id).await);
        assert!(!registry.is_connected("c1").await);
    }

    #[tokio::test]
    async fn test_dead_connection_is_removed_on_route() {
        let registry = ConnectionRegistry::new();
        let (_id, rx) = registry.connect("c1").await;
        drop(rx);

        assert!(!registry.route("c1", &event("c1")).await);
        assert!(!registry.is_connected("c1").await);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ConnectionRegistry::new();
        let (_id, _rx) = registry.connect("c1").await;

        assert!(registry.unregister("c1").await);
        assert!(!registry.unregister("c1").await);
        assert!(!registry.route("c1", &event("c1")).await);
    }
}
