//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections and provides broadcast capabilities
//! for pushing accepted records to connected clients.

use std::sync::Arc;

use dashmap::DashMap;
use tablesync_engine::ServerFrame;
use tokio::sync::mpsc;

/// Sender for outgoing frames.
pub type FrameSender = mpsc::UnboundedSender<ServerFrame>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Channel to send frames to this connection
    pub sender: FrameSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, sender: FrameSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                sender,
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if self.connections.remove(conn_id).is_some() {
            tracing::info!(conn_id = %conn_id, "WebSocket connection unregistered");
        }
    }

    /// Broadcast a frame to all connections except the sender.
    ///
    /// Returns the number of connections that received the frame.
    pub fn broadcast_except(&self, sender_conn_id: &str, frame: ServerFrame) -> usize {
        let sent_count = self
            .connections
            .iter()
            .filter(|entry| entry.id != sender_conn_id)
            .filter(|entry| entry.sender.send(frame.clone()).is_ok())
            .count();

        tracing::debug!(
            sender = %sender_conn_id,
            recipients = sent_count,
            "Broadcast frame to connections"
        );

        sent_count
    }

    /// Broadcast a frame to all connections.
    ///
    /// Returns the number of connections that received the frame.
    pub fn broadcast_all(&self, frame: ServerFrame) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.sender.send(frame.clone()).is_ok())
            .count()
    }

    /// Send a frame to a specific connection.
    pub fn send_to(&self, conn_id: &str, frame: ServerFrame) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(frame).is_ok())
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
