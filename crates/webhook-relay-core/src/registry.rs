//! Registry of live client connections with best-effort fan-out.

use std::{
    collections::HashMap,
    fmt,
    sync::{PoisonError, RwLock},
};

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::Envelope;

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Send error.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Connection {0} closed")]
    Closed(ConnectionId),
}

/// Handle to one remote client's outbound queue.
///
/// The socket writer owns the receiving half; once it stops (socket closed
/// or write failed) every further send fails. Sends to one connection are
/// delivered in order.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Connection {
    /// Create a connection and the receiver its writer drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the writer side is still draining this connection.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue an envelope for delivery.
    ///
    /// # Errors
    /// Returns error if the connection is closed.
    pub fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        self.tx
            .send(envelope)
            .map_err(|_| SendError::Closed(self.id))
    }
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the envelope was handed to.
    pub delivered: usize,
    /// Connections that failed and were removed.
    pub failed: Vec<ConnectionId>,
}

/// Set of connections believed reachable.
///
/// A connection is dropped from the set the moment a send to it fails.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection.
    pub fn add(&self, conn: Connection) {
        let id = conn.id();
        let total = {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            connections.insert(id, conn);
            connections.len()
        };
        tracing::debug!(connection_id = %id, total, "Connection registered");
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let removed = connections.remove(&id).is_some();
            (removed, connections.len())
        };
        if removed {
            tracing::debug!(connection_id = %id, total, "Connection removed");
        }
        removed
    }

    /// Whether a connection is currently registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an envelope to every registered connection.
    ///
    /// A failed send removes that connection immediately and the fan-out
    /// carries on with the rest; nothing is retried.
    pub fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        let targets: Vec<Connection> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut report = BroadcastReport::default();
        for conn in targets {
            match conn.send(envelope.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("Failed to send to client: {e}");
                    self.remove(conn.id());
                    report.failed.push(conn.id());
                }
            }
        }

        tracing::debug!(
            kind = envelope.kind(),
            delivered = report.delivered,
            failed = report.failed.len(),
            "Broadcast complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = Connection::new();
        let (b, _rx_b) = Connection::new();
        let (a_id, b_id) = (a.id(), b.id());

        registry.add(a);
        registry.add(b);
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(a_id));
        assert!(!registry.remove(a_id));
        assert!(registry.contains(b_id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_connection_ids_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
        assert!(ConnectionId::new().to_string().starts_with("conn_"));
    }

    #[test]
    fn test_broadcast_reaches_every_connection() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (conn, rx) = Connection::new();
            registry.add(conn);
            receivers.push(rx);
        }

        let report = registry.broadcast(&Envelope::ping());
        assert_eq!(report.delivered, 3);
        assert!(report.failed.is_empty());
        for rx in &mut receivers {
            assert!(matches!(rx.try_recv(), Ok(Envelope::Ping { .. })));
        }
    }

    #[test]
    fn test_broadcast_drops_closed_connection() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = Connection::new();
        let (b, mut rx_b) = Connection::new();
        let (a_id, b_id) = (a.id(), b.id());
        registry.add(a);
        registry.add(b);

        // Simulate A's socket going away.
        drop(rx_a);

        let report = registry.broadcast(&Envelope::pong());
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![a_id]);
        assert!(!registry.contains(a_id));
        assert!(registry.contains(b_id));
        assert_eq!(registry.len(), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_with_no_connections() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.broadcast(&Envelope::ping()), BroadcastReport::default());
    }

    #[test]
    fn test_per_connection_order_is_fifo() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = Connection::new();
        registry.add(conn);

        registry.broadcast(&Envelope::Ping { timestamp: Some(1) });
        registry.broadcast(&Envelope::Ping { timestamp: Some(2) });

        assert_eq!(rx.try_recv().unwrap(), Envelope::Ping { timestamp: Some(1) });
        assert_eq!(rx.try_recv().unwrap(), Envelope::Ping { timestamp: Some(2) });
    }
}
