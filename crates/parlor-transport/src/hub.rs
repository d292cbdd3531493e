//! In-process transport backed by one unbounded queue per connection.
//!
//! Each connection task registers itself, drains its receiver, and writes to
//! its socket. The hub only pushes into queues, so the core can fan out
//! without awaiting any I/O.

use dashmap::DashMap;
use parlor_protocol::{CloseCode, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{ConnectionId, Outbound, Transport, TransportError};

/// Registry of live connection outboxes.
#[derive(Debug, Default)]
pub struct ConnectionHub {
    outboxes: DashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
}

impl ConnectionHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiving end of its outbox.
    ///
    /// Registering an ID twice replaces the previous outbox.
    pub fn register(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(connection = %connection, "Outbox registered");
        self.outboxes.insert(connection, tx);
        rx
    }

    /// Remove a connection's outbox.
    ///
    /// Returns `true` if the connection was registered.
    pub fn unregister(&self, connection: &ConnectionId) -> bool {
        let removed = self.outboxes.remove(connection).is_some();
        if removed {
            debug!(connection = %connection, "Outbox removed");
        }
        removed
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// Check if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }

    fn push(&self, connection: &ConnectionId, item: Outbound) -> Result<(), TransportError> {
        let outbox = self
            .outboxes
            .get(connection)
            .ok_or_else(|| TransportError::UnknownConnection(connection.clone()))?;
        outbox
            .send(item)
            .map_err(|_| TransportError::ConnectionClosed(connection.clone()))
    }
}

impl Transport for ConnectionHub {
    fn deliver(
        &self,
        connection: &ConnectionId,
        event: Arc<ServerEvent>,
    ) -> Result<(), TransportError> {
        self.push(connection, Outbound::Event(event))
    }

    fn close(&self, connection: &ConnectionId, code: CloseCode) -> Result<(), TransportError> {
        debug!(connection = %connection, code = %code, "Closing connection");
        self.push(connection, Outbound::Close(code))
    }

    fn is_connected(&self, connection: &ConnectionId) -> bool {
        self.outboxes
            .get(connection)
            .is_some_and(|outbox| !outbox.is_closed())
    }

    fn connection_ids(&self) -> Vec<ConnectionId> {
        self.outboxes.iter().map(|e| e.key().clone()).collect()
    }
}
