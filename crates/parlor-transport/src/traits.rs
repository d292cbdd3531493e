//! Transport abstraction for Parlor.
//!
//! The core never touches sockets. It hands events to a [`Transport`], which
//! owns the per-connection delivery path. Delivery is fire-and-forget: a
//! failure for one connection is reported to the caller and never blocks
//! delivery to the others.

use parlor_protocol::{CloseCode, ServerEvent};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Unique identifier for a connection (or a declared tab).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection with this ID is registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection's task has already gone away.
    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),
}

/// Something queued for a single connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Encode and send this event.
    Event(Arc<ServerEvent>),
    /// Close the socket with this code.
    Close(CloseCode),
}

/// Delivers events to individual connections.
///
/// Implementations must not block: every method is called from inside the
/// core's request handling and may run for many connections in a row.
pub trait Transport: Send + Sync {
    /// Queue an event for one connection.
    fn deliver(&self, connection: &ConnectionId, event: Arc<ServerEvent>)
        -> Result<(), TransportError>;

    /// Ask a connection to close with the given code.
    fn close(&self, connection: &ConnectionId, code: CloseCode) -> Result<(), TransportError>;

    /// Whether the connection is currently live.
    fn is_connected(&self, connection: &ConnectionId) -> bool;

    /// Snapshot of every live connection.
    fn connection_ids(&self) -> Vec<ConnectionId>;

    /// Deliver to each target, skipping failures.
    ///
    /// Returns the number of connections the event was queued for.
    fn deliver_to(&self, targets: &[ConnectionId], event: Arc<ServerEvent>) -> usize {
        let mut delivered = 0;
        for target in targets {
            match self.deliver(target, Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(e) => trace!(connection = %target, error = %e, "Skipped delivery"),
            }
        }
        delivered
    }

    /// Deliver to every live connection, optionally skipping one.
    ///
    /// Returns the number of connections the event was queued for.
    fn broadcast(&self, event: Arc<ServerEvent>, except: Option<&ConnectionId>) -> usize {
        let targets: Vec<ConnectionId> = self
            .connection_ids()
            .into_iter()
            .filter(|id| Some(id) != except)
            .collect();
        self.deliver_to(&targets, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 36);
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "tab-7".into();
        assert_eq!(id.as_str(), "tab-7");
        assert_eq!(id.to_string(), "tab-7");
    }
}
