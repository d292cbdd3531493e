//! Message routing for Parlor.
//!
//! Broadcast chat goes to every live connection. Private messages go to every
//! tab of both participants and are recorded in the [`HistoryStore`].

use crate::history::HistoryStore;
use crate::message;
use crate::registry::ConnectionRegistry;
use parlor_protocol::{ChatPayload, PrivateMessage, PrivateMessageRequest, ServerEvent};
use parlor_transport::{ConnectionId, Transport};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Router errors.
///
/// All of these are reported to the originating connection only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// Sender and receiver are the same identity.
    #[error("Cannot send a private message to yourself")]
    SelfMessage,

    /// The receiver has no live session.
    #[error("Recipient is offline: {0}")]
    RecipientOffline(String),

    /// The requesting identity has no live session.
    #[error("Not connected: {0}")]
    SenderOffline(String),

    /// The message declared a kind other than text or image.
    #[error("Invalid message kind: {0}")]
    InvalidKind(String),
}

/// Routes chat and private messages to connections.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    history: Arc<HistoryStore>,
    transport: Arc<dyn Transport>,
}

impl MessageRouter {
    /// Create a router over shared registry, history and transport.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        history: Arc<HistoryStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            history,
            transport,
        }
    }

    /// Broadcast a chat message to every live connection.
    ///
    /// If the sender's session has vanished the message is dropped and
    /// `Ok(0)` is returned. Otherwise returns the number of recipients.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidKind`] if the body names an unknown kind.
    pub fn broadcast_chat(
        &self,
        sender: &str,
        connection: &ConnectionId,
        raw: ChatPayload,
    ) -> Result<usize, RouterError> {
        if !self.registry.is_online(sender) {
            debug!(sender = %sender, "Dropping chat from vanished session");
            return Ok(0);
        }

        let message = message::chat_message(sender, connection, raw)?;
        let count = self
            .transport
            .broadcast(Arc::new(ServerEvent::ChatMessage(message)), None);

        trace!(sender = %sender, recipients = count, "Broadcast chat message");
        Ok(count)
    }

    /// Send a private message to every tab of both participants and record it.
    ///
    /// # Errors
    ///
    /// Returns an error for self-messages, offline receivers, or an unknown
    /// kind. Nothing is recorded in that case.
    pub fn route_private(
        &self,
        sender: &str,
        connection: &ConnectionId,
        request: PrivateMessageRequest,
    ) -> Result<PrivateMessage, RouterError> {
        let receiver = request.receiver_username.as_str();
        if receiver == sender {
            return Err(RouterError::SelfMessage);
        }

        let receiver_tabs = self.registry.tabs_of(receiver);
        if receiver_tabs.is_empty() {
            return Err(RouterError::RecipientOffline(receiver.to_string()));
        }

        let kind = message::parse_kind(&request.kind)?;
        let message = message::private_message(sender, connection, receiver, kind, request.payload);
        self.history.append(sender, receiver, message.clone());

        let targets: Vec<ConnectionId> = self
            .registry
            .tabs_of(sender)
            .into_iter()
            .chain(receiver_tabs)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let count = self
            .transport
            .deliver_to(&targets, Arc::new(ServerEvent::PrivateMessage(message.clone())));

        trace!(
            sender = %sender,
            receiver = %receiver,
            tabs = targets.len(),
            delivered = count,
            "Routed private message"
        );
        Ok(message)
    }

    /// Full private thread between the requester and `target`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::SenderOffline`] if the requester has no live
    /// session.
    pub fn load_history(
        &self,
        requester: &str,
        target: &str,
    ) -> Result<Vec<PrivateMessage>, RouterError> {
        if !self.registry.is_online(requester) {
            return Err(RouterError::SenderOffline(requester.to_string()));
        }
        Ok(self.history.read(requester, target))
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            session_count: self.registry.len(),
            connection_count: self.transport.connection_ids().len(),
            thread_count: self.history.thread_count(),
        }
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of sessions, including those in their grace period.
    pub session_count: usize,
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of private threads.
    pub thread_count: usize,
}
