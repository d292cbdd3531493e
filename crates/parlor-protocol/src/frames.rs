//! Event types for the Parlor protocol.
//!
//! Events are adjacently tagged: `{"event": "chat-message", "data": ...}`.
//! Events without a body omit `data`.

use serde::{Deserialize, Serialize};

use crate::payloads::{
    ChatMessage, ChatPayload, ConnectedPayload, LoadHistoryRequest, PrivateHistory,
    PrivateMessage, PrivateMessageRequest, SessionSummary,
};

/// An event sent by a client over an authenticated connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Broadcast a message to everyone online.
    ChatMessage(ChatPayload),
    /// Send a message to one other identity.
    PrivateMessage(PrivateMessageRequest),
    /// Fetch the private thread with another identity.
    LoadPrivateHistory(LoadHistoryRequest),
    /// Declare another tab identifier for this identity.
    TabSync(String),
    /// Ask for the current presence snapshot.
    RequestUserList,
    /// Re-assert this connection as canonical after a client-side reconnect.
    Reconnect(u32),
}

impl ClientEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::ChatMessage(_) => "chat-message",
            ClientEvent::PrivateMessage(_) => "private-message",
            ClientEvent::LoadPrivateHistory(_) => "load-private-history",
            ClientEvent::TabSync(_) => "tab-sync",
            ClientEvent::RequestUserList => "request-user-list",
            ClientEvent::Reconnect(_) => "reconnect",
        }
    }
}

/// An event pushed by the server to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Handshake acknowledgement.
    Connected(ConnectedPayload),
    /// An identity came online.
    UserJoined(String),
    /// An identity went offline after its grace period.
    UserLeft(String),
    /// Full presence snapshot, in join order.
    UserList(Vec<SessionSummary>),
    /// A broadcast chat message.
    ChatMessage(ChatMessage),
    /// A private message, delivered to both participants' tabs.
    PrivateMessage(PrivateMessage),
    /// Reply to `load-private-history`.
    PrivateHistory(PrivateHistory),
    /// Tells a connection its own identifier.
    VerifyConnectionId(String),
    /// Human-readable failure reason for the originating connection.
    Error(String),
}

impl ServerEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::UserJoined(_) => "user-joined",
            ServerEvent::UserLeft(_) => "user-left",
            ServerEvent::UserList(_) => "user-list",
            ServerEvent::ChatMessage(_) => "chat-message",
            ServerEvent::PrivateMessage(_) => "private-message",
            ServerEvent::PrivateHistory(_) => "private-history",
            ServerEvent::VerifyConnectionId(_) => "verify-connection-id",
            ServerEvent::Error(_) => "error",
        }
    }

    /// Create an error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(message.into())
    }
}
