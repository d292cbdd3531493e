//! Payload types carried inside events.
//!
//! Field names are camelCase on the wire to match what browser clients send.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of content a chat message may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// An image, usually a data URL or a link.
    Image,
}

impl MessageKind {
    /// The wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            other => Err(other.to_string()),
        }
    }
}

/// Body of an inbound `chat-message`.
///
/// Clients send either a bare string (treated as text) or an object that
/// names its kind. The kind stays a raw string here so an unknown kind can be
/// reported instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatPayload {
    /// Shorthand for a text message.
    Text(String),
    /// A message with an explicit kind.
    Structured {
        /// Declared kind, validated by the router.
        kind: String,
        /// Opaque content.
        payload: serde_json::Value,
    },
}

/// Body of an inbound `private-message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessageRequest {
    /// Who the message is for.
    pub receiver_username: String,
    /// Declared kind, validated by the router.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Opaque content.
    pub payload: serde_json::Value,
}

fn default_kind() -> String {
    MessageKind::Text.as_str().to_string()
}

/// Body of an inbound `load-private-history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadHistoryRequest {
    /// The other participant of the thread.
    pub target_username: String,
}

/// A chat message as delivered to every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender_username: String,
    pub sender_connection_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
}

/// A private message between exactly two identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    pub sender_username: String,
    pub sender_connection_id: String,
    pub receiver_username: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    /// Always `true`; lets clients share one message renderer.
    pub is_private: bool,
}

/// Reply to `load-private-history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateHistory {
    /// The other participant of the thread.
    pub target_username: String,
    /// Messages, oldest first.
    pub messages: Vec<PrivateMessage>,
}

/// One entry of the `user-list` presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub username: String,
    pub primary_connection_id: String,
    /// Sorted connection/tab identifiers.
    pub tabs: Vec<String>,
    pub connected_at: DateTime<Utc>,
}

/// Handshake acknowledgement sent once a connection is authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// Identifier the server assigned to this connection.
    pub connection_id: String,
    /// The verified identity.
    pub username: String,
    /// Recommended heartbeat interval in milliseconds.
    pub heartbeat_ms: u64,
}
