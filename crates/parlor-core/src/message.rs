//! Construction and validation of chat messages.
//!
//! Inbound bodies arrive loosely shaped; these helpers turn them into the
//! typed messages the router delivers.

use chrono::Utc;
use parlor_protocol::{ChatMessage, ChatPayload, MessageKind, PrivateMessage};
use parlor_transport::ConnectionId;

use crate::router::RouterError;

/// Parse a declared kind, rejecting anything but text and image.
///
/// # Errors
///
/// Returns [`RouterError::InvalidKind`] for unknown kinds.
pub fn parse_kind(kind: &str) -> Result<MessageKind, RouterError> {
    kind.parse().map_err(RouterError::InvalidKind)
}

/// Normalize an inbound chat body into a kind and payload.
///
/// A bare string becomes a text message.
///
/// # Errors
///
/// Returns [`RouterError::InvalidKind`] if a structured body names an
/// unknown kind.
pub fn normalize(raw: ChatPayload) -> Result<(MessageKind, serde_json::Value), RouterError> {
    match raw {
        ChatPayload::Text(text) => Ok((MessageKind::Text, serde_json::Value::String(text))),
        ChatPayload::Structured { kind, payload } => Ok((parse_kind(&kind)?, payload)),
    }
}

/// Build a broadcast message stamped with the current time.
///
/// # Errors
///
/// Returns [`RouterError::InvalidKind`] if the body names an unknown kind.
pub fn chat_message(
    sender: &str,
    connection: &ConnectionId,
    raw: ChatPayload,
) -> Result<ChatMessage, RouterError> {
    let (kind, payload) = normalize(raw)?;
    Ok(ChatMessage {
        sender_username: sender.to_string(),
        sender_connection_id: connection.to_string(),
        timestamp: Utc::now(),
        kind,
        payload,
    })
}

/// Build a private message stamped with the current time.
#[must_use]
pub fn private_message(
    sender: &str,
    connection: &ConnectionId,
    receiver: &str,
    kind: MessageKind,
    payload: serde_json::Value,
) -> PrivateMessage {
    PrivateMessage {
        sender_username: sender.to_string(),
        sender_connection_id: connection.to_string(),
        receiver_username: receiver.to_string(),
        timestamp: Utc::now(),
        kind,
        payload,
        is_private: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_text_normalizes() {
        let msg = chat_message("alice", &"c1".into(), ChatPayload::Text("hello".into())).unwrap();
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.payload, json!("hello"));
        assert_eq!(msg.sender_connection_id, "c1");
    }

    #[test]
    fn test_structured_image_keeps_payload() {
        let raw = ChatPayload::Structured {
            kind: "image".into(),
            payload: json!({"url": "https://example.com/a.png"}),
        };
        let (kind, payload) = normalize(raw).unwrap();
        assert_eq!(kind, MessageKind::Image);
        assert_eq!(payload["url"], "https://example.com/a.png");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let raw = ChatPayload::Structured {
            kind: "video".into(),
            payload: json!("..."),
        };
        assert!(matches!(
            normalize(raw),
            Err(RouterError::InvalidKind(kind)) if kind == "video"
        ));
    }

    #[test]
    fn test_private_message_flag() {
        let msg = private_message("alice", &"c1".into(), "bob", MessageKind::Text, json!("hi"));
        assert!(msg.is_private);
        assert_eq!(msg.receiver_username, "bob");
    }
}
