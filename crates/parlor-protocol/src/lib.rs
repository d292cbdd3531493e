//! # parlor-protocol
//!
//! Wire protocol definitions for the Parlor chat coordinator.
//!
//! Every message exchanged with a client is an event object of the shape
//! `{"event": "<name>", "data": <payload>}`. Browsers usually speak JSON over
//! text frames; native clients may use length-prefixed MessagePack over
//! binary frames. Both encodings carry the same event types.
//!
//! ## Events
//!
//! - [`ClientEvent`] - everything a connected client may send
//! - [`ServerEvent`] - everything the server pushes to a connection
//!
//! ## Example
//!
//! ```rust
//! use parlor_protocol::{codec, ClientEvent};
//!
//! let event: ClientEvent =
//!     codec::decode_json(r#"{"event":"chat-message","data":"hello"}"#).unwrap();
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod close;
pub mod codec;
pub mod frames;
pub mod payloads;

pub use close::CloseCode;
pub use codec::{decode, encode, Encoding, ProtocolError};
pub use frames::{ClientEvent, ServerEvent};
pub use payloads::{
    ChatMessage, ChatPayload, ConnectedPayload, LoadHistoryRequest, MessageKind,
    PrivateHistory, PrivateMessage, PrivateMessageRequest, SessionSummary,
};
