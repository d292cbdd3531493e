//! # parlor-transport
//!
//! Connection-facing delivery layer for Parlor.
//!
//! - [`Transport`] - the interface the core uses to reach connections
//! - [`ConnectionHub`] - an in-process implementation with one outbox per
//!   connection, drained by that connection's socket task
//!
//! ```rust,ignore
//! use parlor_transport::{ConnectionHub, ConnectionId, Outbound};
//!
//! let hub = ConnectionHub::new();
//! let mut outbox = hub.register(ConnectionId::generate());
//! while let Some(item) = outbox.recv().await {
//!     match item {
//!         Outbound::Event(event) => { /* encode and write */ }
//!         Outbound::Close(code) => break,
//!     }
//! }
//! ```

pub mod hub;
pub mod traits;

pub use hub::ConnectionHub;
pub use traits::{ConnectionId, Outbound, Transport, TransportError};
