//! # parlor-core
//!
//! Session coordination, presence and message routing for the Parlor chat
//! server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Who is online, and through which connections
//! - **Coordinator** - Connect/disconnect lifecycle with a grace period
//! - **Router** - Broadcast and private message fan-out
//! - **History** - Bounded private thread logs
//! - **Dispatch** - The single entry point for transport events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ Dispatcher  │────▶│ Coordinator │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//!        │            ┌─────────────┐     ┌─────────────┐
//!        └────────────│   Router    │────▶│  Registry   │
//!                     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │   History   │
//!                     └─────────────┘
//! ```

pub mod coordinator;
pub mod dispatch;
pub mod history;
pub mod message;
pub mod registry;
pub mod router;

pub use coordinator::{ConnectOutcome, SessionCoordinator, SessionError, DEFAULT_GRACE_PERIOD};
pub use dispatch::{ConnectionContext, CoreConfig, DispatchError, Dispatcher, InboundEvent};
pub use history::{HistoryStore, ThreadKey, DEFAULT_MAX_MESSAGES_PER_THREAD};
pub use registry::{ConnectionRegistry, Registration, Session};
pub use router::{MessageRouter, RouterError, RouterStats};
