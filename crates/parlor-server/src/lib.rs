//! # parlor-server
//!
//! WebSocket front end for the Parlor chat coordinator: token check on
//! upgrade, JSON and MessagePack framing, heartbeat, and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use auth::{AuthError, IdentityVerifier, JwtVerifier};
pub use config::Config;
pub use handlers::{router, run_server, AppState};
