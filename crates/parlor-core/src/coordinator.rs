//! Session lifecycle for Parlor.
//!
//! The coordinator turns connect and disconnect events into registry updates
//! and presence broadcasts. It keeps one canonical connection per identity
//! (the newest wins) and delays declaring an identity offline by a grace
//! period, so a quick refresh or network blip does not flap presence.
//!
//! ```text
//! Absent ──connect──▶ Active ──last tab gone──▶ Grace ──timer──▶ Absent
//!                       ▲                         │
//!                       └────────reconnect────────┘
//! ```

use crate::registry::ConnectionRegistry;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parlor_protocol::{CloseCode, ServerEvent};
use parlor_transport::{ConnectionId, Transport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default delay between the last tab closing and the identity going offline.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Session lifecycle errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The declared tab is a live connection of another identity.
    #[error("Tab {tab} belongs to another user")]
    TabOwnedElsewhere {
        /// The rejected tab identifier.
        tab: ConnectionId,
    },

    /// The identity has no session to attach a tab to.
    #[error("No session for {0}")]
    UnknownSession(String),
}

/// What a connect did, for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// A new session was created and `user-joined` was broadcast.
    pub joined: bool,
    /// The previous canonical connection that was force-closed.
    pub replaced: Option<ConnectionId>,
    /// A pending eviction was cancelled.
    pub resumed: bool,
}

/// A scheduled removal for one username.
#[derive(Debug)]
struct PendingEviction {
    generation: u64,
    connection: ConnectionId,
    handle: JoinHandle<()>,
}

/// Shared state the eviction task needs after the coordinator call returns.
#[derive(Clone)]
struct Presence {
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn Transport>,
    evictions: Arc<DashMap<String, PendingEviction>>,
}

impl Presence {
    fn broadcast_user_list(&self) -> usize {
        let list = ServerEvent::UserList(self.registry.summaries());
        self.transport.broadcast(Arc::new(list), None)
    }
}

/// Drives the per-identity connection state machine.
pub struct SessionCoordinator {
    presence: Presence,
    generation: AtomicU64,
    grace_period: Duration,
}

impl SessionCoordinator {
    /// Create a coordinator with the default grace period.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self::with_grace_period(registry, transport, DEFAULT_GRACE_PERIOD)
    }

    /// Create a coordinator with a custom grace period.
    #[must_use]
    pub fn with_grace_period(
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn Transport>,
        grace_period: Duration,
    ) -> Self {
        Self {
            presence: Presence {
                registry,
                transport,
                evictions: Arc::new(DashMap::new()),
            },
            generation: AtomicU64::new(0),
            grace_period,
        }
    }

    /// The configured grace period.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Register `connection` as the canonical connection for `username`.
    ///
    /// A different, still-live canonical connection is closed with
    /// [`CloseCode::SessionReplaced`]. Everyone except the new connection
    /// hears `user-joined` if the session is new, and everyone gets a fresh
    /// `user-list`. Any pending eviction for the username is cancelled.
    pub fn connect(&self, username: &str, connection: &ConnectionId) -> ConnectOutcome {
        // Held until the end so a firing eviction for this username cannot
        // interleave its broadcasts with ours.
        let pending = self.presence.evictions.entry(username.to_string());

        let registration = self
            .presence
            .registry
            .claim_primary(username, connection.clone());

        let replaced = registration
            .displaced
            .filter(|old| self.presence.transport.is_connected(old));
        if let Some(old) = &replaced {
            info!(username = %username, old = %old, new = %connection, "Replacing session");
            if let Err(e) = self.presence.transport.close(old, CloseCode::SessionReplaced) {
                warn!(connection = %old, error = %e, "Failed to close replaced connection");
            }
        }

        if registration.created {
            let joined = ServerEvent::UserJoined(username.to_string());
            self.presence
                .transport
                .broadcast(Arc::new(joined), Some(connection));
        }
        self.presence.broadcast_user_list();

        let resumed = cancel_pending(pending);
        debug!(
            username = %username,
            connection = %connection,
            joined = registration.created,
            resumed,
            "Connected"
        );

        ConnectOutcome {
            joined: registration.created,
            replaced,
            resumed,
        }
    }

    /// Re-assert an existing connection as canonical.
    ///
    /// Used when a client reports a reconnect on a socket that is already
    /// authenticated. Nothing is force-closed and no `user-joined` is sent.
    /// A connection that was displaced by a newer live one stays displaced;
    /// only the pending eviction is cancelled.
    ///
    /// Returns `true` if the connection is canonical afterwards.
    pub fn reconnect(&self, username: &str, connection: &ConnectionId) -> bool {
        let pending = self.presence.evictions.entry(username.to_string());

        let transport = &self.presence.transport;
        let reasserted = self.presence.registry.reassert_primary(
            username,
            connection.clone(),
            |current| transport.is_connected(current),
        );
        if reasserted {
            self.presence.broadcast_user_list();
        } else {
            debug!(
                username = %username,
                connection = %connection,
                "Ignoring reconnect from displaced connection"
            );
        }

        let resumed = cancel_pending(pending);
        debug!(username = %username, connection = %connection, reasserted, resumed, "Reconnected");
        reasserted
    }

    /// Handle a closed connection.
    ///
    /// Returns `true` if it was the identity's last tab and an eviction was
    /// scheduled.
    pub fn disconnect(&self, username: &str, connection: &ConnectionId) -> bool {
        let now_empty = self.presence.registry.remove_tab(username, connection);
        if now_empty {
            self.schedule_eviction(username, connection.clone());
        }
        now_empty
    }

    /// Attribute an extra tab to the identity behind `declared_by`.
    ///
    /// # Errors
    ///
    /// Fails if the tab is attributed to another identity or the identity
    /// has no session.
    pub fn sync_tab(
        &self,
        username: &str,
        declared_by: &ConnectionId,
        tab: ConnectionId,
    ) -> Result<(), SessionError> {
        if let Some(owner) = self.presence.registry.owner_of(&tab) {
            if owner != username {
                return Err(SessionError::TabOwnedElsewhere { tab });
            }
        }
        if !self.presence.registry.sync_tab(username, tab, declared_by) {
            return Err(SessionError::UnknownSession(username.to_string()));
        }
        Ok(())
    }

    /// Cancel a pending eviction.
    ///
    /// Returns `true` if one was pending.
    pub fn cancel_eviction(&self, username: &str) -> bool {
        cancel_pending(self.presence.evictions.entry(username.to_string()))
    }

    /// Check if an eviction is pending for the username.
    #[must_use]
    pub fn has_pending_eviction(&self, username: &str) -> bool {
        self.presence.evictions.contains_key(username)
    }

    /// Number of pending evictions.
    #[must_use]
    pub fn pending_evictions(&self) -> usize {
        self.presence.evictions.len()
    }

    /// Send the current `user-list` to every connection.
    pub fn broadcast_user_list(&self) -> usize {
        self.presence.broadcast_user_list()
    }

    /// Schedule removal of `username` after the grace period, superseding any
    /// earlier schedule.
    fn schedule_eviction(&self, username: &str, connection: ConnectionId) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + self.grace_period;

        // The task cannot claim the entry before it is inserted: it needs the
        // same shard lock we hold here.
        match self.presence.evictions.entry(username.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get().handle.abort();
                let handle = self.spawn_eviction(username, &connection, generation, deadline);
                entry.insert(PendingEviction {
                    generation,
                    connection,
                    handle,
                });
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn_eviction(username, &connection, generation, deadline);
                entry.insert(PendingEviction {
                    generation,
                    connection,
                    handle,
                });
            }
        }

        debug!(
            username = %username,
            generation,
            grace_ms = self.grace_period.as_millis() as u64,
            "Eviction scheduled"
        );
    }

    fn spawn_eviction(
        &self,
        username: &str,
        connection: &ConnectionId,
        generation: u64,
        deadline: Instant,
    ) -> JoinHandle<()> {
        let presence = self.presence.clone();
        let username = username.to_string();
        let connection = connection.clone();

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            run_eviction(&presence, &username, &connection, generation);
        })
    }
}

/// Remove a pending eviction through its map entry and stop its timer.
fn cancel_pending(pending: Entry<'_, String, PendingEviction>) -> bool {
    match pending {
        Entry::Occupied(entry) => {
            let (username, pending) = entry.remove_entry();
            pending.handle.abort();
            debug!(
                username = %username,
                connection = %pending.connection,
                generation = pending.generation,
                "Eviction cancelled"
            );
            true
        }
        Entry::Vacant(_) => false,
    }
}

/// Body of a fired eviction timer.
///
/// Runs under the username's pending entry, so a concurrent connect either
/// completes before the deletion check or starts after the `user-left`.
fn run_eviction(presence: &Presence, username: &str, connection: &ConnectionId, generation: u64) {
    let entry = match presence.evictions.entry(username.to_string()) {
        Entry::Occupied(entry) if entry.get().generation == generation => entry,
        _ => {
            debug!(username = %username, generation, "Stale eviction ignored");
            return;
        }
    };

    if presence.registry.delete_if_empty_and_matches(username, connection) {
        info!(username = %username, "User left");
        presence
            .transport
            .broadcast(Arc::new(ServerEvent::UserLeft(username.to_string())), None);
        presence.broadcast_user_list();
    } else {
        debug!(username = %username, "Session came back before eviction");
    }
    entry.remove();
}
