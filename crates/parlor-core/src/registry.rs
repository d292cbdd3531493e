//! Presence registry for Parlor.
//!
//! The registry is the single source of truth for who is online and which
//! connections belong to them. Each username maps to one [`Session`]; every
//! mutation of a session happens under that key's map lock, so readers never
//! see a half-applied update.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parlor_protocol::SessionSummary;
use parlor_transport::ConnectionId;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Presence record for one identity.
#[derive(Debug, Clone)]
pub struct Session {
    /// The identity key.
    pub username: String,
    /// Connection currently treated as canonical. Once every tab is gone this
    /// holds the last connection that left.
    pub primary_connection_id: ConnectionId,
    /// Every connection or declared tab attributed to this identity.
    pub tabs: BTreeSet<ConnectionId>,
    /// When the session was created.
    pub connected_at: DateTime<Utc>,
    /// Tabs declared through tab-sync, mapped to the connection that declared them.
    synced: HashMap<ConnectionId, ConnectionId>,
    join_seq: u64,
}

impl Session {
    fn new(username: &str, connection: ConnectionId, join_seq: u64) -> Self {
        Self {
            username: username.to_string(),
            primary_connection_id: connection.clone(),
            tabs: BTreeSet::from([connection]),
            connected_at: Utc::now(),
            synced: HashMap::new(),
            join_seq,
        }
    }

    /// Check if no tab is left (the session is in its grace period).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Check if a connection or tab belongs to this session.
    #[must_use]
    pub fn has_tab(&self, connection: &ConnectionId) -> bool {
        self.tabs.contains(connection)
    }

    /// Wire representation for `user-list`.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            username: self.username.clone(),
            primary_connection_id: self.primary_connection_id.to_string(),
            tabs: self.tabs.iter().map(ToString::to_string).collect(),
            connected_at: self.connected_at,
        }
    }
}

/// Result of [`ConnectionRegistry::claim_primary`].
#[derive(Debug, Clone)]
pub struct Registration {
    /// The session after the claim.
    pub session: Session,
    /// Whether the session did not exist before.
    pub created: bool,
    /// The previous canonical connection, if it differs from the claimant.
    pub displaced: Option<ConnectionId>,
}

/// Maps usernames to live sessions.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<String, Session>,
    next_seq: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a tab to a session, creating the session if needed.
    pub fn upsert_tab(&self, username: &str, connection: ConnectionId) -> Session {
        match self.sessions.entry(username.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().tabs.insert(connection);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                debug!(username = %username, connection = %connection, "Session created");
                let session = Session::new(username, connection, self.next_seq());
                entry.insert(session).value().clone()
            }
        }
    }

    /// Add a tab and make it the canonical connection in one step.
    pub fn claim_primary(&self, username: &str, connection: ConnectionId) -> Registration {
        match self.sessions.entry(username.to_string()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                let displaced = (session.primary_connection_id != connection)
                    .then(|| session.primary_connection_id.clone());
                session.tabs.insert(connection.clone());
                session.primary_connection_id = connection;
                Registration {
                    session: session.clone(),
                    created: false,
                    displaced,
                }
            }
            Entry::Vacant(entry) => {
                debug!(username = %username, connection = %connection, "Session created");
                let session = Session::new(username, connection, self.next_seq());
                Registration {
                    session: entry.insert(session).value().clone(),
                    created: true,
                    displaced: None,
                }
            }
        }
    }

    /// Remove a connection, along with any tabs it declared.
    ///
    /// Returns `true` if the session has no tabs left. Unknown usernames are
    /// a no-op and return `false`.
    pub fn remove_tab(&self, username: &str, connection: &ConnectionId) -> bool {
        let Some(mut session) = self.sessions.get_mut(username) else {
            return false;
        };

        session.tabs.remove(connection);
        let declared: Vec<ConnectionId> = session
            .synced
            .iter()
            .filter(|(_, by)| *by == connection)
            .map(|(tab, _)| tab.clone())
            .collect();
        for tab in declared {
            session.synced.remove(&tab);
            session.tabs.remove(&tab);
        }

        let now_empty = session.tabs.is_empty();
        if now_empty {
            session.primary_connection_id = connection.clone();
            debug!(username = %username, connection = %connection, "Session emptied");
        } else if session.primary_connection_id == *connection {
            // Prefer a real connection over a declared tab.
            let successor = session
                .tabs
                .iter()
                .find(|tab| !session.synced.contains_key(*tab))
                .or_else(|| session.tabs.iter().next())
                .cloned();
            if let Some(successor) = successor {
                debug!(username = %username, primary = %successor, "Primary handed over");
                session.primary_connection_id = successor;
            }
        }
        now_empty
    }

    /// Make `connection` canonical again unless another connection that
    /// `is_live` still holds that role.
    ///
    /// Creates the session if it is gone. Returns `true` if `connection` is
    /// the canonical connection afterwards.
    pub fn reassert_primary(
        &self,
        username: &str,
        connection: ConnectionId,
        is_live: impl Fn(&ConnectionId) -> bool,
    ) -> bool {
        match self.sessions.entry(username.to_string()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                let current = &session.primary_connection_id;
                if *current != connection && session.tabs.contains(current) && is_live(current) {
                    return false;
                }
                session.tabs.insert(connection.clone());
                session.primary_connection_id = connection;
                true
            }
            Entry::Vacant(entry) => {
                debug!(username = %username, connection = %connection, "Session created");
                entry.insert(Session::new(username, connection, self.next_seq()));
                true
            }
        }
    }

    /// Attribute an extra tab to an existing session without touching the
    /// canonical connection.
    ///
    /// Returns `false` if the username has no session.
    pub fn sync_tab(&self, username: &str, tab: ConnectionId, declared_by: &ConnectionId) -> bool {
        let Some(mut session) = self.sessions.get_mut(username) else {
            return false;
        };
        if session.tabs.insert(tab.clone()) {
            session.synced.insert(tab, declared_by.clone());
        }
        true
    }

    /// Get a copy of a session.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<Session> {
        self.sessions.get(username).map(|s| s.value().clone())
    }

    /// Check if the username has a session with at least one tab.
    #[must_use]
    pub fn is_online(&self, username: &str) -> bool {
        self.sessions
            .get(username)
            .is_some_and(|s| !s.tabs.is_empty())
    }

    /// Snapshot of a session's tabs, empty if absent.
    #[must_use]
    pub fn tabs_of(&self, username: &str) -> Vec<ConnectionId> {
        self.sessions
            .get(username)
            .map(|s| s.tabs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Find which identity a connection or tab is attributed to.
    #[must_use]
    pub fn owner_of(&self, connection: &ConnectionId) -> Option<String> {
        self.sessions
            .iter()
            .find(|s| s.tabs.contains(connection))
            .map(|s| s.key().clone())
    }

    /// All sessions in the order they were created.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.iter().map(|s| s.value().clone()).collect();
        sessions.sort_by_key(|s| s.join_seq);
        sessions
    }

    /// Presence snapshot in wire form.
    #[must_use]
    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.snapshot().iter().map(Session::summary).collect()
    }

    /// Remove a session only if it is still empty and `expected` is still
    /// the connection it last saw.
    ///
    /// Returns `true` if the session was deleted.
    pub fn delete_if_empty_and_matches(&self, username: &str, expected: &ConnectionId) -> bool {
        let removed = self
            .sessions
            .remove_if(username, |_, s| {
                s.tabs.is_empty() && s.primary_connection_id == *expected
            })
            .is_some();
        if removed {
            debug!(username = %username, "Session deleted");
        }
        removed
    }

    /// Number of sessions, including those in their grace period.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
