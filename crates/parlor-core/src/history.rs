//! In-memory private message history.
//!
//! Threads are keyed by the unordered pair of participants, so
//! `read(a, b)` and `read(b, a)` always see the same log.

use dashmap::DashMap;
use parlor_protocol::PrivateMessage;
use std::collections::VecDeque;
use tracing::trace;

/// Default cap on messages kept per thread.
pub const DEFAULT_MAX_MESSAGES_PER_THREAD: usize = 1000;

/// Order-independent key for a two-party thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    low: String,
    high: String,
}

impl ThreadKey {
    /// Build the key for a pair of usernames, in either order.
    #[must_use]
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }
}

/// Append-only store of private threads.
///
/// Each thread keeps at most `max_per_thread` messages and drops the oldest
/// first. A cap of zero keeps everything.
#[derive(Debug)]
pub struct HistoryStore {
    threads: DashMap<ThreadKey, VecDeque<PrivateMessage>>,
    max_per_thread: usize,
}

impl HistoryStore {
    /// Create a store with the default per-thread cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_MESSAGES_PER_THREAD)
    }

    /// Create a store with a custom per-thread cap.
    #[must_use]
    pub fn with_limit(max_per_thread: usize) -> Self {
        Self {
            threads: DashMap::new(),
            max_per_thread,
        }
    }

    /// Append a message to the thread between `a` and `b`.
    ///
    /// Returns the thread length after the append.
    pub fn append(&self, a: &str, b: &str, message: PrivateMessage) -> usize {
        let key = ThreadKey::new(a, b);
        let mut thread = self.threads.entry(key).or_default();

        thread.push_back(message);
        if self.max_per_thread > 0 {
            while thread.len() > self.max_per_thread {
                thread.pop_front();
            }
        }

        trace!(a = %a, b = %b, len = thread.len(), "Appended private message");
        thread.len()
    }

    /// Copy of the thread between `a` and `b`, oldest first.
    #[must_use]
    pub fn read(&self, a: &str, b: &str) -> Vec<PrivateMessage> {
        self.threads
            .get(&ThreadKey::new(a, b))
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of messages in the thread between `a` and `b`.
    #[must_use]
    pub fn thread_len(&self, a: &str, b: &str) -> usize {
        self.threads
            .get(&ThreadKey::new(a, b))
            .map(|t| t.len())
            .unwrap_or(0)
    }

    /// Number of threads with at least one message.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}
