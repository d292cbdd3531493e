//! WebSocket close codes used by the server.

/// Application close codes (4000-4999 range).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// A newer connection for the same identity took over.
    SessionReplaced = 4001,
    /// No traffic within the heartbeat timeout.
    HeartbeatTimeout = 4002,
    /// Inbound frame exceeded the configured maximum size.
    MessageTooLarge = 4003,
}

impl CloseCode {
    /// Get the raw u16 value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Short reason sent in the close frame.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::SessionReplaced => "session replaced",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::MessageTooLarge => "message too large",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason(), self.as_u16())
    }
}
