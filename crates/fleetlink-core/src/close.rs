//! Policy close codes for device and observer sockets.

use std::fmt;

/// Why the relay is closing a socket.
///
/// Each reason maps to a fixed WebSocket close code so peers can tell a
/// takeover apart from an eviction or a process shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection for the same device ID took over.
    Superseded,
    /// The record went stale and was removed.
    Evicted,
    /// An operator requested a hard reset.
    AdminReset,
    /// The process is shutting down.
    ShuttingDown,
}

impl CloseReason {
    /// WebSocket close code sent with the close frame.
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Superseded | CloseReason::Evicted => 1011,
            CloseReason::AdminReset => 1012,
            CloseReason::ShuttingDown => 1001,
        }
    }

    /// Short label carried as the close frame reason text.
    pub fn label(self) -> &'static str {
        match self {
            CloseReason::Superseded => "superseded",
            CloseReason::Evicted => "evicted",
            CloseReason::AdminReset => "reset",
            CloseReason::ShuttingDown => "shutting down",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_policy() {
        assert_eq!(CloseReason::Superseded.code(), 1011);
        assert_eq!(CloseReason::Evicted.code(), 1011);
        assert_eq!(CloseReason::AdminReset.code(), 1012);
        assert_eq!(CloseReason::ShuttingDown.code(), 1001);
    }

    #[test]
    fn display_uses_label() {
        assert_eq!(CloseReason::Superseded.to_string(), "superseded");
    }
}
