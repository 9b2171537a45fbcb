//! Connection lifecycle state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a client.
///
/// ```text
/// Idle ──connect──► Connecting ──open──► Open
///                      │                   │
///                      └──close──► Closed ◄┘ (close / disconnect / dispose)
///                                    │  ▲
///                      backoff fires │  │ close
///                                    ▼  │
///                               Reconnecting ──► Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// Transport constructed, waiting for open.
    Connecting,
    /// Ready to send.
    Open,
    /// Closed; terminal once disposed.
    Closed,
    /// Waiting for the backoff timer.
    Reconnecting,
}

impl ConnectionState {
    /// Returns `true` while a connection exists or is being established.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ClientStatus
// ============================================================================

/// Snapshot published by the client after every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientStatus {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Requests waiting in (or at the head of) the outbound queue.
    pub queued: usize,
    /// Attempts made for the head request.
    pub head_attempts: u32,
    /// Set once the client is disposed.
    pub disposed: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert_eq!(ClientStatus::default().state, ConnectionState::Idle);
    }

    #[test]
    fn test_is_active() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Open.is_active());
        assert!(!ConnectionState::Reconnecting.is_active());
        assert!(!ConnectionState::Closed.is_active());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
