//! Error types for the resilient socket client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use resilient_socket::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     client.send("ping", "ping").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Construction`], [`Error::ConnectionClosed`], [`Error::StaleState`], [`Error::Transport`] |
//! | Request | [`Error::RequestTimeout`], [`Error::AttemptsExhausted`], [`Error::Rejected`] |
//! | Lifecycle | [`Error::Disposed`] |
//!
//! `Error` is [`Clone`]: a single close reason is delivered to every
//! request flushed from the queue.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::client::ConnectionState;
use crate::identifiers::RequestId;
use crate::transport::ReadyState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The transport could not be constructed.
    #[error("Transport construction failed: {message}")]
    Construction {
        /// Description of the construction failure.
        message: String,
    },

    /// The connection closed.
    ///
    /// Synthesized from every close, whether initiated locally or by
    /// the transport. Carries the originating close code.
    #[error("Connection closed (code {code}): {reason}")]
    ConnectionClosed {
        /// Close status code.
        code: u16,
        /// Close reason text.
        reason: String,
    },

    /// The transport's ready-state disagreed with the tracked state.
    #[error("Stale connection state: tracked {tracked}, transport reports {actual}")]
    StaleState {
        /// State tracked by the client.
        tracked: ConnectionState,
        /// Ready-state reported by the transport.
        actual: ReadyState,
    },

    /// Transport-level failure (send error, socket error event).
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// A single attempt exceeded its deadline.
    #[error("Request {request_id} ({description}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request that timed out.
        request_id: RequestId,
        /// Request description.
        description: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A request failed every permitted attempt.
    #[error("Request {request_id} ({description}) failed after {attempts} attempts: {last}")]
    AttemptsExhausted {
        /// The failed request.
        request_id: RequestId,
        /// Request description.
        description: String,
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        last: Box<Error>,
    },

    /// The per-request validator rejected a send result.
    #[error("Request {request_id} ({description}) rejected by validator")]
    Rejected {
        /// The rejected request.
        request_id: RequestId,
        /// Request description.
        description: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The client has been disposed.
    #[error("Client disposed")]
    Disposed,
}

// ============================================================================
// Conversions
// ============================================================================

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Self::transport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::config(format!("invalid target address: {err}"))
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a construction error.
    #[inline]
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction {
            message: message.into(),
        }
    }

    /// Creates a connection closed error.
    #[inline]
    pub fn connection_closed(code: u16, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a stale state error.
    #[inline]
    pub fn stale_state(tracked: ConnectionState, actual: ReadyState) -> Self {
        Self::StaleState { tracked, actual }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(
        request_id: RequestId,
        description: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self::RequestTimeout {
            request_id,
            description: description.into(),
            timeout_ms,
        }
    }

    /// Creates an attempts exhausted error.
    #[inline]
    pub fn attempts_exhausted(
        request_id: RequestId,
        description: impl Into<String>,
        attempts: u32,
        last: Error,
    ) -> Self {
        Self::AttemptsExhausted {
            request_id,
            description: description.into(),
            attempts,
            last: Box::new(last),
        }
    }

    /// Creates a validator rejection error.
    #[inline]
    pub fn rejected(request_id: RequestId, description: impl Into<String>) -> Self {
        Self::Rejected {
            request_id,
            description: description.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    ///
    /// An exhausted request counts when its final attempt timed out.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::RequestTimeout { .. } => true,
            Self::AttemptsExhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Construction { .. }
                | Self::ConnectionClosed { .. }
                | Self::StaleState { .. }
                | Self::Transport { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed if the request is submitted again,
    /// typically after the client reconnects.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config { .. } | Self::Disposed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection_closed(1006, "socket reset");
        assert_eq!(err.to_string(), "Connection closed (code 1006): socket reset");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing target");
        assert_eq!(err.to_string(), "Configuration error: missing target");
    }

    #[test]
    fn test_is_timeout() {
        let id = RequestId::generate();
        let timeout_err = Error::request_timeout(id, "ping", 500);
        let exhausted = Error::attempts_exhausted(id, "ping", 3, timeout_err.clone());
        let other_err = Error::transport("broken pipe");

        assert!(timeout_err.is_timeout());
        assert!(exhausted.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::construction("refused").is_connection_error());
        assert!(Error::connection_closed(1000, "bye").is_connection_error());
        assert!(
            Error::stale_state(ConnectionState::Open, ReadyState::Closed).is_connection_error()
        );
        assert!(!Error::Disposed.is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::connection_closed(1006, "").is_recoverable());
        assert!(!Error::Disposed.is_recoverable());
        assert!(!Error::config("bad").is_recoverable());
    }

    #[test]
    fn test_exhausted_exposes_source() {
        use std::error::Error as _;

        let id = RequestId::generate();
        let err = Error::attempts_exhausted(id, "ping", 2, Error::transport("reset"));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Transport error: reset");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_from_url_error() {
        let parse_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = parse_err.into();
        assert!(err.to_string().contains("invalid target address"));
    }
}
