//! Transport layer.
//!
//! The client never talks to a socket directly. It asks a [`Connector`]
//! to construct a [`Transport`] for each connection attempt and receives
//! that transport's lifecycle through an [`EventSink`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   connect(url, opts, sink)   ┌─────────────────┐
//! │  Client actor   │─────────────────────────────►│   Connector     │
//! │                 │                              └────────┬────────┘
//! │                 │   send / buffered / state             │ builds
//! │                 │─────────────────────────────►┌────────▼────────┐
//! │                 │                              │   Transport     │
//! │                 │◄─────────────────────────────│                 │
//! └─────────────────┘   EventSink: open/message/   └─────────────────┘
//!                        error/close
//! ```
//!
//! # Event Contract
//!
//! Per connection attempt a transport emits `Open` at most once, `Close`
//! exactly once, and any number of `Error` and `Message` events.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | tokio-tungstenite client transport |
//! | `memory` | Scripted in-process transport for tests |

// ============================================================================
// Submodules
// ============================================================================

/// Scripted in-process transport.
pub mod memory;

/// WebSocket client transport.
pub mod websocket;

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::client::options::duration_ms;
use crate::error::{Error, Result};
use crate::identifiers::Epoch;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{MemoryConnector, MemoryLink, SendMode};
pub use websocket::{WsConnector, WsTransport};

// ============================================================================
// Constants
// ============================================================================

/// Close code for an intentional shutdown. Suppresses reconnection.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for an abnormal closure.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code used when the peer sent a close frame without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Default handshake timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Payload
// ============================================================================

/// Opaque message body.
///
/// Mirrors WebSocket frame kinds; the client never inspects the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the text content, if this is a text payload.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

// ============================================================================
// ReadyState
// ============================================================================

/// Transport-reported connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting,
    /// Ready to send.
    Open,
    /// Close in progress.
    Closing,
    /// Closed or never opened.
    Closed,
}

impl ReadyState {
    /// Returns `true` if the transport is closing or closed.
    #[inline]
    #[must_use]
    pub const fn is_closing_or_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// CloseFrame
// ============================================================================

/// Close notification: status code plus reason text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close status code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
}

impl CloseFrame {
    /// Creates a close frame.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Intentional shutdown.
    #[inline]
    #[must_use]
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_NORMAL, reason)
    }

    /// Abnormal closure.
    #[inline]
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }

    /// Returns `true` if the code marks an intentional shutdown.
    #[inline]
    #[must_use]
    pub fn is_intentional(&self) -> bool {
        self.code == CLOSE_NORMAL
    }

    /// Converts to the close-reason error handed to requests and hooks.
    #[inline]
    #[must_use]
    pub fn to_error(&self) -> Error {
        Error::connection_closed(self.code, self.reason.clone())
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Lifecycle event emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Open,
    /// Inbound message.
    Message(Payload),
    /// Error observed; does not imply a close.
    Error(String),
    /// Connection closed.
    Close(CloseFrame),
}

// ============================================================================
// EventSink
// ============================================================================

/// Channel a transport reports its events through.
///
/// Each sink is bound to one connection attempt. Once the client detaches
/// it (on close), further emits are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    /// Connection attempt this sink belongs to.
    epoch: Epoch,
    /// Client actor inbox.
    tx: UnboundedSender<(Epoch, TransportEvent)>,
    /// Cleared when the client stops listening.
    attached: Arc<AtomicBool>,
}

impl EventSink {
    /// Creates an attached sink.
    pub(crate) fn new(epoch: Epoch, tx: UnboundedSender<(Epoch, TransportEvent)>) -> Self {
        Self {
            epoch,
            tx,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Emits an event.
    ///
    /// Returns `false` if nobody is listening anymore.
    pub fn emit(&self, event: TransportEvent) -> bool {
        if !self.is_attached() {
            return false;
        }
        self.tx.send((self.epoch, event)).is_ok()
    }

    /// Returns `true` while the client is listening.
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Returns the connection attempt this sink belongs to.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Stops delivery of further events.
    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Completion callback for [`Transport::send`].
///
/// Receives `None` on success or the send error.
pub type SendCallback = Box<dyn FnOnce(Option<Error>) + Send + 'static>;

/// A duplex connection constructed by a [`Connector`].
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload; `on_complete` runs exactly once when the write
    /// finishes or fails.
    fn send(&self, payload: Payload, on_complete: SendCallback);

    /// Bytes accepted by `send` but not yet written.
    fn buffered_amount(&self) -> usize;

    /// Current ready-state.
    fn ready_state(&self) -> ReadyState;

    /// Forcibly tears the connection down.
    fn terminate(&self);
}

/// Factory for [`Transport`] instances.
pub trait Connector: Send + Sync + 'static {
    /// Starts a connection attempt.
    ///
    /// Must not block: the handshake outcome is reported through `events`.
    ///
    /// # Errors
    ///
    /// Any error is treated as a construction failure.
    fn connect(
        &self,
        target: &Url,
        options: &TransportOptions,
        events: EventSink,
    ) -> Result<Box<dyn Transport>>;
}

// ============================================================================
// TransportOptions
// ============================================================================

/// Transport-specific options, passed through to the [`Connector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Handshake deadline.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Extra handshake request headers.
    pub headers: BTreeMap<String, String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            headers: BTreeMap::new(),
        }
    }
}

impl TransportOptions {
    /// Sets the handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Adds a handshake request header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    #[test]
    fn test_payload_conversions() {
        assert_eq!(Payload::from("hi"), Payload::Text("hi".to_string()));
        assert_eq!(Payload::from(vec![1u8, 2]), Payload::Binary(vec![1, 2]));
        assert_eq!(Payload::from("héllo").len(), 6);
        assert!(Payload::from(Vec::new()).is_empty());
        assert_eq!(Payload::from("x").as_text(), Some("x"));
        assert_eq!(Payload::from(&[0u8][..]).as_text(), None);
    }

    #[test]
    fn test_close_frame_intent() {
        assert!(CloseFrame::normal("bye").is_intentional());
        assert!(!CloseFrame::abnormal("reset").is_intentional());
        assert_eq!(
            CloseFrame::abnormal("reset").to_error(),
            Error::connection_closed(CLOSE_ABNORMAL, "reset")
        );
    }

    #[test]
    fn test_ready_state_closing() {
        assert!(ReadyState::Closing.is_closing_or_closed());
        assert!(ReadyState::Closed.is_closing_or_closed());
        assert!(!ReadyState::Open.is_closing_or_closed());
        assert_eq!(ReadyState::Open.to_string(), "open");
    }

    #[test]
    fn test_sink_drops_after_detach() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Epoch::default().next(), tx);

        assert!(sink.emit(TransportEvent::Open));
        sink.detach();
        assert!(!sink.emit(TransportEvent::Error("late".into())));

        let (epoch, event) = rx.try_recv().expect("first event");
        assert_eq!(epoch, sink.epoch());
        assert_eq!(event, TransportEvent::Open);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_transport_options_json_defaults() {
        let options: TransportOptions =
            serde_json::from_str(r#"{"headers":{"Authorization":"Bearer x"}}"#).expect("parse");
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(options.headers.get("Authorization").map(String::as_str), Some("Bearer x"));
    }
}
