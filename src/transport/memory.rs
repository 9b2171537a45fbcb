//! Scripted in-process transport.
//!
//! [`MemoryConnector`] hands out transports whose lifecycle is driven by
//! the test through [`MemoryLink`] handles: open them, deliver messages,
//! close them with any code, make sends succeed, fail or hang, and fake
//! buffered bytes or a drifting ready-state.
//!
//! # Example
//!
//! ```ignore
//! let connector = MemoryConnector::auto_open();
//! let client = Client::new(options, connector.clone(), NoopHooks)?;
//! client.wait_for_state(ConnectionState::Open).await?;
//!
//! client.send("hello", "hi").await?;
//! assert_eq!(connector.latest().unwrap().sent(), vec![Payload::from("hi")]);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::Epoch;

use super::{
    CloseFrame, Connector, EventSink, Payload, ReadyState, SendCallback, Transport,
    TransportEvent, TransportOptions,
};

// ============================================================================
// SendMode
// ============================================================================

/// How a memory transport completes sends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Complete successfully.
    #[default]
    Ack,
    /// Complete with a transport error carrying this message.
    Fail(String),
    /// Never complete (until [`MemoryLink::release_hung`]).
    Hang,
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// Connector settings and produced links.
#[derive(Default)]
struct ConnectorState {
    /// Emit `Open` as soon as a link is constructed.
    auto_open: bool,
    /// Send mode for new links.
    send_mode: SendMode,
    /// Remaining constructions to fail.
    fail_next: u32,
    /// Fail every construction.
    fail_all: bool,
    /// Number of `connect` calls, failed ones included.
    attempts: usize,
    /// Links constructed so far.
    links: Vec<MemoryLink>,
}

/// Connector producing scripted in-process transports.
///
/// Cloning shares the underlying state, so a test can keep one clone
/// while the client owns another.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Mutex<ConnectorState>>,
}

impl fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MemoryConnector")
            .field("attempts", &state.attempts)
            .field("links", &state.links.len())
            .finish_non_exhaustive()
    }
}

impl MemoryConnector {
    /// Creates a connector whose links wait for [`MemoryLink::open`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose links open immediately.
    #[must_use]
    pub fn auto_open() -> Self {
        let connector = Self::new();
        connector.inner.lock().auto_open = true;
        connector
    }

    /// Sets the send mode given to new links.
    #[must_use]
    pub fn with_send_mode(self, mode: SendMode) -> Self {
        self.inner.lock().send_mode = mode;
        self
    }

    /// Fails the next `count` constructions.
    pub fn fail_next(&self, count: u32) {
        self.inner.lock().fail_next = count;
    }

    /// Fails every construction while set.
    pub fn set_fail_all(&self, fail: bool) {
        self.inner.lock().fail_all = fail;
    }

    /// Number of construction attempts, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.inner.lock().attempts
    }

    /// Links constructed so far, oldest first.
    #[must_use]
    pub fn links(&self) -> Vec<MemoryLink> {
        self.inner.lock().links.clone()
    }

    /// Most recently constructed link.
    #[must_use]
    pub fn latest(&self) -> Option<MemoryLink> {
        self.inner.lock().links.last().cloned()
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        target: &Url,
        _options: &TransportOptions,
        events: EventSink,
    ) -> Result<Box<dyn Transport>> {
        let (link, auto_open) = {
            let mut state = self.inner.lock();
            state.attempts += 1;

            if state.fail_all {
                return Err(Error::construction(format!("refused: {target}")));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(Error::construction(format!("refused: {target}")));
            }

            let link = MemoryLink::new(events, state.send_mode.clone());
            state.links.push(link.clone());
            (link, state.auto_open)
        };

        trace!(epoch = %link.epoch(), "Memory link constructed");

        if auto_open {
            link.open();
        }

        Ok(Box::new(MemoryTransport { link }))
    }
}

// ============================================================================
// MemoryLink
// ============================================================================

/// Mutable link state.
struct LinkState {
    ready_state: ReadyState,
    buffered: usize,
    send_mode: SendMode,
    sent: Vec<Payload>,
    hung: Vec<SendCallback>,
    terminated: bool,
}

/// Shared link internals.
struct LinkInner {
    sink: EventSink,
    state: Mutex<LinkState>,
}

/// Test-side handle to one memory transport.
#[derive(Clone)]
pub struct MemoryLink {
    inner: Arc<LinkInner>,
}

impl fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryLink")
            .field("epoch", &self.inner.sink.epoch())
            .field("ready_state", &state.ready_state)
            .field("sent", &state.sent.len())
            .finish_non_exhaustive()
    }
}

impl MemoryLink {
    fn new(sink: EventSink, send_mode: SendMode) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                sink,
                state: Mutex::new(LinkState {
                    ready_state: ReadyState::Connecting,
                    buffered: 0,
                    send_mode,
                    sent: Vec::new(),
                    hung: Vec::new(),
                    terminated: false,
                }),
            }),
        }
    }

    /// Connection attempt this link belongs to.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.inner.sink.epoch()
    }

    /// Completes the handshake.
    pub fn open(&self) {
        self.inner.state.lock().ready_state = ReadyState::Open;
        self.inner.sink.emit(TransportEvent::Open);
    }

    /// Closes from the transport side.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.inner.state.lock().ready_state = ReadyState::Closed;
        self.inner
            .sink
            .emit(TransportEvent::Close(CloseFrame::new(code, reason)));
    }

    /// Emits an error event without closing.
    pub fn error(&self, message: impl Into<String>) {
        self.inner.sink.emit(TransportEvent::Error(message.into()));
    }

    /// Delivers an inbound message.
    pub fn deliver(&self, payload: impl Into<Payload>) {
        self.inner
            .sink
            .emit(TransportEvent::Message(payload.into()));
    }

    /// Payloads passed to `send`, one entry per attempt.
    #[must_use]
    pub fn sent(&self) -> Vec<Payload> {
        self.inner.state.lock().sent.clone()
    }

    /// Drains the recorded payloads.
    pub fn take_sent(&self) -> Vec<Payload> {
        std::mem::take(&mut self.inner.state.lock().sent)
    }

    /// Overrides the reported buffered bytes.
    pub fn set_buffered(&self, bytes: usize) {
        self.inner.state.lock().buffered = bytes;
    }

    /// Changes how subsequent sends complete.
    pub fn set_send_mode(&self, mode: SendMode) {
        self.inner.state.lock().send_mode = mode;
    }

    /// Overrides the reported ready-state without emitting events.
    pub fn set_ready_state(&self, state: ReadyState) {
        self.inner.state.lock().ready_state = state;
    }

    /// Current ready-state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().ready_state
    }

    /// Returns `true` once the client terminated this link.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    /// Returns `true` while the client still listens to this link.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.sink.is_attached()
    }

    /// Completes every hung send with `error`.
    pub fn release_hung(&self, error: Option<Error>) {
        let hung = std::mem::take(&mut self.inner.state.lock().hung);
        for on_complete in hung {
            on_complete(error.clone());
        }
    }
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// Transport side of a [`MemoryLink`].
struct MemoryTransport {
    link: MemoryLink,
}

impl Transport for MemoryTransport {
    fn send(&self, payload: Payload, on_complete: SendCallback) {
        let mode = {
            let mut state = self.link.inner.state.lock();
            state.sent.push(payload);
            state.send_mode.clone()
        };

        match mode {
            SendMode::Ack => on_complete(None),
            SendMode::Fail(message) => on_complete(Some(Error::transport(message))),
            SendMode::Hang => self.link.inner.state.lock().hung.push(on_complete),
        }
    }

    fn buffered_amount(&self) -> usize {
        self.link.inner.state.lock().buffered
    }

    fn ready_state(&self) -> ReadyState {
        self.link.ready_state()
    }

    fn terminate(&self) {
        let was_open = {
            let mut state = self.link.inner.state.lock();
            state.terminated = true;
            let was_open = !state.ready_state.is_closing_or_closed();
            state.ready_state = ReadyState::Closed;
            was_open
        };

        if was_open {
            self.link
                .inner
                .sink
                .emit(TransportEvent::Close(CloseFrame::normal("terminated")));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    fn target() -> Url {
        Url::parse("memory://test").expect("url")
    }

    #[test]
    fn test_auto_open_emits_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::auto_open();

        let transport = connector
            .connect(&target(), &TransportOptions::default(), EventSink::new(Epoch::default(), tx))
            .expect("construct");

        assert_eq!(transport.ready_state(), ReadyState::Open);
        assert_eq!(rx.try_recv().expect("event").1, TransportEvent::Open);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.links().len(), 1);
    }

    #[test]
    fn test_fail_next_counts_attempts() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::new();
        connector.fail_next(1);

        let sink = EventSink::new(Epoch::default(), tx);
        let first = connector.connect(&target(), &TransportOptions::default(), sink.clone());
        let second = connector.connect(&target(), &TransportOptions::default(), sink);

        assert!(matches!(first, Err(Error::Construction { .. })));
        assert!(second.is_ok());
        assert_eq!(connector.attempts(), 2);
        assert_eq!(connector.links().len(), 1);
    }

    #[test]
    fn test_send_modes() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::auto_open().with_send_mode(SendMode::Hang);
        let transport = connector
            .connect(&target(), &TransportOptions::default(), EventSink::new(Epoch::default(), tx))
            .expect("construct");
        let link = connector.latest().expect("link");

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let callback = |tx: mpsc::UnboundedSender<Option<Error>>| -> SendCallback {
            Box::new(move |error| {
                let _ = tx.send(error);
            })
        };

        transport.send(Payload::from("a"), callback(done_tx.clone()));
        assert!(done_rx.try_recv().is_err());
        link.release_hung(None);
        assert_eq!(done_rx.try_recv().expect("released"), None);

        link.set_send_mode(SendMode::Fail("nope".into()));
        transport.send(Payload::from("b"), callback(done_tx));
        assert_eq!(
            done_rx.try_recv().expect("failed"),
            Some(Error::transport("nope"))
        );

        assert_eq!(link.sent(), vec![Payload::from("a"), Payload::from("b")]);
        assert_eq!(link.take_sent().len(), 2);
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_terminate_closes_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::auto_open();
        let transport = connector
            .connect(&target(), &TransportOptions::default(), EventSink::new(Epoch::default(), tx))
            .expect("construct");
        let _ = rx.try_recv();

        transport.terminate();
        transport.terminate();

        assert!(matches!(rx.try_recv().expect("close").1, TransportEvent::Close(_)));
        assert!(rx.try_recv().is_err());
        assert!(connector.latest().expect("link").is_terminated());
    }
}
