//! WebSocket client transport.
//!
//! [`WsConnector`] builds a [`WsTransport`] per connection attempt. The
//! transport spawns a tokio task that performs the handshake and then runs
//! the event loop.
//!
//! # Event Loop
//!
//! The spawned task handles:
//!
//! - Handshake with a deadline (`connect_timeout`)
//! - Incoming frames, forwarded as [`TransportEvent::Message`]
//! - Outgoing sends, completed through their callbacks
//! - Termination requests from the client
//!
//! Exactly one [`TransportEvent::Close`] is emitted when the loop ends.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{
    CLOSE_NO_STATUS, CLOSE_NORMAL, CloseFrame, Connector, EventSink, Payload,
    ReadyState, SendCallback, Transport, TransportEvent, TransportOptions,
};

// ============================================================================
// Types
// ============================================================================

/// Write half of the WebSocket stream.
type WsWriter =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// ============================================================================
// WsCommand
// ============================================================================

/// Internal commands for the event loop.
enum WsCommand {
    /// Write a payload and report completion.
    Send {
        payload: Payload,
        on_complete: SendCallback,
    },
    /// Close the connection.
    Terminate,
}

// ============================================================================
// Shared
// ============================================================================

/// State shared between the transport handle and its event loop.
#[derive(Debug)]
struct Shared {
    /// Current ready-state.
    ready_state: Mutex<ReadyState>,
    /// Bytes queued for writing.
    buffered: AtomicUsize,
}

impl Shared {
    fn set_ready_state(&self, state: ReadyState) {
        *self.ready_state.lock() = state;
    }
}

// ============================================================================
// WsConnector
// ============================================================================

/// Connector producing [`WsTransport`]s via tokio-tungstenite.
///
/// Plain `ws://` only; TLS is the concern of a connector built with the
/// appropriate tokio-tungstenite feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        target: &Url,
        options: &TransportOptions,
        events: EventSink,
    ) -> Result<Box<dyn Transport>> {
        let request = build_request(target, options)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            ready_state: Mutex::new(ReadyState::Connecting),
            buffered: AtomicUsize::new(0),
        });

        tokio::spawn(WsTransport::run_event_loop(
            request,
            options.clone(),
            command_rx,
            Arc::clone(&shared),
            events,
        ));

        Ok(Box::new(WsTransport { command_tx, shared }))
    }
}

/// Builds the handshake request, applying extra headers.
fn build_request(target: &Url, options: &TransportOptions) -> Result<Request> {
    match target.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::construction(format!(
                "unsupported scheme '{other}' (expected ws or wss)"
            )));
        }
    }

    let mut request = target
        .as_str()
        .into_client_request()
        .map_err(|e| Error::construction(e.to_string()))?;

    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::construction(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::construction(format!("invalid header value: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}

// ============================================================================
// WsTransport
// ============================================================================

/// A WebSocket connection driven by a background task.
///
/// All methods are non-blocking; sends are queued to the event loop.
pub struct WsTransport {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<WsCommand>,
    /// Ready-state and buffer accounting (shared with event loop).
    shared: Arc<Shared>,
}

impl Transport for WsTransport {
    fn send(&self, payload: Payload, on_complete: SendCallback) {
        let len = payload.len();
        self.shared.buffered.fetch_add(len, Ordering::AcqRel);

        if let Err(mpsc::error::SendError(command)) =
            self.command_tx.send(WsCommand::Send { payload, on_complete })
        {
            self.shared.buffered.fetch_sub(len, Ordering::AcqRel);
            if let WsCommand::Send { on_complete, .. } = command {
                on_complete(Some(Error::transport("connection closed")));
            }
        }
    }

    fn buffered_amount(&self) -> usize {
        self.shared.buffered.load(Ordering::Acquire)
    }

    fn ready_state(&self) -> ReadyState {
        *self.shared.ready_state.lock()
    }

    fn terminate(&self) {
        let _ = self.command_tx.send(WsCommand::Terminate);
    }
}

impl WsTransport {
    /// Event loop that handles the handshake and WebSocket I/O.
    async fn run_event_loop(
        request: Request,
        options: TransportOptions,
        mut command_rx: mpsc::UnboundedReceiver<WsCommand>,
        shared: Arc<Shared>,
        events: EventSink,
    ) {
        let stream = tokio::select! {
            result = timeout(options.connect_timeout, connect_async(request)) => {
                match result {
                    Ok(Ok((stream, _response))) => Some(stream),
                    Ok(Err(e)) => {
                        debug!(error = %e, "WebSocket handshake failed");
                        events.emit(TransportEvent::Error(e.to_string()));
                        None
                    }
                    Err(_) => {
                        let timeout_ms =
                            u64::try_from(options.connect_timeout.as_millis()).unwrap_or(u64::MAX);
                        debug!(timeout_ms, "WebSocket handshake timed out");
                        events.emit(TransportEvent::Error(format!(
                            "handshake timed out after {timeout_ms}ms"
                        )));
                        None
                    }
                }
            }

            // Terminated (or dropped) before the handshake finished
            _ = Self::wait_terminate(&mut command_rx, &shared) => None,
        };

        let Some(stream) = stream else {
            shared.set_ready_state(ReadyState::Closed);
            Self::fail_pending_sends(&mut command_rx, &shared);
            events.emit(TransportEvent::Close(CloseFrame::abnormal("connection failed")));
            return;
        };

        shared.set_ready_state(ReadyState::Open);
        events.emit(TransportEvent::Open);
        debug!("WebSocket connection established");

        let (mut ws_write, mut ws_read) = stream.split();

        let close = loop {
            tokio::select! {
                // Incoming frames from the peer
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            events.emit(TransportEvent::Message(Payload::Text(text.as_str().to_owned())));
                        }

                        Some(Ok(Message::Binary(bytes))) => {
                            events.emit(TransportEvent::Message(Payload::Binary(bytes.to_vec())));
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!("WebSocket closed by remote");
                            break frame.map_or_else(
                                || CloseFrame::new(CLOSE_NO_STATUS, ""),
                                |f| CloseFrame::new(u16::from(f.code), f.reason.as_str().to_owned()),
                            );
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            events.emit(TransportEvent::Error(e.to_string()));
                            break CloseFrame::abnormal(e.to_string());
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break CloseFrame::abnormal("stream ended");
                        }

                        // Ping/Pong are answered by tungstenite
                        _ => {}
                    }
                }

                // Commands from the client
                command = command_rx.recv() => {
                    match command {
                        Some(WsCommand::Send { payload, on_complete }) => {
                            Self::handle_send(payload, on_complete, &mut ws_write, &shared).await;
                        }

                        Some(WsCommand::Terminate) | None => {
                            debug!("Terminate requested");
                            shared.set_ready_state(ReadyState::Closing);
                            let _ = ws_write.close().await;
                            break CloseFrame::new(CLOSE_NORMAL, "terminated");
                        }
                    }
                }
            }
        };

        shared.set_ready_state(ReadyState::Closed);
        Self::fail_pending_sends(&mut command_rx, &shared);
        events.emit(TransportEvent::Close(close));

        debug!("Event loop terminated");
    }

    /// Resolves once a terminate command arrives or the handle is dropped.
    ///
    /// Sends queued during the handshake are failed immediately.
    async fn wait_terminate(command_rx: &mut mpsc::UnboundedReceiver<WsCommand>, shared: &Shared) {
        loop {
            match command_rx.recv().await {
                Some(WsCommand::Send { payload, on_complete }) => {
                    shared.buffered.fetch_sub(payload.len(), Ordering::AcqRel);
                    on_complete(Some(Error::transport("connection not open")));
                }
                Some(WsCommand::Terminate) | None => return,
            }
        }
    }

    /// Writes one payload and reports the outcome.
    async fn handle_send(
        payload: Payload,
        on_complete: SendCallback,
        ws_write: &mut WsWriter,
        shared: &Shared,
    ) {
        let len = payload.len();
        let message = match payload {
            Payload::Text(text) => Message::Text(text.into()),
            Payload::Binary(bytes) => Message::Binary(bytes.into()),
        };

        let result = ws_write.send(message).await;
        shared.buffered.fetch_sub(len, Ordering::AcqRel);

        match result {
            Ok(()) => {
                trace!(len, "Payload sent");
                on_complete(None);
            }
            Err(e) => on_complete(Some(Error::from(e))),
        }
    }

    /// Fails sends still queued when the loop stops.
    fn fail_pending_sends(command_rx: &mut mpsc::UnboundedReceiver<WsCommand>, shared: &Shared) {
        command_rx.close();

        let mut count = 0usize;
        while let Ok(command) = command_rx.try_recv() {
            if let WsCommand::Send { payload, on_complete } = command {
                shared.buffered.fetch_sub(payload.len(), Ordering::AcqRel);
                on_complete(Some(Error::transport("connection closed")));
                count += 1;
            }
        }

        if count > 0 {
            debug!(count, "Failed pending sends on shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
