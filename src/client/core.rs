//! Client handle and public API.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use resilient_socket::{Client, ClientOptions, ConnectionState, Error, NoopHooks, Result};
//!
//! # async fn example() -> Result<()> {
//! let options = ClientOptions::new("ws://127.0.0.1:9000")
//!     .with_request_timeout(Duration::from_secs(2));
//! let client = Client::websocket(options, NoopHooks)?;
//!
//! client.wait_for_state(ConnectionState::Open).await?;
//! let accept_clean = |err: Option<&Error>| err.is_none();
//! client
//!     .send_request("order", r#"{"side":"buy"}"#, Some(Box::new(accept_clean)))
//!     .await?;
//!
//! client.disconnect(true).await;
//! client.dispose().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, debug, info_span};

use crate::error::{Error, Result};
use crate::hooks::ConnectionHooks;
use crate::transport::{Connector, Payload, WsConnector};

use super::actor::Actor;
use super::options::ClientOptions;
use super::queue::{PendingRequest, SendValidator};
use super::state::{ClientStatus, ConnectionState};

// ============================================================================
// Types
// ============================================================================

/// Commands from client handles to the actor.
pub(crate) enum ClientCommand {
    /// Start connecting.
    Connect { ack: oneshot::Sender<()> },
    /// Close the current connection.
    Disconnect {
        graceful: bool,
        ack: oneshot::Sender<()>,
    },
    /// Append a request to the outbound queue.
    Enqueue(PendingRequest),
    /// Dispose the client.
    Dispose { ack: oneshot::Sender<()> },
}

/// State shared between handles and the actor.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    /// Set once disposed.
    pub(crate) disposed: AtomicBool,
}

// ============================================================================
// Client
// ============================================================================

/// Handle to a resilient connection.
///
/// Cloning is cheap; every clone drives the same connection. When the
/// last handle is dropped the client disposes itself.
///
/// # Thread Safety
///
/// `Client` is `Send + Sync`. All operations are processed in order by a
/// single background task.
#[derive(Clone)]
pub struct Client {
    /// Actor inbox.
    commands: mpsc::UnboundedSender<ClientCommand>,
    /// Latest published status.
    status: watch::Receiver<ClientStatus>,
    /// Disposal flag.
    shared: Arc<Shared>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Constructors
// ============================================================================

impl Client {
    /// Creates a client and starts its background task.
    ///
    /// Connects immediately when `options.auto_connect` is set.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn new<C, H>(options: ClientOptions, connector: C, hooks: H) -> Result<Self>
    where
        C: Connector,
        H: ConnectionHooks,
    {
        let target = options.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());

        let client = Self {
            commands: command_tx,
            status: status_rx,
            shared: Arc::new(Shared::default()),
        };

        let span = info_span!("client", name = %options.name, target = %target);
        let (actor, inboxes) = span.in_scope(|| {
            Actor::new(
                options,
                target,
                Arc::new(connector),
                Arc::new(hooks),
                client.downgrade(),
                status_tx,
                Arc::clone(&client.shared),
                command_rx,
            )
        });

        tokio::spawn(actor.run(inboxes).instrument(span));

        Ok(client)
    }

    /// Creates a client over the bundled WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn websocket<H: ConnectionHooks>(options: ClientOptions, hooks: H) -> Result<Self> {
        Self::new(options, WsConnector, hooks)
    }
}

// ============================================================================
// Client - Lifecycle
// ============================================================================

impl Client {
    /// Starts connecting.
    ///
    /// No-op if disposed or already connecting/open.
    pub async fn connect(&self) {
        self.command(|ack| ClientCommand::Connect { ack }).await;
    }

    /// Closes the current connection.
    ///
    /// A graceful disconnect uses the intentional-shutdown close code and
    /// never triggers reconnection; otherwise reconnection follows the
    /// configured policy. No-op if disposed, closed, or nothing is connected.
    pub async fn disconnect(&self, graceful: bool) {
        self.command(|ack| ClientCommand::Disconnect { graceful, ack })
            .await;
    }

    /// Closes the connection for good.
    ///
    /// Stops all timers, fails every queued request and makes every later
    /// call a no-op (or, for requests, an immediate [`Error::Disposed`]).
    /// Idempotent.
    pub async fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.command(|ack| ClientCommand::Dispose { ack }).await;
    }

    /// Sends a command and waits until the actor has applied it.
    async fn command<F>(&self, make: F)
    where
        F: FnOnce(oneshot::Sender<()>) -> ClientCommand,
    {
        let (ack, applied) = oneshot::channel();
        if self.commands.send(make(ack)).is_err() {
            debug!("Client task gone, command dropped");
            return;
        }
        let _ = applied.await;
    }
}

// ============================================================================
// Client - Requests
// ============================================================================

impl Client {
    /// Queues a payload and waits until it is sent or fails for good.
    ///
    /// Requests are sent one at a time in submission order. Each attempt
    /// is bounded by the request timeout; failed attempts are retried up
    /// to the configured limit. `validator`, if given, decides from the
    /// transport's send result whether an attempt succeeded.
    ///
    /// # Errors
    ///
    /// - [`Error::AttemptsExhausted`] if every attempt failed
    /// - [`Error::ConnectionClosed`] if the connection closed first
    /// - [`Error::Disposed`] if the client is (or becomes) disposed
    pub async fn send_request(
        &self,
        description: impl Into<String>,
        payload: impl Into<Payload>,
        validator: Option<SendValidator>,
    ) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let (tx, rx) = oneshot::channel();
        let request = PendingRequest::new(description.into(), payload.into(), validator, tx);

        self.commands
            .send(ClientCommand::Enqueue(request))
            .map_err(|_| Error::Disposed)?;

        rx.await.map_err(|_| Error::Disposed)?
    }

    /// Shorthand for [`Client::send_request`] without a validator.
    ///
    /// # Errors
    ///
    /// See [`Client::send_request`].
    pub async fn send(
        &self,
        description: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Result<()> {
        self.send_request(description, payload, None).await
    }
}

// ============================================================================
// Client - Status
// ============================================================================

impl Client {
    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Returns the latest status snapshot.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        *self.status.borrow()
    }

    /// Returns a receiver notified on every status change.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Returns `true` once the client is disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Waits until the client reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the client stops before reaching it.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<()> {
        let mut status = self.status.clone();
        status
            .wait_for(|current| current.state == state)
            .await
            .map(|_| ())
            .map_err(|_| Error::Disposed)
    }

    /// Creates a handle that does not keep the client alive.
    pub(crate) fn downgrade(&self) -> WeakClient {
        WeakClient {
            commands: self.commands.downgrade(),
            status: self.status.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

// ============================================================================
// WeakClient
// ============================================================================

/// Non-owning client handle held by the actor and the hook dispatcher.
#[derive(Clone)]
pub(crate) struct WeakClient {
    commands: mpsc::WeakUnboundedSender<ClientCommand>,
    status: watch::Receiver<ClientStatus>,
    shared: Arc<Shared>,
}

impl WeakClient {
    /// Returns a client handle if any strong handle is still alive.
    pub(crate) fn upgrade(&self) -> Option<Client> {
        Some(Client {
            commands: self.commands.upgrade()?,
            status: self.status.clone(),
            shared: Arc::clone(&self.shared),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::hooks::NoopHooks;
    use crate::transport::MemoryConnector;

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let result = Client::new(ClientOptions::default(), MemoryConnector::new(), NoopHooks);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_idle_without_auto_connect() {
        let connector = MemoryConnector::new();
        let options = ClientOptions::new("memory://idle").with_auto_connect(false);
        let client = Client::new(options, connector.clone(), NoopHooks).expect("client");

        assert_eq!(client.state(), ConnectionState::Idle);
        assert_eq!(connector.attempts(), 0);

        client.connect().await;
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_weak_client_upgrade() {
        let options = ClientOptions::new("memory://weak").with_auto_connect(false);
        let client = Client::new(options, MemoryConnector::new(), NoopHooks).expect("client");
        let weak = client.downgrade();

        assert!(weak.upgrade().is_some());
        drop(client);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_debug_shows_status() {
        let options = ClientOptions::new("memory://debug").with_auto_connect(false);
        let client = Client::new(options, MemoryConnector::new(), NoopHooks).expect("client");
        assert!(format!("{client:?}").contains("Idle"));
    }
}
