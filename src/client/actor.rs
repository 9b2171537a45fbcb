//! Connection state machine.
//!
//! The [`Actor`] is the only owner of the lifecycle state, the transport,
//! the request queue and every timer. It runs on one task and handles one
//! message at a time, so none of that state needs a lock.
//!
//! # Inboxes
//!
//! | Channel | Producer | Content |
//! |---------|----------|---------|
//! | commands | `Client` handles | connect, disconnect, enqueue, dispose |
//! | internal | timers, hook tasks, send callbacks | fires and settlements |
//! | events | transports (via `EventSink`) | open, message, error, close |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, debug, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::hooks::{ConnectionHooks, HookEvent, guarded, spawn_dispatcher};
use crate::identifiers::Epoch;
use crate::transport::{CloseFrame, Connector, EventSink, Transport, TransportEvent};

use super::core::{ClientCommand, Shared, WeakClient};
use super::heartbeat::HeartbeatScheduler;
use super::options::ClientOptions;
use super::queue::RequestQueue;
use super::reconnect::{Backoff, ReconnectScheduler};
use super::state::{ClientStatus, ConnectionState};

// ============================================================================
// Types
// ============================================================================

/// Notifications the actor posts to itself.
#[derive(Debug)]
pub(crate) enum Internal {
    /// Coalesced queue pass.
    ProcessQueue,
    /// The opened hook for `epoch` returned.
    OpenedSettled { epoch: Epoch },
    /// Heartbeat timer fired.
    HeartbeatDue { generation: u64 },
    /// The heartbeat hook for `epoch` returned.
    HeartbeatSettled { epoch: Epoch },
    /// Reconnect timer fired.
    ReconnectDue { generation: u64 },
    /// Transport finished a send.
    SendCompleted { attempt: u64, error: Option<Error> },
    /// Per-attempt request timer fired.
    RequestTimedOut { generation: u64 },
    /// Request retry delay elapsed.
    RetryDue { generation: u64 },
    /// Backpressure poll interval elapsed.
    BackpressureDue { generation: u64 },
}

/// Receiving ends consumed by [`Actor::run`].
pub(crate) struct Inboxes {
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    internal: mpsc::UnboundedReceiver<Internal>,
    events: mpsc::UnboundedReceiver<(Epoch, TransportEvent)>,
}

/// The live transport and the sink it reports through.
pub(super) struct Link {
    pub(super) transport: Box<dyn Transport>,
    pub(super) sink: EventSink,
}

// ============================================================================
// Actor
// ============================================================================

/// Owner of all connection state.
pub(crate) struct Actor {
    pub(super) options: ClientOptions,
    pub(super) target: Url,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) hooks: Arc<dyn ConnectionHooks>,
    /// Ordered fire-and-forget hook delivery.
    pub(super) dispatcher: mpsc::UnboundedSender<HookEvent>,
    pub(super) client: WeakClient,
    pub(super) status: watch::Sender<ClientStatus>,
    pub(super) shared: Arc<Shared>,
    pub(super) internal_tx: mpsc::UnboundedSender<Internal>,
    pub(super) events_tx: mpsc::UnboundedSender<(Epoch, TransportEvent)>,

    pub(super) state: ConnectionState,
    pub(super) disposed: bool,
    /// Current connection attempt.
    pub(super) epoch: Epoch,
    pub(super) link: Option<Link>,

    pub(super) heartbeat: HeartbeatScheduler,
    pub(super) reconnect: ReconnectScheduler,
    pub(super) queue: RequestQueue,
}

impl Actor {
    /// Builds the actor and its inboxes, and spawns the hook dispatcher.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        options: ClientOptions,
        target: Url,
        connector: Arc<dyn Connector>,
        hooks: Arc<dyn ConnectionHooks>,
        client: WeakClient,
        status: watch::Sender<ClientStatus>,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<ClientCommand>,
    ) -> (Self, Inboxes) {
        let (internal_tx, internal) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let dispatcher = spawn_dispatcher(Arc::clone(&hooks), client.clone());
        let backoff = Backoff::new(options.reconnect_base_delay, options.reconnect_max_delay);

        let actor = Self {
            options,
            target,
            connector,
            hooks,
            dispatcher,
            client,
            status,
            shared,
            internal_tx,
            events_tx,
            state: ConnectionState::Idle,
            disposed: false,
            epoch: Epoch::default(),
            link: None,
            heartbeat: HeartbeatScheduler::new(),
            reconnect: ReconnectScheduler::new(backoff),
            queue: RequestQueue::new(),
        };

        let inboxes = Inboxes {
            commands,
            internal,
            events,
        };

        (actor, inboxes)
    }

    // ========================================================================
    // Event Loop
    // ========================================================================

    /// Runs until disposed or every client handle is dropped.
    pub(crate) async fn run(mut self, mut inboxes: Inboxes) {
        debug!("Client task started");

        if self.options.auto_connect {
            self.connect();
            self.publish();
        }

        loop {
            tokio::select! {
                command = inboxes.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All client handles dropped");
                        self.dispose();
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }

                Some(message) = inboxes.internal.recv() => {
                    self.handle_internal(message);
                }

                Some((epoch, event)) = inboxes.events.recv() => {
                    self.handle_event(epoch, event);
                }
            }

            self.publish();
        }

        self.publish();
        debug!("Client task stopped");
    }

    /// Applies a public command. Returns `false` once the actor should stop.
    fn handle_command(&mut self, command: ClientCommand) -> bool {
        match command {
            ClientCommand::Connect { ack } => {
                self.connect();
                self.ack(ack);
            }
            ClientCommand::Disconnect { graceful, ack } => {
                self.disconnect(graceful);
                self.ack(ack);
            }
            ClientCommand::Enqueue(request) => self.enqueue(request),
            ClientCommand::Dispose { ack } => {
                self.dispose();
                self.ack(ack);
                return false;
            }
        }
        true
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::ProcessQueue => {
                self.queue.pass_scheduled = false;
                self.process_queue();
            }
            Internal::OpenedSettled { epoch } => self.opened_settled(epoch),
            Internal::HeartbeatDue { generation } => self.heartbeat_due(generation),
            Internal::HeartbeatSettled { epoch } => self.heartbeat_settled(epoch),
            Internal::ReconnectDue { generation } => self.reconnect_due(generation),
            Internal::SendCompleted { attempt, error } => self.send_completed(attempt, error),
            Internal::RequestTimedOut { generation } => self.request_timed_out(generation),
            Internal::RetryDue { generation } => self.retry_due(generation),
            Internal::BackpressureDue { generation } => self.backpressure_due(generation),
        }
    }

    fn handle_event(&mut self, epoch: Epoch, event: TransportEvent) {
        if epoch != self.epoch || self.link.is_none() {
            trace!(%epoch, current = %self.epoch, "Dropping stale transport event");
            return;
        }

        match event {
            TransportEvent::Open => self.handle_open(),
            TransportEvent::Message(payload) => {
                if !self.disposed && self.state == ConnectionState::Open {
                    self.notify(HookEvent::Message(payload));
                }
            }
            TransportEvent::Error(message) => {
                warn!(error = %message, "Transport error");
                self.notify(HookEvent::Error(Error::transport(message)));
            }
            TransportEvent::Close(frame) => self.close_connection(frame),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts a connection attempt.
    pub(super) fn connect(&mut self) {
        if self.disposed || self.state.is_active() {
            return;
        }

        self.reconnect.cancel();
        self.epoch = self.epoch.next();
        self.set_state(ConnectionState::Connecting);
        info!(epoch = %self.epoch, attempt = self.reconnect.attempts(), "Connecting");

        let sink = EventSink::new(self.epoch, self.events_tx.clone());
        match self
            .connector
            .connect(&self.target, &self.options.transport, sink.clone())
        {
            Ok(transport) => {
                self.link = Some(Link { transport, sink });
            }
            Err(e) => {
                sink.detach();
                let error = if matches!(e, Error::Construction { .. }) {
                    e
                } else {
                    Error::construction(e.to_string())
                };
                warn!(error = %error, "Transport construction failed");
                self.notify(HookEvent::Error(error.clone()));
                self.close_connection(CloseFrame::abnormal(error.to_string()));
            }
        }
    }

    /// Closes the live connection from the client side.
    pub(super) fn disconnect(&mut self, graceful: bool) {
        if self.disposed || self.state == ConnectionState::Closed || self.link.is_none() {
            return;
        }

        let frame = if graceful {
            CloseFrame::normal("client disconnect")
        } else {
            CloseFrame::abnormal("client disconnect")
        };
        self.close_connection(frame);
    }

    /// Shared close path for transport closes, disconnects and
    /// construction failures.
    ///
    /// Safe to call repeatedly: every step tolerates already-released state.
    pub(super) fn close_connection(&mut self, frame: CloseFrame) {
        self.set_state(ConnectionState::Closed);

        if let Some(link) = self.link.take() {
            link.sink.detach();
            if !link.transport.ready_state().is_closing_or_closed() {
                link.transport.terminate();
            }
        }

        self.stop_heartbeat();
        self.reconnect.cancel();

        info!(code = frame.code, reason = %frame.reason, "Connection closed");

        let reason = frame.to_error();
        self.flush_queue(&reason);
        self.notify(HookEvent::Closed(reason));

        if self.disposed {
            return;
        }
        if frame.is_intentional() {
            debug!("Intentional close, not reconnecting");
            return;
        }
        if !self.options.reconnect_enabled() {
            debug!("Reconnection disabled");
            return;
        }

        self.schedule_reconnect();
    }

    fn handle_open(&mut self) {
        if self.disposed || self.state != ConnectionState::Connecting {
            return;
        }

        self.set_state(ConnectionState::Open);
        self.reconnect.reset();
        info!(epoch = %self.epoch, "Connection open");

        let Some(client) = self.client.upgrade() else {
            return;
        };

        let epoch = self.epoch;
        let hooks = Arc::clone(&self.hooks);
        let tx = self.internal_tx.clone();

        tokio::spawn(
            async move {
                guarded("opened", hooks.opened(&client)).await;
                drop(client);
                let _ = tx.send(Internal::OpenedSettled { epoch });
            }
            .in_current_span(),
        );
    }

    fn opened_settled(&mut self, epoch: Epoch) {
        if self.disposed || epoch != self.epoch {
            return;
        }

        if self.state != ConnectionState::Open {
            debug!(state = %self.state, "State changed during opened hook");
            self.disconnect(false);
            return;
        }

        self.start_heartbeat();
        self.schedule_pass();
    }

    /// Terminal shutdown.
    pub(super) fn dispose(&mut self) {
        if self.disposed {
            return;
        }

        info!("Disposing client");

        self.disconnect(true);
        self.stop_heartbeat();
        self.reconnect.cancel();
        self.flush_queue(&Error::Disposed);
        self.set_state(ConnectionState::Closed);

        self.disposed = true;
        self.shared.disposed.store(true, Ordering::Release);
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    pub(super) fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "State transition");
            self.state = next;
        }
    }

    /// Queues a fire-and-forget hook.
    pub(super) fn notify(&self, event: HookEvent) {
        let _ = self.dispatcher.send(event);
    }

    /// Publishes the status snapshot if it changed.
    fn publish(&self) {
        let next = ClientStatus {
            state: self.state,
            reconnect_attempts: self.reconnect.attempts(),
            queued: self.queue.len(),
            head_attempts: self.queue.head_attempts(),
            disposed: self.disposed,
        };

        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Publishes, then releases the caller waiting on a command.
    fn ack(&self, ack: oneshot::Sender<()>) {
        self.publish();
        let _ = ack.send(());
    }
}

// ============================================================================
// Tests
// ============================================================================
