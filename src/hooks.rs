//! Extension hooks.
//!
//! A concrete protocol plugs into the client by implementing
//! [`ConnectionHooks`]. Every method has a no-op default.
//!
//! # Invocation
//!
//! | Hook | Runs on | Client waits for it |
//! |------|---------|---------------------|
//! | `opened` | own task | yes: heartbeat and queue start after it settles |
//! | `heartbeat` | own task | yes: next round is armed after it settles |
//! | `message` | dispatcher | no |
//! | `closed` | dispatcher | no |
//! | `error` | dispatcher | no |
//! | `reconnect_exhausted` | dispatcher | no |
//!
//! Dispatcher hooks run one at a time in the order the client observed
//! the events, so inbound messages are never reordered. Errors and
//! panics raised by any hook are logged and swallowed.
//!
//! # Example
//!
//! ```ignore
//! struct Feed;
//!
//! #[async_trait]
//! impl ConnectionHooks for Feed {
//!     async fn opened(&self, client: &Client) -> HookResult {
//!         client.send("subscribe", r#"{"op":"subscribe"}"#).await?;
//!         Ok(())
//!     }
//!
//!     async fn heartbeat(&self, client: &Client) -> HookResult {
//!         client.send("ping", "ping").await?;
//!         Ok(())
//!     }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, warn};

use crate::client::Client;
use crate::client::core::WeakClient;
use crate::error::Error;
use crate::transport::Payload;

// ============================================================================
// Types
// ============================================================================

/// Error type hooks may return.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of every hook.
pub type HookResult = Result<(), HookError>;

// ============================================================================
// ConnectionHooks
// ============================================================================

/// Callbacks a protocol supplies to the client.
#[async_trait]
pub trait ConnectionHooks: Send + Sync + 'static {
    /// The connection opened.
    ///
    /// Typically authenticates or subscribes. Heartbeats and queued
    /// requests start only after this returns.
    async fn opened(&self, _client: &Client) -> HookResult {
        Ok(())
    }

    /// A message arrived while open.
    async fn message(&self, _client: &Client, _payload: Payload) -> HookResult {
        Ok(())
    }

    /// A heartbeat round is due.
    async fn heartbeat(&self, _client: &Client) -> HookResult {
        Ok(())
    }

    /// The connection closed. `reason` is the close-reason error.
    async fn closed(&self, _reason: Error) -> HookResult {
        Ok(())
    }

    /// The transport reported an error, or could not be constructed.
    async fn error(&self, _error: Error) -> HookResult {
        Ok(())
    }

    /// The reconnect cap was reached; no further attempts will be made.
    async fn reconnect_exhausted(&self) -> HookResult {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl ConnectionHooks for NoopHooks {}

// ============================================================================
// Guarded Invocation
// ============================================================================

/// Awaits a hook, containing errors and panics.
///
/// Returns `true` if the hook succeeded.
pub(crate) async fn guarded<F>(hook: &'static str, future: F) -> bool
where
    F: Future<Output = HookResult>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(hook, error = %e, "Hook failed");
            false
        }
        Err(_) => {
            error!(hook, "Hook panicked");
            false
        }
    }
}

// ============================================================================
// HookEvent
// ============================================================================

/// Hook invocation delivered through the dispatcher.
#[derive(Debug)]
pub(crate) enum HookEvent {
    Message(Payload),
    Closed(Error),
    Error(Error),
    ReconnectExhausted,
}

impl HookEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Closed(_) => "closed",
            Self::Error(_) => "error",
            Self::ReconnectExhausted => "reconnect_exhausted",
        }
    }
}

/// Spawns the ordered dispatcher for fire-and-forget hooks.
///
/// The task ends when the sender side is dropped.
pub(crate) fn spawn_dispatcher(
    hooks: Arc<dyn ConnectionHooks>,
    weak: WeakClient,
) -> mpsc::UnboundedSender<HookEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<HookEvent>();

    tokio::spawn(
        async move {
            while let Some(event) = rx.recv().await {
                let name = event.name();
                match event {
                    HookEvent::Message(payload) => {
                        // Nobody left to hand the client to
                        let Some(client) = weak.upgrade() else {
                            continue;
                        };
                        guarded(name, hooks.message(&client, payload)).await;
                    }
                    HookEvent::Closed(reason) => {
                        guarded(name, hooks.closed(reason)).await;
                    }
                    HookEvent::Error(err) => {
                        guarded(name, hooks.error(err)).await;
                    }
                    HookEvent::ReconnectExhausted => {
                        guarded(name, hooks.reconnect_exhausted()).await;
                    }
                }
            }
            debug!("Hook dispatcher stopped");
        }
        .in_current_span(),
    );

    tx
}

// ============================================================================
// Tests
// ============================================================================
