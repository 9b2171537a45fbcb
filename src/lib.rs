//! Resilient Socket - self-healing duplex socket client.
//!
//! This library keeps a logical connection alive over an unreliable
//! transport and gives protocol implementations a small set of hooks to
//! build on.
//!
//! # Architecture
//!
//! Each [`Client`] is a handle to one background task that owns:
//!
//! - **Connection state machine**: `Idle`, `Connecting`, `Open`, `Closed`, `Reconnecting`
//! - **Reconnect scheduler**: jittered exponential backoff with an optional cap
//! - **Heartbeat scheduler**: one hook round at a time while open
//! - **Request queue**: strict FIFO, single-flight, with timeout, retry and backpressure
//!
//! Transports plug in through the [`Connector`] and [`Transport`] traits;
//! protocols plug in through [`ConnectionHooks`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use resilient_socket::{Client, ClientOptions, ConnectionHooks, HookResult, Payload, Result};
//!
//! struct Feed;
//!
//! #[async_trait]
//! impl ConnectionHooks for Feed {
//!     async fn heartbeat(&self, client: &Client) -> HookResult {
//!         client.send("ping", "ping").await?;
//!         Ok(())
//!     }
//!
//!     async fn message(&self, _client: &Client, payload: Payload) -> HookResult {
//!         println!("received {} bytes", payload.len());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let options = ClientOptions::new("ws://127.0.0.1:9000/feed")
//!         .with_heartbeat_interval(Duration::from_secs(15));
//!     let client = Client::websocket(options, Feed)?;
//!
//!     client.send("subscribe", r#"{"op":"subscribe"}"#).await?;
//!
//!     client.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`] handle, options and state |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`hooks`] | [`ConnectionHooks`] extension trait |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`transport`] | Transport traits, WebSocket and in-memory transports |

// ============================================================================
// Modules
// ============================================================================

/// Connection client.
///
/// Use [`Client::new`] or [`Client::websocket`] to start a connection.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Protocol extension hooks.
pub mod hooks;

/// Type-safe identifiers.
pub mod identifiers;

/// Transport layer.
///
/// Traits the client drives, plus the bundled WebSocket and in-memory
/// implementations.
pub mod transport;

mod timer;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Backoff, Client, ClientOptions, ClientStatus, ConnectionState, SendValidator};

// Error types
pub use error::{Error, Result};

// Hook types
pub use hooks::{ConnectionHooks, HookError, HookResult, NoopHooks};

// Identifier types
pub use identifiers::{Epoch, RequestId};

// Transport types
pub use transport::{
    CloseFrame, Connector, EventSink, MemoryConnector, MemoryLink, Payload, ReadyState, SendMode,
    Transport, TransportEvent, TransportOptions, WsConnector,
};
