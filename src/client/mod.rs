//! Resilient connection client.
//!
//! Each [`Client`] is a handle to one actor task that owns the connection
//! state machine, the heartbeat and reconnect schedulers, and the
//! outbound request queue.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | `Client` handle and public API |
//! | `actor` | State machine, transport events, close handling |
//! | `queue` | Single-flight outbound request queue |
//! | `heartbeat` | Heartbeat rounds |
//! | `reconnect` | Jittered exponential backoff |
//! | `options` | `ClientOptions` |
//! | `state` | `ConnectionState`, `ClientStatus` |
//!
//! # Example
//!
//! ```no_run
//! use resilient_socket::{Client, ClientOptions, NoopHooks, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = Client::websocket(ClientOptions::new("ws://127.0.0.1:9000"), NoopHooks)?;
//!
//! client.send("greeting", "hello").await?;
//! client.dispose().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod actor;

/// Client handle and public API.
pub mod core;

mod heartbeat;

/// Client configuration.
pub mod options;

mod queue;
mod reconnect;

/// Connection lifecycle state.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Client;
pub use options::ClientOptions;
pub use queue::SendValidator;
pub use reconnect::Backoff;
pub use state::{ClientStatus, ConnectionState};
