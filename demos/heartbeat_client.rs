//! Heartbeat client demo.
//!
//! Demonstrates:
//! - Connecting to a WebSocket server with reconnection
//! - Pinging on every heartbeat round
//! - Printing inbound messages
//! - Graceful shutdown on Ctrl+C
//!
//! Usage:
//!   cargo run --example heartbeat_client -- ws://127.0.0.1:9000
//!   cargo run --example heartbeat_client -- ws://127.0.0.1:9000 --debug

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use resilient_socket::{
    Client, ClientOptions, ConnectionHooks, Error, HookResult, Payload, Result,
};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_TARGET: &str = "ws://127.0.0.1:9000";

// ============================================================================
// Hooks
// ============================================================================

/// Pings on every heartbeat and prints what comes back.
#[derive(Default)]
struct Pinger {
    pings: AtomicU64,
}

#[async_trait]
impl ConnectionHooks for Pinger {
    async fn opened(&self, _client: &Client) -> HookResult {
        println!("[open] Connected");
        Ok(())
    }

    async fn message(&self, _client: &Client, payload: Payload) -> HookResult {
        match payload.as_text() {
            Some(text) => println!("[recv] {text}"),
            None => println!("[recv] <{} bytes>", payload.len()),
        }
        Ok(())
    }

    async fn heartbeat(&self, client: &Client) -> HookResult {
        let n = self.pings.fetch_add(1, Ordering::Relaxed) + 1;
        client.send("ping", format!("ping {n}")).await?;
        println!("[ping] #{n}");
        Ok(())
    }

    async fn closed(&self, reason: Error) -> HookResult {
        println!("[close] {reason}");
        Ok(())
    }

    async fn error(&self, error: Error) -> HookResult {
        println!("[error] {error}");
        Ok(())
    }

    async fn reconnect_exhausted(&self) -> HookResult {
        println!("[close] Giving up");
        Ok(())
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let debug = args.iter().any(|a| a == "--debug");
    let target = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| DEFAULT_TARGET.to_string());

    init_logging(debug);

    if let Err(e) = run(target).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(target: String) -> Result<()> {
    println!("=== Heartbeat Client ===\n");
    println!("Target: {target}");

    let options = ClientOptions::new(target)
        .with_name("demo")
        .with_heartbeat_interval(Duration::from_secs(5))
        .with_max_reconnect_attempts(Some(10));

    let client = Client::websocket(options, Pinger::default())?;

    println!("Press Ctrl+C to exit...\n");
    tokio::signal::ctrl_c().await.ok();

    client.disconnect(true).await;
    client.dispose().await;
    println!("\nDone");

    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "resilient_socket=debug"
    } else {
        "resilient_socket=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}
