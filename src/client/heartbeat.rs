//! Heartbeat rounds.
//!
//! A round runs the heartbeat hook on its own task. The next round is
//! armed only once the previous hook has settled, so rounds never overlap.
//!
//! The in-flight guard outlives the connection that started the round: a
//! hook still running across a reconnect holds back the new connection's
//! first round until it settles.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{Instrument, trace};

use crate::hooks::guarded;
use crate::identifiers::Epoch;
use crate::timer::Timer;

use super::actor::{Actor, Internal};
use super::state::ConnectionState;

// ============================================================================
// HeartbeatScheduler
// ============================================================================

/// Heartbeat timer plus the in-flight guard.
#[derive(Debug, Default)]
pub(crate) struct HeartbeatScheduler {
    timer: Timer,
    /// A hook is running, possibly for an earlier connection.
    in_flight: bool,
    /// A round came due while a hook was still running.
    deferred: bool,
}

impl HeartbeatScheduler {
    pub(super) fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Actor - Heartbeat
// ============================================================================

impl Actor {
    /// Arms the next round.
    pub(super) fn start_heartbeat(&mut self) {
        self.heartbeat.timer.arm(
            self.options.heartbeat_interval,
            &self.internal_tx,
            |generation| Internal::HeartbeatDue { generation },
        );
    }

    /// Cancels the timer. A running hook keeps the guard until it settles.
    pub(super) fn stop_heartbeat(&mut self) {
        self.heartbeat.timer.cancel();
        self.heartbeat.deferred = false;
    }

    pub(super) fn heartbeat_due(&mut self, generation: u64) {
        if !self.heartbeat.timer.fire(generation) {
            return;
        }
        if self.disposed || self.state != ConnectionState::Open {
            return;
        }
        if self.heartbeat.in_flight {
            trace!("Heartbeat round deferred");
            self.heartbeat.deferred = true;
            return;
        }
        let Some(client) = self.client.upgrade() else {
            return;
        };

        trace!(epoch = %self.epoch, "Heartbeat round");
        self.heartbeat.in_flight = true;

        let epoch = self.epoch;
        let hooks = Arc::clone(&self.hooks);
        let tx = self.internal_tx.clone();

        tokio::spawn(
            async move {
                guarded("heartbeat", hooks.heartbeat(&client)).await;
                drop(client);
                let _ = tx.send(Internal::HeartbeatSettled { epoch });
            }
            .in_current_span(),
        );
    }

    pub(super) fn heartbeat_settled(&mut self, epoch: Epoch) {
        self.heartbeat.in_flight = false;
        let deferred = std::mem::take(&mut self.heartbeat.deferred);

        if self.disposed || self.state != ConnectionState::Open {
            return;
        }
        // A round from an earlier connection only re-arms if it held one back
        if epoch != self.epoch && !deferred {
            return;
        }
        self.start_heartbeat();
    }
}

// ============================================================================
// Tests
// ============================================================================
