//! Jittered exponential backoff.
//!
//! # Delay
//!
//! For attempt `k` (1-based):
//!
//! ```text
//! nominal = base * 1.5^(k-1)
//! delay   = clamp(nominal * (1 ± 0.4), min(base / 2, max), max)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::hooks::HookEvent;
use crate::timer::Timer;

use super::actor::{Actor, Internal};
use super::state::ConnectionState;

// ============================================================================
// Constants
// ============================================================================

/// Growth factor per attempt.
const GROWTH: f64 = 1.5;

/// Relative jitter applied to the nominal delay.
const JITTER: f64 = 0.4;

/// Exponent cap; far beyond any realistic ceiling.
const MAX_EXPONENT: u32 = 128;

// ============================================================================
// Backoff
// ============================================================================

/// Reconnect delay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Creates a policy growing from `base` up to `max`.
    #[inline]
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Returns the base delay.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Returns the delay ceiling.
    #[inline]
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Un-jittered delay for `attempt`.
    #[must_use]
    pub fn nominal(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        self.base.as_secs_f64() * GROWTH.powi(exponent as i32)
    }

    /// Jittered, clamped delay for `attempt`.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter = rng.gen_range(-JITTER..=JITTER);
        let jittered = self.nominal(attempt) * (1.0 + jitter);

        let floor = (self.base / 2).min(self.max).as_secs_f64();
        let ceiling = self.max.as_secs_f64();

        Duration::try_from_secs_f64(jittered.clamp(floor, ceiling)).unwrap_or(self.max)
    }
}

// ============================================================================
// ReconnectScheduler
// ============================================================================

/// Reconnect timer and attempt counter.
#[derive(Debug)]
pub(crate) struct ReconnectScheduler {
    /// Attempts since the last successful open.
    attempts: u32,
    timer: Timer,
    backoff: Backoff,
    rng: StdRng,
}

impl ReconnectScheduler {
    pub(super) fn new(backoff: Backoff) -> Self {
        Self {
            attempts: 0,
            timer: Timer::new(),
            backoff,
            rng: StdRng::from_entropy(),
        }
    }

    #[inline]
    pub(super) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Cancels a pending reconnect.
    pub(super) fn cancel(&mut self) {
        self.timer.cancel();
    }

    /// Forgets past attempts after a successful open.
    pub(super) fn reset(&mut self) {
        self.attempts = 0;
        self.timer.cancel();
    }
}

// ============================================================================
// Actor - Reconnect
// ============================================================================

impl Actor {
    /// Arms the next reconnect, or reports exhaustion.
    pub(super) fn schedule_reconnect(&mut self) {
        self.reconnect.timer.cancel();

        if let Some(cap) = self.options.max_reconnect_attempts
            && self.reconnect.attempts >= cap
        {
            warn!(attempts = self.reconnect.attempts, "Reconnect attempts exhausted");
            self.notify(HookEvent::ReconnectExhausted);
            return;
        }

        self.reconnect.attempts += 1;
        let attempt = self.reconnect.attempts;
        let delay = self.reconnect.backoff.delay(attempt, &mut self.reconnect.rng);

        self.set_state(ConnectionState::Reconnecting);
        info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );

        self.reconnect
            .timer
            .arm(delay, &self.internal_tx, |generation| Internal::ReconnectDue {
                generation,
            });
    }

    pub(super) fn reconnect_due(&mut self, generation: u64) {
        if !self.reconnect.timer.fire(generation) {
            return;
        }
        if self.disposed || self.state != ConnectionState::Reconnecting {
            debug!(state = %self.state, "Skipping reconnect");
            return;
        }
        self.connect();
    }
}

// ============================================================================
// Tests
// ============================================================================
