//! Cancellable one-shot timers.
//!
//! A [`Timer`] spawns a sleeping task that posts a message back to the
//! client actor. Every arm or cancel bumps a generation counter and the
//! message carries the generation it was armed with, so a fire that raced
//! a cancellation is recognized by [`Timer::fire`] and ignored.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::sleep;

// ============================================================================
// Timer
// ============================================================================

/// One-shot timer with generation-checked cancellation.
#[derive(Debug, Default)]
pub(crate) struct Timer {
    /// Generation of the currently armed (or last cancelled) timer.
    generation: u64,
    /// Sleeping task, if armed.
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    /// Creates an idle timer.
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arms the timer, cancelling any previous arm first.
    ///
    /// `message` receives the generation that [`Timer::fire`] expects.
    pub(crate) fn arm<M, F>(&mut self, delay: Duration, tx: &UnboundedSender<M>, message: F)
    where
        M: Send + 'static,
        F: FnOnce(u64) -> M,
    {
        self.cancel();

        let message = message(self.generation);
        let tx = tx.clone();

        self.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(message);
        }));
    }

    /// Cancels the timer. Safe to call when idle.
    pub(crate) fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Consumes a fire notification.
    ///
    /// Returns `true` only for the generation currently armed; the timer
    /// is idle afterwards.
    pub(crate) fn fire(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.handle.is_none() {
            return false;
        }
        self.handle = None;
        true
    }

    /// Returns `true` if the timer is armed.
    #[inline]
    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
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

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();

        timer.arm(Duration::from_millis(50), &tx, |generation| generation);
        assert!(timer.is_armed());

        let generation = rx.recv().await.expect("fire");
        assert!(timer.fire(generation));
        assert!(!timer.is_armed());
        assert!(!timer.fire(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_invalidates_previous_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();

        timer.arm(Duration::from_millis(10), &tx, |generation| generation);
        let first = timer.generation;
        timer.arm(Duration::from_millis(20), &tx, |generation| generation);

        let fired = rx.recv().await.expect("fire");
        assert_ne!(fired, first);
        assert!(!timer.fire(first));
        assert!(timer.fire(fired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut timer = Timer::new();

        timer.arm(Duration::from_millis(10), &tx, |generation| generation);
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
