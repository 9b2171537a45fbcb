//! Single-flight outbound request queue.
//!
//! Requests leave strictly in submission order, one at a time. The head
//! request blocks everything behind it until it is sent or exhausts its
//! attempts.
//!
//! # Attempt Flow
//!
//! ```text
//! pass ──► stale ready-state? ──yes──► disconnect (reconnects)
//!             │ no
//!             ▼
//!          over backpressure threshold? ──yes──► poll again later
//!             │ no
//!             ▼
//!          send + arm timeout ──► completion / timeout
//!                                    │
//!              ┌──────── ok ─────────┼──── failed, attempts left ────┐
//!              ▼                     │                               ▼
//!        resolve, next pass          ▼                    retry delay, same head
//!                        failed, no attempts left
//!                                    │
//!                                    ▼
//!                         reject head, next pass
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::hooks::HookEvent;
use crate::identifiers::RequestId;
use crate::timer::Timer;
use crate::transport::{Payload, ReadyState};

use super::actor::{Actor, Internal};
use super::state::ConnectionState;

// ============================================================================
// Types
// ============================================================================

/// Decides from a send result whether an attempt succeeded.
///
/// Receives the transport's error, if any. Without a validator an attempt
/// succeeds when the transport reports no error.
pub type SendValidator = Box<dyn Fn(Option<&Error>) -> bool + Send>;

// ============================================================================
// PendingRequest
// ============================================================================

/// A queued request and the caller waiting on it.
pub(crate) struct PendingRequest {
    id: RequestId,
    description: String,
    payload: Payload,
    validator: Option<SendValidator>,
    responder: oneshot::Sender<Result<()>>,
    /// Attempts made so far.
    attempts: u32,
}

impl PendingRequest {
    pub(crate) fn new(
        description: String,
        payload: Payload,
        validator: Option<SendValidator>,
        responder: oneshot::Sender<Result<()>>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            description,
            payload,
            validator,
            responder,
            attempts: 0,
        }
    }

    /// Judges an attempt's send result.
    fn accepts(&self, error: Option<&Error>) -> bool {
        let Some(validator) = &self.validator else {
            return error.is_none();
        };

        match catch_unwind(AssertUnwindSafe(|| validator(error))) {
            Ok(verdict) => verdict,
            Err(_) => {
                warn!(request_id = %self.id, "Validator panicked, treating attempt as failed");
                false
            }
        }
    }

    /// Resolves the caller. Consumes the request.
    fn settle(self, result: Result<()>) {
        let _ = self.responder.send(result);
    }
}

// ============================================================================
// RequestQueue
// ============================================================================

/// Queue state owned by the actor.
#[derive(Default)]
pub(crate) struct RequestQueue {
    items: VecDeque<PendingRequest>,
    /// Set from send until the head settles or its retry delay elapses.
    busy: bool,
    /// Identifier of the most recent attempt.
    attempt: u64,
    /// Attempt awaiting a send completion.
    in_flight: Option<u64>,
    /// A `ProcessQueue` message is pending.
    pub(super) pass_scheduled: bool,
    timeout: Timer,
    retry: Timer,
    postpone: Timer,
}

impl RequestQueue {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Requests waiting, the head included.
    #[inline]
    pub(super) fn len(&self) -> usize {
        self.items.len()
    }

    /// Attempts made for the head request.
    #[inline]
    pub(super) fn head_attempts(&self) -> u32 {
        self.items.front().map_or(0, |head| head.attempts)
    }

    fn cancel_timers(&mut self) {
        self.timeout.cancel();
        self.retry.cancel();
        self.postpone.cancel();
    }
}

// ============================================================================
// Actor - Queue Processing
// ============================================================================

impl Actor {
    /// Appends a request and schedules a pass.
    pub(super) fn enqueue(&mut self, request: PendingRequest) {
        if self.disposed {
            request.settle(Err(Error::Disposed));
            return;
        }

        debug!(
            request_id = %request.id,
            description = %request.description,
            position = self.queue.len(),
            "Request queued"
        );
        self.queue.items.push_back(request);
        self.schedule_pass();
    }

    /// Schedules one pass; submissions before it runs share it.
    pub(super) fn schedule_pass(&mut self) {
        if self.queue.pass_scheduled {
            return;
        }
        self.queue.pass_scheduled = true;
        let _ = self.internal_tx.send(Internal::ProcessQueue);
    }

    /// Sends the head request if nothing else is in flight.
    pub(super) fn process_queue(&mut self) {
        if self.disposed
            || self.state != ConnectionState::Open
            || self.queue.busy
            || self.queue.items.is_empty()
        {
            return;
        }

        let Some(link) = self.link.as_ref() else {
            return;
        };
        let ready_state = link.transport.ready_state();
        let buffered = link.transport.buffered_amount();

        if ready_state != ReadyState::Open {
            let error = Error::stale_state(self.state, ready_state);
            warn!(error = %error, "Transport state drifted, forcing reconnect");
            self.notify(HookEvent::Error(error));
            self.disconnect(false);
            return;
        }

        if buffered > self.options.backpressure_threshold {
            if !self.queue.postpone.is_armed() {
                trace!(
                    buffered,
                    threshold = self.options.backpressure_threshold,
                    "Backpressure, postponing send"
                );
                self.queue.postpone.arm(
                    self.options.backpressure_poll_interval,
                    &self.internal_tx,
                    |generation| Internal::BackpressureDue { generation },
                );
            }
            return;
        }

        let Some(head) = self.queue.items.front_mut() else {
            return;
        };
        head.attempts += 1;
        let payload = head.payload.clone();

        debug!(
            request_id = %head.id,
            description = %head.description,
            attempt = head.attempts,
            "Sending request"
        );

        self.queue.busy = true;
        self.queue.attempt += 1;
        let attempt = self.queue.attempt;
        self.queue.in_flight = Some(attempt);

        self.queue.timeout.arm(
            self.options.request_timeout,
            &self.internal_tx,
            |generation| Internal::RequestTimedOut { generation },
        );

        let tx = self.internal_tx.clone();
        if let Some(link) = self.link.as_ref() {
            link.transport.send(
                payload,
                Box::new(move |error| {
                    let _ = tx.send(Internal::SendCompleted { attempt, error });
                }),
            );
        }
    }

    pub(super) fn send_completed(&mut self, attempt: u64, error: Option<Error>) {
        if self.queue.in_flight != Some(attempt) {
            trace!(attempt, "Ignoring late send completion");
            return;
        }
        self.queue.in_flight = None;
        self.queue.timeout.cancel();

        let Some(head) = self.queue.items.front() else {
            self.queue.busy = false;
            return;
        };

        if head.accepts(error.as_ref()) {
            if let Some(head) = self.queue.items.pop_front() {
                debug!(request_id = %head.id, attempts = head.attempts, "Request sent");
                head.settle(Ok(()));
            }
            self.queue.busy = false;
            self.process_queue();
            return;
        }

        let reason = error.unwrap_or_else(|| Error::rejected(head.id, head.description.clone()));
        self.attempt_failed(reason);
    }

    pub(super) fn request_timed_out(&mut self, generation: u64) {
        if !self.queue.timeout.fire(generation) {
            return;
        }
        self.queue.in_flight = None;

        let Some(head) = self.queue.items.front() else {
            self.queue.busy = false;
            return;
        };

        let timeout_ms = u64::try_from(self.options.request_timeout.as_millis()).unwrap_or(u64::MAX);
        let reason = Error::request_timeout(head.id, head.description.clone(), timeout_ms);
        self.attempt_failed(reason);
    }

    /// Retries the head or, once out of attempts, drops it.
    fn attempt_failed(&mut self, reason: Error) {
        let max_attempts = self.options.max_request_attempts;
        let Some(head) = self.queue.items.front() else {
            self.queue.busy = false;
            return;
        };

        if head.attempts < max_attempts {
            debug!(
                request_id = %head.id,
                attempt = head.attempts,
                max_attempts,
                error = %reason,
                "Request attempt failed, retrying"
            );
            self.queue.retry.arm(
                self.options.request_retry_delay,
                &self.internal_tx,
                |generation| Internal::RetryDue { generation },
            );
            return;
        }

        if let Some(head) = self.queue.items.pop_front() {
            warn!(
                request_id = %head.id,
                description = %head.description,
                attempts = head.attempts,
                error = %reason,
                "Request failed"
            );
            let error = Error::attempts_exhausted(
                head.id,
                head.description.clone(),
                head.attempts,
                reason,
            );
            head.settle(Err(error));
        }
        self.queue.busy = false;
        self.process_queue();
    }

    pub(super) fn retry_due(&mut self, generation: u64) {
        if !self.queue.retry.fire(generation) {
            return;
        }
        self.queue.busy = false;
        self.process_queue();
    }

    pub(super) fn backpressure_due(&mut self, generation: u64) {
        if !self.queue.postpone.fire(generation) {
            return;
        }
        self.process_queue();
    }

    /// Rejects every queued request with `reason`, in submission order.
    pub(super) fn flush_queue(&mut self, reason: &Error) {
        self.queue.busy = false;
        self.queue.in_flight = None;
        self.queue.cancel_timers();

        let items = std::mem::take(&mut self.queue.items);
        if items.is_empty() {
            return;
        }

        info!(count = items.len(), reason = %reason, "Flushing request queue");
        for request in items {
            request.settle(Err(reason.clone()));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    use crate::client::{Client, ClientOptions, ConnectionState};
    use crate::error::Error;
    use crate::hooks::NoopHooks;
    use crate::transport::{CLOSE_ABNORMAL, MemoryConnector, Payload, SendMode};

    const RETRY: Duration = Duration::from_millis(200);
    const TIMEOUT: Duration = Duration::from_millis(500);

    fn options(max_attempts: u32) -> ClientOptions {
        ClientOptions::new("memory://queue")
            .with_request_retry_delay(RETRY)
            .with_request_timeout(TIMEOUT)
            .with_max_request_attempts(max_attempts)
            .with_max_reconnect_attempts(Some(0))
    }

    async fn open_client(connector: &MemoryConnector, options: ClientOptions) -> Client {
        let client = Client::new(options, connector.clone(), NoopHooks).expect("client");
        client
            .wait_for_state(ConnectionState::Open)
            .await
            .expect("open");
        client
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_success() {
        let connector = MemoryConnector::auto_open();
        let client = open_client(&connector, options(3)).await;

        client.send("greeting", "hello").await.expect("sent");
        client
            .send("blob", vec![1u8, 2, 3])
            .await
            .expect("sent binary");

        let link = connector.latest().expect("link");
        assert_eq!(
            link.sent(),
            vec![Payload::from("hello"), Payload::from(vec![1u8, 2, 3])]
        );
        assert_eq!(client.status().queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order_with_burst() {
        let connector = MemoryConnector::auto_open();
        let client = open_client(&connector, options(3)).await;

        let sends: Vec<_> = (0..5)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.send(format!("req-{i}"), format!("{i}")).await })
            })
            .collect();

        for send in sends {
            send.await.expect("join").expect("sent");
        }

        let sent = connector.latest().expect("link").sent();
        let expected: Vec<_> = (0..5).map(|i| Payload::from(format!("{i}"))).collect();
        assert_eq!(sent, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_send_exhausts_attempts() {
        for max_attempts in 1..=4u32 {
            let connector = MemoryConnector::auto_open().with_send_mode(SendMode::Hang);
            let client = open_client(&connector, options(max_attempts)).await;

            let started = Instant::now();
            let err = client.send("stuck", "x").await.unwrap_err();
            let elapsed = started.elapsed();

            match &err {
                Error::AttemptsExhausted { attempts, last, .. } => {
                    assert_eq!(*attempts, max_attempts);
                    assert!(last.is_timeout());
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(err.is_timeout());

            let minimum = RETRY * (max_attempts - 1) + TIMEOUT * max_attempts;
            assert!(elapsed >= minimum, "{elapsed:?} < {minimum:?}");
            assert_eq!(
                connector.latest().expect("link").sent().len(),
                max_attempts as usize
            );

            client.dispose().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_then_recovery() {
        let connector =
            MemoryConnector::auto_open().with_send_mode(SendMode::Fail("write failed".into()));
        let client = open_client(&connector, options(3)).await;
        let link = connector.latest().expect("link");

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send("flaky", "x").await }
        });

        tokio::time::sleep(RETRY / 2).await;
        assert_eq!(client.status().head_attempts, 1);
        link.set_send_mode(SendMode::Ack);

        pending.await.expect("join").expect("sent on retry");
        assert_eq!(link.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validator_rejects() {
        let connector = MemoryConnector::auto_open();
        let client = open_client(&connector, options(2)).await;

        let err = client
            .send_request("vetoed", "x", Some(Box::new(|_: Option<&Error>| false)))
            .await
            .unwrap_err();

        match err {
            Error::AttemptsExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, Error::Rejected { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_validator_accepts_transport_error() {
        let connector =
            MemoryConnector::auto_open().with_send_mode(SendMode::Fail("ignored".into()));
        let client = open_client(&connector, options(1)).await;

        client
            .send_request("tolerant", "x", Some(Box::new(|_: Option<&Error>| true)))
            .await
            .expect("validator overrides transport error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_of_line_then_drop() {
        let connector = MemoryConnector::auto_open().with_send_mode(SendMode::Hang);
        let client = open_client(&connector, options(1)).await;
        let link = connector.latest().expect("link");

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.send("first", "1").await }
        });
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.send("second", "2").await }
        });

        tokio::time::sleep(TIMEOUT / 2).await;
        assert_eq!(link.sent(), vec![Payload::from("1")]);
        assert_eq!(client.status().queued, 2);

        link.set_send_mode(SendMode::Ack);
        assert!(first.await.expect("join").is_err());
        second.await.expect("join").expect("second sent after first dropped");
        assert_eq!(link.sent(), vec![Payload::from("1"), Payload::from("2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_ignored() {
        let connector = MemoryConnector::auto_open().with_send_mode(SendMode::Hang);
        let client = open_client(&connector, options(2)).await;
        let link = connector.latest().expect("link");

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send("slow", "x").await }
        });

        // First attempt times out; its completion arrives during the retry delay.
        tokio::time::sleep(TIMEOUT + RETRY / 2).await;
        link.release_hung(None);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(client.status().queued, 1);

        link.set_send_mode(SendMode::Ack);
        pending.await.expect("join").expect("second attempt");
        assert_eq!(link.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_in_order() {
        let connector = MemoryConnector::auto_open().with_send_mode(SendMode::Hang);
        let client = open_client(&connector, options(3)).await;

        let pending: Vec<_> = (0..3)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.send(format!("req-{i}"), "x").await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.status().queued, 3);

        connector
            .latest()
            .expect("link")
            .close(CLOSE_ABNORMAL, "reset");

        let expected = Error::connection_closed(CLOSE_ABNORMAL, "reset");
        for handle in pending {
            assert_eq!(handle.await.expect("join"), Err(expected.clone()));
        }
        assert_eq!(client.status().queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_holds_request() {
        let connector = MemoryConnector::auto_open();
        let client = open_client(&connector, options(3).with_backpressure_threshold(1024)).await;
        let link = connector.latest().expect("link");
        link.set_buffered(4096);

        let mut send = task::spawn(client.send("held", "x"));
        assert_pending!(send.poll());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_pending!(send.poll());
        assert_eq!(client.status().queued, 1);
        assert_eq!(client.status().head_attempts, 0);
        assert!(link.sent().is_empty());

        link.set_buffered(0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_ready_ok!(send.poll());
        assert_eq!(link.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_wait_for_open() {
        let connector = MemoryConnector::new();
        let client = Client::new(options(3), connector.clone(), NoopHooks).expect("client");

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send("early", "x").await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let link = connector.latest().expect("link");
        assert!(link.sent().is_empty());

        link.open();
        pending.await.expect("join").expect("sent after open");
        assert_eq!(link.sent(), vec![Payload::from("x")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_rejects_queued() {
        let connector = MemoryConnector::new();
        let client = Client::new(options(3), connector.clone(), NoopHooks).expect("client");

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send("never", "x").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        client.dispose().await;
        let result = pending.await.expect("join");
        assert!(result.is_err());
        assert!(matches!(
            client.send("after", "x").await,
            Err(Error::Disposed)
        ));
    }
}
