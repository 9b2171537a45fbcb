//! Client configuration.
//!
//! [`ClientOptions`] is built once and frozen when the client starts.
//! Every field has a default; callers override only what they need,
//! either through the `with_*` builder methods or by deserializing a JSON
//! document, which is merged over the defaults.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use resilient_socket::ClientOptions;
//!
//! let options = ClientOptions::new("ws://127.0.0.1:9000/feed")
//!     .with_heartbeat_interval(Duration::from_secs(15))
//!     .with_max_reconnect_attempts(Some(10));
//!
//! let from_json = ClientOptions::from_json(r#"{
//!     "target": "ws://127.0.0.1:9000/feed",
//!     "request_timeout_ms": 2500
//! }"#)?;
//! ```
//!
//! # Defaults
//!
//! | Option | Default |
//! |--------|---------|
//! | `auto_connect` | `true` |
//! | `heartbeat_interval` | 30 s |
//! | `request_retry_delay` | 1 s |
//! | `request_timeout` | 10 s |
//! | `max_request_attempts` | 3 |
//! | `reconnect_base_delay` | 1 s |
//! | `reconnect_max_delay` | 60 s |
//! | `max_reconnect_attempts` | unbounded |
//! | `backpressure_threshold` | 1 MiB |
//! | `backpressure_poll_interval` | 100 ms |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::TransportOptions;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_NAME: &str = "client";
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_REQUEST_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
const DEFAULT_BACKPRESSURE_THRESHOLD: usize = 1024 * 1024;
const DEFAULT_BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// ClientOptions
// ============================================================================

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Address handed to the connector.
    pub target: String,

    /// Label attached to the client's tracing span.
    pub name: String,

    /// Connect as soon as the client is constructed.
    pub auto_connect: bool,

    /// Delay between heartbeat rounds.
    #[serde(rename = "heartbeat_interval_ms", with = "duration_ms")]
    pub heartbeat_interval: Duration,

    /// Delay before retrying a failed request attempt.
    #[serde(rename = "request_retry_delay_ms", with = "duration_ms")]
    pub request_retry_delay: Duration,

    /// Deadline for a single request attempt.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,

    /// Attempts per request before it fails.
    pub max_request_attempts: u32,

    /// Backoff base delay.
    #[serde(rename = "reconnect_base_delay_ms", with = "duration_ms")]
    pub reconnect_base_delay: Duration,

    /// Backoff ceiling.
    #[serde(rename = "reconnect_max_delay_ms", with = "duration_ms")]
    pub reconnect_max_delay: Duration,

    /// Reconnect cap; `None` is unbounded, `Some(0)` disables reconnection.
    pub max_reconnect_attempts: Option<u32>,

    /// Buffered bytes above which sends are postponed.
    pub backpressure_threshold: usize,

    /// Wait before re-checking a postponed send.
    #[serde(rename = "backpressure_poll_interval_ms", with = "duration_ms")]
    pub backpressure_poll_interval: Duration,

    /// Passed through to the connector.
    pub transport: TransportOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            target: String::new(),
            name: DEFAULT_NAME.to_string(),
            auto_connect: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_retry_delay: DEFAULT_REQUEST_RETRY_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_request_attempts: DEFAULT_MAX_REQUEST_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_reconnect_attempts: None,
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
            backpressure_poll_interval: DEFAULT_BACKPRESSURE_POLL_INTERVAL,
            transport: TransportOptions::default(),
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings for `target`.
    #[inline]
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    /// Parses options from JSON, merging them over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the tracing label.
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enables or disables connecting on construction.
    #[inline]
    #[must_use]
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Sets the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the request retry delay.
    #[inline]
    #[must_use]
    pub fn with_request_retry_delay(mut self, delay: Duration) -> Self {
        self.request_retry_delay = delay;
        self
    }

    /// Sets the per-attempt request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the attempts per request.
    #[inline]
    #[must_use]
    pub fn with_max_request_attempts(mut self, attempts: u32) -> Self {
        self.max_request_attempts = attempts;
        self
    }

    /// Sets the backoff base delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Sets the backoff ceiling.
    #[inline]
    #[must_use]
    pub fn with_reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Sets the reconnect cap.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the backpressure threshold in bytes.
    #[inline]
    #[must_use]
    pub fn with_backpressure_threshold(mut self, bytes: usize) -> Self {
        self.backpressure_threshold = bytes;
        self
    }

    /// Sets the backpressure poll interval.
    #[inline]
    #[must_use]
    pub fn with_backpressure_poll_interval(mut self, interval: Duration) -> Self {
        self.backpressure_poll_interval = interval;
        self
    }

    /// Sets the transport options.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientOptions {
    /// Returns `true` unless reconnection is disabled.
    #[inline]
    #[must_use]
    pub fn reconnect_enabled(&self) -> bool {
        self.max_reconnect_attempts != Some(0)
    }

    /// Validates the options and parses the target address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<Url> {
        if self.target.trim().is_empty() {
            return Err(Error::config("target address is required"));
        }
        if self.max_request_attempts == 0 {
            return Err(Error::config("max_request_attempts must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config("request_timeout must be greater than zero"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat_interval must be greater than zero"));
        }
        if self.backpressure_poll_interval.is_zero() {
            return Err(Error::config(
                "backpressure_poll_interval must be greater than zero",
            ));
        }
        if self.reconnect_base_delay.is_zero() {
            return Err(Error::config("reconnect_base_delay must be greater than zero"));
        }
        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(Error::config(
                "reconnect_max_delay must not be below reconnect_base_delay",
            ));
        }

        Ok(Url::parse(&self.target)?)
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

/// (De)serializes a [`Duration`] as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::new("ws://localhost:1");
        assert!(options.auto_connect);
        assert_eq!(options.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(options.request_retry_delay, Duration::from_secs(1));
        assert_eq!(options.request_timeout, Duration::from_secs(10));
        assert_eq!(options.max_request_attempts, 3);
        assert_eq!(options.reconnect_base_delay, Duration::from_secs(1));
        assert_eq!(options.reconnect_max_delay, Duration::from_secs(60));
        assert_eq!(options.max_reconnect_attempts, None);
        assert_eq!(options.backpressure_threshold, 1024 * 1024);
        assert!(options.reconnect_enabled());
    }

    #[test]
    fn test_builder_chain() {
        let options = ClientOptions::new("ws://localhost:1")
            .with_name("feed")
            .with_auto_connect(false)
            .with_request_timeout(Duration::from_millis(250))
            .with_max_reconnect_attempts(Some(0));

        assert_eq!(options.name, "feed");
        assert!(!options.auto_connect);
        assert_eq!(options.request_timeout, Duration::from_millis(250));
        assert!(!options.reconnect_enabled());
    }

    #[test]
    fn test_json_merges_over_defaults() {
        let options = ClientOptions::from_json(
            r#"{
                "target": "ws://localhost:9000",
                "request_timeout_ms": 2500,
                "max_reconnect_attempts": 4,
                "transport": { "connect_timeout_ms": 500 }
            }"#,
        )
        .expect("parse");

        assert_eq!(options.target, "ws://localhost:9000");
        assert_eq!(options.request_timeout, Duration::from_millis(2500));
        assert_eq!(options.max_reconnect_attempts, Some(4));
        assert_eq!(options.transport.connect_timeout, Duration::from_millis(500));
        assert_eq!(options.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(options.name, DEFAULT_NAME);
    }

    #[test]
    fn test_json_round_trip_keeps_millis() {
        let options = ClientOptions::new("ws://localhost:1")
            .with_heartbeat_interval(Duration::from_millis(1500));
        let json = serde_json::to_value(&options).expect("serialize");
        assert_eq!(json["heartbeat_interval_ms"], 1500);
    }

    #[test]
    fn test_malformed_json() {
        let err = ClientOptions::from_json("{").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_validate_valid() {
        let url = ClientOptions::new("ws://localhost:9000/feed")
            .validate()
            .expect("valid");
        assert_eq!(url.path(), "/feed");
    }

    #[test]
    fn test_validate_rejects_empty_target() {
        assert!(ClientOptions::default().validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let options = ClientOptions::new("ws://localhost:1").with_max_request_attempts(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_backpressure_poll() {
        let options = ClientOptions::new("ws://localhost:1")
            .with_backpressure_poll_interval(Duration::ZERO);
        let err = options.validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("backpressure_poll_interval"));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let options = ClientOptions::new("ws://localhost:1")
            .with_reconnect_base_delay(Duration::from_secs(5))
            .with_reconnect_max_delay(Duration::from_secs(1));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unparseable_target() {
        let err = ClientOptions::new("not a url").validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
