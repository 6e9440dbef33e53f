//! Stream configuration.

use std::time::Duration;

use bytes::Bytes;

use crate::reconnect::{BackoffPolicy, RetryLimit};

/// Heartbeat chunk sent by the remote endpoint to prove liveness.
pub const DEFAULT_KEEP_ALIVE_MARKER: &[u8] = b"\r\n";

/// Whether a `reconnect()` invoked by the caller starts a fresh retry budget.
///
/// Retries started by the stream itself never reset the budget; only
/// `connect()` always does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ManualReconnectPolicy {
    /// A caller-initiated reconnect resets the attempt counter.
    #[default]
    ResetBudget,
    /// A caller-initiated reconnect keeps counting against the current budget;
    /// once it is spent, `reconnect()` is rejected until the next `connect()`.
    KeepBudget,
}

/// Configuration for a resilient stream.
///
/// Start from [`StreamConfig::new`] and chain setters; the stream checks the
/// result with [`StreamConfig::validate`] before applying it.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Retry after a connection failure.
    pub auto_reconnect: bool,
    /// Retry budget per failure episode.
    pub max_retries: RetryLimit,
    /// Watchdog interval (`None` disables silent-failure detection).
    pub keep_alive_timeout: Option<Duration>,
    /// Reserved heartbeat chunk.
    pub keep_alive_marker: Bytes,
    /// Delay policy between retries.
    pub backoff: BackoffPolicy,
    /// Budget handling for caller-initiated reconnects.
    pub manual_reconnect: ManualReconnectPolicy,
    /// Capacity of the command channel.
    pub command_channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            max_retries: RetryLimit::default(),
            keep_alive_timeout: Some(Duration::from_secs(120)),
            keep_alive_marker: Bytes::from_static(DEFAULT_KEEP_ALIVE_MARKER),
            backoff: BackoffPolicy::default(),
            manual_reconnect: ManualReconnectPolicy::default(),
            command_channel_capacity: 64,
        }
    }
}

impl StreamConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable automatic reconnection.
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn max_retries(mut self, limit: RetryLimit) -> Self {
        self.max_retries = limit;
        self
    }

    /// Set the watchdog interval.
    #[must_use]
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = Some(timeout);
        self
    }

    /// Disable the watchdog.
    #[must_use]
    pub fn disable_keep_alive(mut self) -> Self {
        self.keep_alive_timeout = None;
        self
    }

    /// Set the heartbeat chunk.
    #[must_use]
    pub fn keep_alive_marker(mut self, marker: impl Into<Bytes>) -> Self {
        self.keep_alive_marker = marker.into();
        self
    }

    /// Set the backoff policy.
    #[must_use]
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Set the manual reconnect budget policy.
    #[must_use]
    pub fn manual_reconnect(mut self, policy: ManualReconnectPolicy) -> Self {
        self.manual_reconnect = policy;
        self
    }

    /// Set the command channel capacity.
    #[must_use]
    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.keep_alive_timeout.is_some_and(|t| t.is_zero()) {
            return Err("Keep-alive timeout must be > 0".to_string());
        }
        if self.keep_alive_marker.is_empty() {
            return Err("Keep-alive marker cannot be empty".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        self.backoff.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::BackoffConfig;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert!(!config.auto_reconnect);
        assert_eq!(config.max_retries, RetryLimit::Finite(5));
        assert_eq!(config.keep_alive_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.keep_alive_marker.as_ref(), b"\r\n");
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.manual_reconnect, ManualReconnectPolicy::ResetBudget);
        assert_eq!(config.command_channel_capacity, 64);
    }

    #[test]
    fn test_builder_pattern() {
        let config = StreamConfig::new()
            .auto_reconnect(true)
            .max_retries(RetryLimit::Unlimited)
            .keep_alive_timeout(Duration::from_secs(30))
            .keep_alive_marker(&b"\n"[..])
            .manual_reconnect(ManualReconnectPolicy::KeepBudget)
            .command_channel_capacity(8);

        assert!(config.auto_reconnect);
        assert_eq!(config.max_retries, RetryLimit::Unlimited);
        assert_eq!(config.keep_alive_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.keep_alive_marker.as_ref(), b"\n");
        assert_eq!(config.manual_reconnect, ManualReconnectPolicy::KeepBudget);
        assert_eq!(config.command_channel_capacity, 8);
    }

    #[test]
    fn test_disable_keep_alive() {
        let config = StreamConfig::new().disable_keep_alive();
        assert!(config.keep_alive_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_keep_alive() {
        let config = StreamConfig::new().keep_alive_timeout(Duration::ZERO);
        assert_eq!(
            config.validate().expect_err("should fail"),
            "Keep-alive timeout must be > 0"
        );
    }

    #[test]
    fn test_validation_empty_marker() {
        let config = StreamConfig::new().keep_alive_marker(Bytes::new());
        assert_eq!(
            config.validate().expect_err("should fail"),
            "Keep-alive marker cannot be empty"
        );
    }

    #[test]
    fn test_validation_zero_command_channel() {
        let config = StreamConfig::new().command_channel_capacity(0);
        assert_eq!(
            config.validate().expect_err("should fail"),
            "Command channel capacity must be > 0"
        );
    }

    #[test]
    fn test_validation_invalid_backoff() {
        let config = StreamConfig::new().backoff(BackoffPolicy::Exponential(BackoffConfig {
            jitter: 1.5,
            ..BackoffConfig::default()
        }));
        assert_eq!(
            config.validate().expect_err("should fail"),
            "Jitter must be between 0.0 and 1.0"
        );
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(StreamConfig::default().validate().is_ok());
    }
}
