use std::time::Duration;

use rand::Rng;

/// Maximum number of reconnect attempts per failure episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryLimit {
    /// At most this many attempts.
    Finite(u32),
    /// Retry forever.
    Unlimited,
}

impl RetryLimit {
    /// Returns `true` if another attempt is permitted after `attempts_made`.
    pub fn allows(&self, attempts_made: u32) -> bool {
        match self {
            Self::Finite(max) => attempts_made < *max,
            Self::Unlimited => true,
        }
    }

    /// Attempts left after `attempts_made`.
    pub fn remaining(&self, attempts_made: u32) -> RetryLimit {
        match self {
            Self::Finite(max) => Self::Finite(max.saturating_sub(attempts_made)),
            Self::Unlimited => Self::Unlimited,
        }
    }
}

impl Default for RetryLimit {
    fn default() -> Self {
        Self::Finite(5)
    }
}

impl From<Option<u32>> for RetryLimit {
    fn from(value: Option<u32>) -> Self {
        value.map_or(Self::Unlimited, Self::Finite)
    }
}

/// Exponential reconnect/backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first delayed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub factor: f64,
    /// Random jitter factor (0.0–1.0).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay.is_zero() {
            return Err("Max reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

pub(crate) fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let initial = config.initial_delay.as_secs_f64();
    let max = config.max_delay.as_secs_f64();
    let exponent = config.factor.powf(f64::from(attempt.saturating_sub(1)));
    let base = (initial * exponent).min(max);

    if config.jitter == 0.0 {
        return Duration::from_secs_f64(base);
    }

    let mut rng = rand::rng();
    let randomized = rng.random_range(0.0..=base);
    let blended = base * (1.0 - config.jitter) + randomized * config.jitter;
    Duration::from_secs_f64(blended)
}

/// Delay policy between retry attempts.
///
/// `attempt` passed to [`BackoffPolicy::delay`] is 1-based: the first retry
/// of an episode runs immediately, the n-th delayed retry waits `delay(n)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackoffPolicy {
    /// `min(n² × step, max)`.
    Quadratic {
        /// Unit multiplied by the squared attempt number.
        step: Duration,
        /// Cap.
        max: Duration,
    },
    /// `min(initial × factor^(n-1), max)` with optional jitter.
    Exponential(BackoffConfig),
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Quadratic {
            step: Duration::from_secs(1),
            max: Duration::from_secs(25),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given (1-based) attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Quadratic { step, max } => step
                .saturating_mul(attempt.saturating_mul(attempt))
                .min(max),
            Self::Exponential(config) => calculate_backoff(config, attempt),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            Self::Quadratic { step, max } => {
                if step.is_zero() {
                    return Err("Backoff step must be > 0".to_string());
                }
                if max < step {
                    return Err("Max reconnect delay must be >= backoff step".to_string());
                }
                Ok(())
            }
            Self::Exponential(config) => config.validate(),
        }
    }
}

/// Attempts made in the current failure episode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RetryState {
    attempts_made: u32,
}

impl RetryState {
    pub(crate) fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Consumes one attempt and returns its zero-based index.
    pub(crate) fn record_attempt(&mut self) -> u32 {
        let index = self.attempts_made;
        self.attempts_made = self.attempts_made.saturating_add(1);
        index
    }

    pub(crate) fn reset(&mut self) {
        self.attempts_made = 0;
    }

    pub(crate) fn next_delay(&self, policy: &BackoffPolicy) -> Duration {
        policy.delay(self.attempts_made)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_backoff_values() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u128> = (1..=7).map(|n| policy.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 4000, 9000, 16000, 25000, 25000, 25000]);
    }

    #[test]
    fn test_quadratic_backoff_is_monotonic_and_capped() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for n in 1..200 {
            let delay = policy.delay(n);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(25));
            previous = delay;
        }
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(25));
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let policy = BackoffPolicy::Exponential(BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
            jitter: 0.0,
        });
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
    }

    #[test]
    fn test_exponential_backoff_jitter_stays_below_base() {
        let config = BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: 1.0,
        };
        for _ in 0..50 {
            assert!(calculate_backoff(config, 2) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_backoff_validation() {
        assert!(BackoffPolicy::default().validate().is_ok());
        let zero_step = BackoffPolicy::Quadratic {
            step: Duration::ZERO,
            max: Duration::from_secs(1),
        };
        assert_eq!(
            zero_step.validate().expect_err("should fail"),
            "Backoff step must be > 0"
        );
        let bad_factor = BackoffPolicy::Exponential(BackoffConfig {
            factor: 0.5,
            ..BackoffConfig::default()
        });
        assert_eq!(
            bad_factor.validate().expect_err("should fail"),
            "Backoff factor must be >= 1.0"
        );
    }

    #[test]
    fn test_retry_limit_finite() {
        let limit = RetryLimit::Finite(2);
        assert!(limit.allows(0));
        assert!(limit.allows(1));
        assert!(!limit.allows(2));
        assert_eq!(limit.remaining(1), RetryLimit::Finite(1));
        assert_eq!(limit.remaining(5), RetryLimit::Finite(0));
        assert!(!RetryLimit::Finite(0).allows(0));
    }

    #[test]
    fn test_retry_limit_unlimited() {
        let limit = RetryLimit::Unlimited;
        assert!(limit.allows(u32::MAX));
        assert_eq!(limit.remaining(10), RetryLimit::Unlimited);
        assert_eq!(RetryLimit::from(None), RetryLimit::Unlimited);
        assert_eq!(RetryLimit::from(Some(3)), RetryLimit::Finite(3));
    }

    #[test]
    fn test_retry_state() {
        let mut state = RetryState::default();
        assert_eq!(state.record_attempt(), 0);
        assert_eq!(state.record_attempt(), 1);
        assert_eq!(state.attempts_made(), 2);
        assert_eq!(
            state.next_delay(&BackoffPolicy::default()),
            Duration::from_secs(4)
        );
        state.reset();
        assert_eq!(state.attempts_made(), 0);
    }
}
