//! Reconnect backoff policy.
//!
//! The connection kernel asks for a delay after every failed connection
//! attempt. Delays start at the configured minimum and double until they
//! reach the configured maximum:
//!
//! ```text
//! delay[n] = min(min_delay * 2^(n-1), max_delay)
//! ```
//!
//! With the shadow client defaults (1s, 32s) the schedule is
//! 1, 2, 4, 8, 16, 32, 32, ... seconds, and the kernel gives up after the
//! configured attempt cap (20 by default). A successful CONNACK resets the
//! schedule.

use std::time::Duration;

use thiserror::Error;

use crate::config::Config;

/// Multiplier used when the policy is derived from [`Config`].
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Error type for backoff exhaustion.
#[derive(Debug, Error)]
pub enum BackoffError {
    /// The attempt cap was reached. Carries the cap that was in effect.
    #[error("Maximum number of reconnect attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

/// Exponential backoff controller for reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    /// Creates a policy with the given bounds, growth factor and attempt cap.
    ///
    /// # Arguments
    ///
    /// * `initial` - Delay before the first retry.
    /// * `max` - Upper bound for any single delay.
    /// * `multiplier` - Growth factor applied after every attempt.
    /// * `max_attempts` - Attempts allowed before [`Backoff::next_sleep`] fails.
    pub fn new(initial: Duration, max: Duration, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier,
            attempt: 0,
            max_attempts,
        }
    }

    /// Builds the policy described by the transport configuration.
    ///
    /// `max_reconnect_attempts = 0` leaves the cap unlimited.
    pub fn from_config(config: &Config) -> Self {
        let max_attempts = match config.max_reconnect_attempts {
            0 => u32::MAX,
            n => n,
        };
        Self::new(
            Duration::from_secs(config.reconnect_min_delay),
            Duration::from_secs(config.reconnect_max_delay),
            DEFAULT_MULTIPLIER,
            max_attempts,
        )
    }

    /// Restarts the schedule from the minimum delay.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// schedule.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::MaxAttemptLimitError`] once the attempt cap is
    /// exceeded. The error repeats until [`Backoff::reset`] is called.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt = self.attempt.saturating_add(1);

        if self.attempt > self.max_attempts {
            return Err(BackoffError::MaxAttemptLimitError(self.max_attempts));
        }

        let sleep = self.current_delay;

        let next = Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier);
        self.current_delay = next.min(self.max_delay);

        Ok(sleep)
    }

    /// Attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    /// 1s doubling up to 32s, capped at 20 attempts.
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(32),
            DEFAULT_MULTIPLIER,
            20,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles_up_to_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_sleep().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 32, 32]);
    }

    #[test]
    fn test_default_gives_up_after_twenty_attempts() {
        let mut backoff = Backoff::default();
        for _ in 0..20 {
            assert!(backoff.next_sleep().is_ok());
        }
        match backoff.next_sleep() {
            Err(BackoffError::MaxAttemptLimitError(max)) => assert_eq!(max, 20),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = Backoff::default();
        backoff.next_sleep().unwrap();
        backoff.next_sleep().unwrap();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_config_uses_bounds_and_cap() {
        let config = Config {
            reconnect_min_delay: 2,
            reconnect_max_delay: 8,
            max_reconnect_attempts: 3,
            ..Default::default()
        };
        let mut backoff = Backoff::from_config(&config);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(4));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(8));
        assert!(matches!(
            backoff.next_sleep(),
            Err(BackoffError::MaxAttemptLimitError(3))
        ));
    }

    #[test]
    fn test_from_config_zero_attempts_is_unlimited() {
        let config = Config {
            max_reconnect_attempts: 0,
            ..Default::default()
        };
        let mut backoff = Backoff::from_config(&config);
        for _ in 0..100 {
            assert!(backoff.next_sleep().is_ok());
        }
    }
}
