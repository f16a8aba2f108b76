//! Retry policy for long-lived connections.
//!
//! The policy only answers "how long until the next attempt, if any"; the
//! caller owns the loop and the timer.

use rand::Rng;
use std::time::Duration;

/// Delay schedule for reconnect attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt. `1.0` yields a fixed delay.
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 disables it).
    pub jitter: f64,
    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    /// Fixed five second delay, no jitter, unbounded attempts.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// Same delay before every attempt, forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    /// Exponential backoff between `initial` and `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            backoff_multiplier: 2.0,
            jitter: 0.25,
            max_attempts: None,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        Some(self.backoff_duration(attempt.saturating_sub(1)))
    }

    fn backoff_duration(&self, exponent: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(exponent.min(32) as i32);
        let capped_ms = base.min(self.max_delay.as_millis() as f64).max(0.0) as u64;

        let mut duration = Duration::from_millis(capped_ms);

        if self.jitter > 0.0 {
            let extra = (capped_ms as f64 * self.jitter * rand::thread_rng().gen_range(0.0..1.0)) as u64;
            duration += Duration::from_millis(extra);
        }

        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fixed_five_seconds_forever() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(10_000), Some(Duration::from_secs(5)));
        assert!(policy.max_attempts.is_none());
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(0.0);

        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(10), Some(Duration::from_secs(1)));
    }

    #[test]
    fn max_attempts_stops_retrying() {
        let policy = RetryPolicy::fixed(Duration::from_millis(10)).with_max_attempts(2);

        assert!(policy.next_delay(1).is_some());
        assert!(policy.next_delay(2).is_some());
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1000)).with_jitter(0.5);

        for attempt in 1..50 {
            let delay = policy.next_delay(attempt).unwrap();
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }
}
