//! Exponential backoff with optional jitter.
//!
//! Shared by registry retries, platform retries, and the convergence poll
//! loop. The un-jittered delay doubles from `base` and is capped at `max`;
//! jitter only ever shortens a delay, so the cap holds.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Fraction (0.0–1.0) of each delay that may be randomly shaved off.
    pub jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(multiplier).min(self.max)
    }

    /// Delay before retry number `attempt`, with jitter applied.
    pub fn jittered(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.delay(attempt))
    }

    /// Shave a random fraction (bounded by `jitter`) off `delay`.
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 - self.jitter * rand::random::<f64>();
        delay.mul_f64(factor)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(8)).with_jitter(0.2)
    }
}

/// Bounded retry: at most `max_attempts` calls in total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether another call is allowed after `attempts` calls have failed.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Backoff::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let b = Backoff::new(Duration::from_secs(5), Duration::from_secs(30));
        assert_eq!(b.delay(0), Duration::from_secs(5));
        assert_eq!(b.delay(1), Duration::from_secs(10));
        assert_eq!(b.delay(2), Duration::from_secs(20));
        assert_eq!(b.delay(3), Duration::from_secs(30));
        assert_eq!(b.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn jitter_never_exceeds_delay() {
        let b = Backoff::new(Duration::from_secs(5), Duration::from_secs(30)).with_jitter(0.5);
        for attempt in 0..6 {
            let d = b.jittered(attempt);
            assert!(d <= b.delay(attempt));
            assert!(d >= b.delay(attempt).mul_f64(0.5));
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let b = Backoff::new(Duration::from_millis(10), Duration::from_millis(40));
        assert_eq!(b.jittered(1), Duration::from_millis(20));
    }

    #[test]
    fn max_below_base_is_raised() {
        let b = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(b.delay(3), Duration::from_secs(2));
    }

    #[test]
    fn retry_policy_counts_total_attempts() {
        let p = RetryPolicy::new(3, Backoff::default());
        assert!(p.allows_retry(1));
        assert!(p.allows_retry(2));
        assert!(!p.allows_retry(3));
        assert_eq!(RetryPolicy::new(0, Backoff::default()).max_attempts, 1);
    }
}
