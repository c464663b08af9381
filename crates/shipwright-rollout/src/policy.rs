//! Rollout policy: poll cadence, timeouts, retries, rollback.

use std::time::Duration;

use shipwright_core::{Backoff, CoreResult, PlatformLimits, RetryPolicy, ShipwrightConfig};

/// Knobs for one orchestrator instance.
#[derive(Debug, Clone, Copy)]
pub struct RolloutPolicy {
    /// Poll interval: base doubling to a cap, jittered.
    pub poll: Backoff,
    /// How long a deployment may stay `Converging`.
    pub convergence_timeout: Duration,
    /// How long a rollback may stay `Converging`.
    pub rollback_timeout: Duration,
    /// Consecutive `Unavailable` answers before giving up.
    pub unavailable_threshold: u32,
    /// Retries for transient platform submission errors.
    pub retry: RetryPolicy,
    /// Bound on each platform submission.
    pub call_timeout: Duration,
    pub rollback_enabled: bool,
    pub limits: PlatformLimits,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            poll: Backoff::new(Duration::from_secs(5), Duration::from_secs(30)).with_jitter(0.2),
            convergence_timeout: Duration::from_secs(600),
            rollback_timeout: Duration::from_secs(600),
            unavailable_threshold: 5,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(10),
            rollback_enabled: false,
            limits: PlatformLimits::default(),
        }
    }
}

impl RolloutPolicy {
    pub fn from_config(config: &ShipwrightConfig) -> CoreResult<Self> {
        let timeout = config.poll_timeout()?;
        Ok(Self {
            poll: config.poll_backoff()?,
            convergence_timeout: timeout,
            rollback_timeout: timeout,
            unavailable_threshold: config.poll.unavailable_threshold,
            retry: config.retry_policy()?,
            call_timeout: config.platform_timeout()?,
            rollback_enabled: config.rollback.enabled,
            limits: config.limits,
        })
    }

    pub fn with_convergence_timeout(mut self, timeout: Duration) -> Self {
        self.convergence_timeout = timeout;
        self
    }

    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.rollback_enabled = enabled;
        self
    }
}
