//! Convergence tracking across consecutive health observations.

use std::time::Duration;

use shipwright_core::Backoff;
use tracing::{debug, warn};

use crate::reporter::HealthSnapshot;

/// Matching snapshots required in a row before declaring convergence.
pub const REQUIRED_MATCHES: u32 = 2;

/// What the poll loop should do after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    /// Live state matched desired state long enough.
    Converged,
    /// Keep polling after `next_interval()`.
    Waiting,
    /// Too many consecutive `Unavailable` answers; treat as a timeout.
    Escalate,
}

/// Tracks consecutive poll results for one converging attempt.
#[derive(Debug)]
pub struct ConvergenceTracker {
    consecutive_matches: u32,
    consecutive_unavailable: u32,
    unavailable_threshold: u32,
    /// Backoff step; 0 means the base interval.
    step: u32,
    backoff: Backoff,
    polls: u32,
}

impl ConvergenceTracker {
    pub fn new(backoff: Backoff, unavailable_threshold: u32) -> Self {
        Self {
            consecutive_matches: 0,
            consecutive_unavailable: 0,
            unavailable_threshold: unavailable_threshold.max(1),
            step: 0,
            backoff,
            polls: 0,
        }
    }

    /// Record a snapshot and decide what happens next.
    pub fn record_snapshot(&mut self, snapshot: &HealthSnapshot) -> PollVerdict {
        self.polls += 1;
        self.consecutive_unavailable = 0;

        if snapshot.is_match() {
            self.consecutive_matches += 1;
            self.step = 0;
            debug!(
                service = %snapshot.service_name,
                healthy = snapshot.healthy_replicas,
                desired = snapshot.desired_replicas,
                matches = self.consecutive_matches,
                "snapshot matches desired state"
            );
            if self.consecutive_matches >= REQUIRED_MATCHES {
                return PollVerdict::Converged;
            }
        } else {
            self.consecutive_matches = 0;
            self.step = self.step.saturating_add(1);
            debug!(
                service = %snapshot.service_name,
                healthy = snapshot.healthy_replicas,
                desired = snapshot.desired_replicas,
                "fleet not yet converged"
            );
        }
        PollVerdict::Waiting
    }

    /// Record an `Unavailable` answer.
    ///
    /// Breaks the match streak: convergence needs consecutive snapshots.
    pub fn record_unavailable(&mut self) -> PollVerdict {
        self.polls += 1;
        self.consecutive_matches = 0;
        self.consecutive_unavailable += 1;
        self.step = self.step.saturating_add(1);

        if self.consecutive_unavailable >= self.unavailable_threshold {
            warn!(
                consecutive = self.consecutive_unavailable,
                threshold = self.unavailable_threshold,
                "health reporter unavailable too long"
            );
            return PollVerdict::Escalate;
        }
        PollVerdict::Waiting
    }

    /// Interval to sleep before the next poll.
    pub fn next_interval(&self) -> Duration {
        self.backoff.jittered(self.step)
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn consecutive_unavailable(&self) -> u32 {
        self.consecutive_unavailable
    }
}
