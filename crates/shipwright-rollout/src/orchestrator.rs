//! Deployment orchestrator: drives one service from its live state to a
//! desired-state descriptor.
//!
//! ```text
//! Pending ──validate──► submit ──► Converging ──2 matching snapshots──► Converged
//!    │                    │            │
//!    └─ invalid ──► Failed◄┘ permanent  └─ timeout / cancel / platform error ──► Failed
//!                                                                                  │
//!                                   rollback enabled + last converged descriptor ──┘
//!                                                 │
//!                                   new Rollback attempt ──converges──► RolledBack
//! ```
//!
//! Every status change is written to the attempt log before the next remote
//! call. Requests for the same service are serialized FIFO; different
//! services run concurrently.

use std::sync::Arc;
use std::time::Duration;

use shipwright_core::{DesiredStateDescriptor, MAX_DURATION};
use shipwright_health::{ConvergenceTracker, HealthError, HealthReporter, PollVerdict};
use shipwright_platform::{Platform, PlatformError, SecretProvider, Submission};
use shipwright_registry::RegistryClient;
use shipwright_state::{
    AttemptError, AttemptKind, AttemptStatus, DeploymentAttempt, StateStore,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::locks::ServiceLocks;
use crate::policy::RolloutPolicy;
use crate::validate::Validator;

/// Result of one `deploy` call.
#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    /// `Converged`, `Failed`, or `RolledBack`.
    pub status: AttemptStatus,
    /// The attempt for the requested revision.
    pub attempt: DeploymentAttempt,
    /// The automatic rollback, when one ran.
    pub rollback: Option<DeploymentAttempt>,
}

impl DeploymentOutcome {
    pub fn is_converged(&self) -> bool {
        self.status == AttemptStatus::Converged
    }

    /// Why the requested revision did not converge.
    pub fn error(&self) -> Option<&AttemptError> {
        self.attempt.last_error.as_ref()
    }
}

/// How driving one descriptor ended.
enum Drive {
    Converged,
    Failed {
        error: AttemptError,
        /// The platform accepted the submission, so live state may have moved.
        submitted: bool,
    },
}

/// The reconciliation engine. Cheap to clone; clones share locks and state.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<dyn RegistryClient>,
    platform: Arc<dyn Platform>,
    health: Arc<dyn HealthReporter>,
    secrets: Arc<dyn SecretProvider>,
    state: StateStore,
    policy: RolloutPolicy,
    locks: Arc<ServiceLocks>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        platform: Arc<dyn Platform>,
        health: Arc<dyn HealthReporter>,
        secrets: Arc<dyn SecretProvider>,
        state: StateStore,
        policy: RolloutPolicy,
    ) -> Self {
        Self {
            registry,
            platform,
            health,
            secrets,
            state,
            policy,
            locks: Arc::new(ServiceLocks::new()),
        }
    }

    pub fn policy(&self) -> &RolloutPolicy {
        &self.policy
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Attempt history for `service`, oldest first.
    pub fn history(&self, service: &str) -> OrchestratorResult<Vec<DeploymentAttempt>> {
        Ok(self.state.list_attempts(service)?)
    }

    /// Deploy `descriptor`, waiting behind any attempt already running for
    /// the same service.
    ///
    /// Setting `cancel` to `true` stops a converging attempt within one poll
    /// interval. Rollbacks ignore it.
    pub async fn deploy(
        &self,
        descriptor: DesiredStateDescriptor,
        cancel: watch::Receiver<bool>,
    ) -> OrchestratorResult<DeploymentOutcome> {
        let _guard = self.locks.acquire(&descriptor.service_name).await;
        self.run(descriptor, cancel).await
    }

    /// Like [`deploy`](Self::deploy) but fails with `Busy` instead of waiting.
    pub async fn try_deploy(
        &self,
        descriptor: DesiredStateDescriptor,
        cancel: watch::Receiver<bool>,
    ) -> OrchestratorResult<DeploymentOutcome> {
        let Some(_guard) = self.locks.try_acquire(&descriptor.service_name) else {
            return Err(OrchestratorError::Busy(descriptor.service_name));
        };
        self.run(descriptor, cancel).await
    }

    async fn run(
        &self,
        descriptor: DesiredStateDescriptor,
        cancel: watch::Receiver<bool>,
    ) -> OrchestratorResult<DeploymentOutcome> {
        let service = descriptor.service_name.clone();
        let revision = descriptor.revision;

        let mut attempt = DeploymentAttempt::new(
            &service,
            revision,
            &descriptor.image.to_string(),
            AttemptKind::Deploy,
        );
        self.state.append_attempt(&mut attempt)?;
        info!(service = %service, revision, attempt = attempt.id, "deployment pending");

        let validator = Validator {
            registry: self.registry.as_ref(),
            secrets: self.secrets.as_ref(),
            limits: &self.policy.limits,
        };
        let submitted = self.state.submitted_descriptor(&service)?;
        let descriptor = match validator.validate(&descriptor, submitted.as_ref()).await {
            Ok(validated) => validated,
            Err(problems) => {
                attempt.finish(
                    AttemptStatus::Failed,
                    Some(AttemptError::Validation {
                        problems: problems.clone(),
                    }),
                );
                self.state.update_attempt(&attempt)?;
                error!(
                    service = %service,
                    revision,
                    attempt = attempt.id,
                    problems = problems.len(),
                    "descriptor rejected by validation"
                );
                return Err(OrchestratorError::Validation {
                    service,
                    revision,
                    problems,
                });
            }
        };
        attempt.image = descriptor.image.to_string();

        let drive = self
            .drive(&mut attempt, &descriptor, Some(cancel), self.policy.convergence_timeout)
            .await?;

        let (error, submitted) = match drive {
            Drive::Converged => {
                attempt.finish(AttemptStatus::Converged, None);
                self.state.update_attempt(&attempt)?;
                self.state.put_converged(&descriptor)?;
                info!(
                    service = %service,
                    revision,
                    attempt = attempt.id,
                    polls = attempt.polls,
                    "deployment converged"
                );
                return Ok(DeploymentOutcome {
                    status: AttemptStatus::Converged,
                    attempt,
                    rollback: None,
                });
            }
            Drive::Failed { error, submitted } => (error, submitted),
        };

        attempt.finish(AttemptStatus::Failed, Some(error.clone()));
        self.state.update_attempt(&attempt)?;
        error!(
            service = %service,
            revision,
            attempt = attempt.id,
            error = %error,
            "deployment failed"
        );

        if !(submitted && self.policy.rollback_enabled) {
            return Ok(DeploymentOutcome {
                status: AttemptStatus::Failed,
                attempt,
                rollback: None,
            });
        }

        let Some(last_good) = self.state.get_converged(&service)? else {
            warn!(service = %service, "no converged revision to roll back to");
            return Ok(DeploymentOutcome {
                status: AttemptStatus::Failed,
                attempt,
                rollback: None,
            });
        };

        let rollback = self.rollback(&attempt, last_good).await?;
        let status = if rollback.status == AttemptStatus::RolledBack {
            AttemptStatus::RolledBack
        } else {
            AttemptStatus::Failed
        };
        Ok(DeploymentOutcome {
            status,
            attempt,
            rollback: Some(rollback),
        })
    }

    /// Resubmit the last converged descriptor under a new revision.
    async fn rollback(
        &self,
        failed: &DeploymentAttempt,
        last_good: DesiredStateDescriptor,
    ) -> OrchestratorResult<DeploymentAttempt> {
        let service = failed.service_name.as_str();
        let highest = self.state.highest_revision(service)?.unwrap_or(0);
        let revision = highest.max(failed.target_revision) + 1;
        let descriptor = last_good.with_revision(revision);

        let mut attempt = DeploymentAttempt::new(
            service,
            revision,
            &descriptor.image.to_string(),
            AttemptKind::Rollback {
                from_revision: failed.target_revision,
                restored_revision: last_good.revision,
            },
        );
        self.state.append_attempt(&mut attempt)?;
        warn!(
            service = %service,
            from_revision = failed.target_revision,
            restored_revision = last_good.revision,
            revision,
            attempt = attempt.id,
            "rolling back"
        );

        match self
            .drive(&mut attempt, &descriptor, None, self.policy.rollback_timeout)
            .await?
        {
            Drive::Converged => {
                attempt.finish(AttemptStatus::RolledBack, None);
                self.state.update_attempt(&attempt)?;
                self.state.put_converged(&descriptor)?;
                info!(service = %service, revision, attempt = attempt.id, "rollback converged");
            }
            Drive::Failed { error, .. } => {
                attempt.finish(
                    AttemptStatus::Failed,
                    Some(AttemptError::RollbackFailed {
                        message: error.to_string(),
                    }),
                );
                self.state.update_attempt(&attempt)?;
                error!(service = %service, revision, attempt = attempt.id, error = %error, "rollback failed");
            }
        }
        Ok(attempt)
    }

    /// Submit `descriptor`, then poll until it converges or fails.
    async fn drive(
        &self,
        attempt: &mut DeploymentAttempt,
        descriptor: &DesiredStateDescriptor,
        mut cancel: Option<watch::Receiver<bool>>,
        timeout: Duration,
    ) -> OrchestratorResult<Drive> {
        if is_cancelled(&cancel) {
            return Ok(Drive::Failed {
                error: AttemptError::Cancelled,
                submitted: false,
            });
        }

        let service = descriptor.service_name.as_str();
        self.state.record_submission(descriptor)?;
        match self.submit_with_retry(descriptor).await {
            Ok(Submission::Applied) => {
                info!(service = %service, revision = descriptor.revision, "desired state submitted");
            }
            Ok(Submission::AlreadyApplied) => {
                info!(service = %service, revision = descriptor.revision, "revision already applied");
            }
            Err(e) => {
                return Ok(Drive::Failed {
                    error: attempt_error(&e),
                    submitted: false,
                });
            }
        }

        attempt.status = AttemptStatus::Converging;
        self.state.update_attempt(attempt)?;
        info!(service = %service, revision = descriptor.revision, attempt = attempt.id, "converging");

        let deadline = Instant::now() + timeout.min(MAX_DURATION);
        let mut tracker = ConvergenceTracker::new(self.policy.poll, self.policy.unavailable_threshold);

        loop {
            if is_cancelled(&cancel) {
                return Ok(Drive::Failed {
                    error: AttemptError::Cancelled,
                    submitted: true,
                });
            }

            let poll = tokio::time::timeout(self.policy.call_timeout, self.health.snapshot(service));
            let result = tokio::select! {
                result = tokio::time::timeout_at(deadline, poll) => result,
                _ = cancelled(&mut cancel) => {
                    debug!(service = %service, "cancellation requested during health poll");
                    return Ok(Drive::Failed {
                        error: AttemptError::Cancelled,
                        submitted: true,
                    });
                }
            };
            let verdict = match result {
                Err(_) => PollVerdict::Escalate,
                Ok(Err(_)) => {
                    warn!(
                        service = %service,
                        timeout_ms = self.policy.call_timeout.as_millis() as u64,
                        "health poll timed out"
                    );
                    tracker.record_unavailable()
                }
                Ok(Ok(Ok(snapshot))) => {
                    if snapshot.desired_replicas != descriptor.replicas {
                        debug!(
                            service = %service,
                            reported = snapshot.desired_replicas,
                            requested = descriptor.replicas,
                            "platform reports a different desired replica count"
                        );
                    }
                    tracker.record_snapshot(&snapshot)
                }
                Ok(Ok(Err(HealthError::Unavailable(reason)))) => {
                    warn!(service = %service, %reason, "health reporter unavailable");
                    tracker.record_unavailable()
                }
                Ok(Ok(Err(HealthError::Rejected(reason)))) => {
                    attempt.polls = tracker.polls() + 1;
                    return Ok(Drive::Failed {
                        error: AttemptError::Platform { message: reason },
                        submitted: true,
                    });
                }
            };
            attempt.polls = tracker.polls();

            match verdict {
                PollVerdict::Converged => return Ok(Drive::Converged),
                PollVerdict::Escalate => {
                    return Ok(Drive::Failed {
                        error: AttemptError::ConvergenceTimeout,
                        submitted: true,
                    });
                }
                PollVerdict::Waiting => {}
            }

            let wake = (Instant::now() + tracker.next_interval()).min(deadline);
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {
                    if Instant::now() >= deadline {
                        return Ok(Drive::Failed {
                            error: AttemptError::ConvergenceTimeout,
                            submitted: true,
                        });
                    }
                }
                _ = cancelled(&mut cancel) => {
                    debug!(service = %service, "cancellation requested while converging");
                }
            }
        }
    }

    /// Submit with bounded retries for transient errors.
    async fn submit_with_retry(&self, descriptor: &DesiredStateDescriptor) -> Result<Submission, PlatformError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.policy.call_timeout, self.platform.submit(descriptor)).await {
                Ok(result) => result,
                Err(_) => Err(PlatformError::Timeout(format!(
                    "submission exceeded {:?}",
                    self.policy.call_timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && self.policy.retry.allows_retry(attempts) => {
                    let delay = self.policy.retry.backoff.jittered(attempts - 1);
                    warn!(
                        service = %descriptor.service_name,
                        revision = descriptor.revision,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

fn attempt_error(e: &PlatformError) -> AttemptError {
    match e {
        PlatformError::Unauthorized(message) => AttemptError::Unauthorized {
            message: message.clone(),
        },
        other => AttemptError::Platform {
            message: other.to_string(),
        },
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Resolves once cancellation is signalled; never if there is no signal or
/// its sender is gone.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        let fired = rx.wait_for(|c| *c).await.is_ok();
        if fired {
            return;
        }
    }
    std::future::pending::<()>().await
}
