//! The desired-state submission contract.

use shipwright_core::{BoxFuture, DesiredStateDescriptor};

use crate::error::PlatformResult;

/// What the platform did with a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A new revision was accepted and replacement tasks scheduled.
    Applied,
    /// This revision was already the desired state; nothing changed.
    AlreadyApplied,
}

/// The orchestration platform, as seen by the orchestrator.
///
/// `submit` must be safe to retry: every submission carries the descriptor's
/// revision and the platform no-ops a revision it has already applied.
pub trait Platform: Send + Sync {
    fn submit<'a>(&'a self, descriptor: &'a DesiredStateDescriptor) -> BoxFuture<'a, PlatformResult<Submission>>;
}
