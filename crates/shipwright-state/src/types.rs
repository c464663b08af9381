//! Persisted record types.

use std::fmt;

use serde::{Deserialize, Serialize};
use shipwright_core::{Revision, ServiceName};

/// Sequence number assigned by the attempt log.
pub type AttemptId = u64;

/// Lifecycle of a deployment attempt.
///
/// `Pending → Converging → {Converged | Failed}`; a rollback attempt ends in
/// `RolledBack` when the restored revision converges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Converging,
    Converged,
    Failed,
    RolledBack,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptStatus::Converged | AttemptStatus::Failed | AttemptStatus::RolledBack
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Converging => "converging",
            AttemptStatus::Converged => "converged",
            AttemptStatus::Failed => "failed",
            AttemptStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why an attempt exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptKind {
    /// A requested deployment.
    Deploy,
    /// Automatic restoration after `from_revision` failed.
    Rollback {
        from_revision: Revision,
        /// Revision of the last converged descriptor being restored.
        restored_revision: Revision,
    },
}

/// Terminal error recorded on a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttemptError {
    Validation { problems: Vec<String> },
    ConvergenceTimeout,
    Cancelled,
    Platform { message: String },
    /// The platform refused our credentials.
    Unauthorized { message: String },
    RollbackFailed { message: String },
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Validation { problems } => {
                write!(f, "validation failed: {}", problems.join("; "))
            }
            AttemptError::ConvergenceTimeout => f.write_str("convergence timeout"),
            AttemptError::Cancelled => f.write_str("cancelled"),
            AttemptError::Platform { message } => write!(f, "platform error: {message}"),
            AttemptError::Unauthorized { message } => write!(f, "unauthorized: {message}"),
            AttemptError::RollbackFailed { message } => write!(f, "rollback failed: {message}"),
        }
    }
}

/// One orchestration of one revision of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    /// Assigned when appended to the log; 0 before that.
    pub id: AttemptId,
    pub service_name: ServiceName,
    pub target_revision: Revision,
    /// Textual image reference of the target descriptor.
    pub image: String,
    pub kind: AttemptKind,
    pub status: AttemptStatus,
    pub last_error: Option<AttemptError>,
    /// Unix timestamp (milliseconds) when orchestration began.
    pub started_at: u64,
    /// Unix timestamp (milliseconds) when a terminal status was reached.
    pub finished_at: Option<u64>,
    /// Health snapshots requested while converging.
    pub polls: u32,
}

impl DeploymentAttempt {
    pub fn new(service_name: &str, target_revision: Revision, image: &str, kind: AttemptKind) -> Self {
        Self {
            id: 0,
            service_name: service_name.to_string(),
            target_revision,
            image: image.to_string(),
            kind,
            status: AttemptStatus::Pending,
            last_error: None,
            started_at: epoch_millis(),
            finished_at: None,
            polls: 0,
        }
    }

    /// Build the composite key for the attempts table.
    pub fn table_key(&self) -> String {
        attempt_key(&self.service_name, self.id)
    }

    /// Move to a terminal status, stamping the finish time.
    pub fn finish(&mut self, status: AttemptStatus, error: Option<AttemptError>) {
        self.status = status;
        self.last_error = error;
        self.finished_at = Some(epoch_millis());
    }

    pub fn is_rollback(&self) -> bool {
        matches!(self.kind, AttemptKind::Rollback { .. })
    }
}

pub(crate) fn attempt_key(service: &str, id: AttemptId) -> String {
    format!("{service}/{id:020}")
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
