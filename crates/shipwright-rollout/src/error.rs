use shipwright_core::{CoreError, Revision};
use shipwright_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The descriptor failed validation; nothing was submitted.
    #[error("descriptor for {service} revision {revision} is invalid: {}", problems.join("; "))]
    Validation {
        service: String,
        revision: Revision,
        problems: Vec<String>,
    },

    /// Another attempt holds the service (only from `try_deploy`).
    #[error("a deployment of {0} is already in progress")]
    Busy(String),

    #[error("invalid orchestrator configuration: {0}")]
    Config(#[from] CoreError),

    #[error("attempt log error: {0}")]
    State(#[from] StateError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
