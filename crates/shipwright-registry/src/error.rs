use std::path::PathBuf;

use thiserror::Error;

/// Errors from building an artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build context {0} contains no files")]
    EmptyContext(PathBuf),

    #[error("invalid artifact name {0:?}")]
    InvalidName(String),

    #[error("invalid version {version:?}: {source}")]
    InvalidVersion {
        version: String,
        source: semver::Error,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode image metadata: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Credentials were refused. Never retried.
    #[error("registry authentication failed: {0}")]
    Auth(String),

    /// Network failure, timeout, or 5xx/429 answer. Retried with backoff.
    #[error("registry transfer failed: {0}")]
    Transfer(String),

    #[error("not found in registry: {0}")]
    NotFound(String),

    /// Any other 4xx answer; the request itself is wrong, so not retried.
    #[error("registry rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    Build(#[from] BuildError),
}

impl RegistryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Transfer(_))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
