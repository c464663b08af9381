use thiserror::Error;

/// Errors from platform calls.
///
/// `Network`, `Unavailable`, `Timeout` and `Malformed` are transient and
/// retried with a hard ceiling; the rest fail the attempt immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("platform unreachable: {0}")]
    Network(String),

    #[error("platform unavailable: {0}")]
    Unavailable(String),

    #[error("platform call timed out: {0}")]
    Timeout(String),

    /// An answer we could not interpret. Treated as transient.
    #[error("malformed platform response: {0}")]
    Malformed(String),

    #[error("platform refused credentials: {0}")]
    Unauthorized(String),

    #[error("platform rejected desired state: {0}")]
    Rejected(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Network(_)
                | PlatformError::Unavailable(_)
                | PlatformError::Timeout(_)
                | PlatformError::Malformed(_)
        )
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;
