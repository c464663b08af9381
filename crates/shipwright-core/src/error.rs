//! Error types for descriptor and configuration handling.

use thiserror::Error;

use crate::image::ImageRefError;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render toml: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid image reference: {0}")]
    ImageRef(#[from] ImageRefError),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}
