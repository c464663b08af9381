//! shipwright-core: shared types for the Shipwright deployment orchestrator.
//!
//! Everything the other crates agree on lives here: content digests and
//! image references, the immutable desired-state descriptor, the descriptor
//! and `shipwright.toml` file formats, and the backoff policy used by every
//! retry and poll loop.

pub mod backoff;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod image;
pub mod types;

pub use backoff::{Backoff, RetryPolicy};
pub use config::{parse_duration, ShipwrightConfig, MAX_DURATION};
pub use descriptor::{DescriptorFile, DescriptorOverrides};
pub use error::{CoreError, CoreResult};
pub use image::{is_valid_repository, Digest, ImageLocator, ImageRefError, ImageReference, DEFAULT_REGISTRY};
pub use types::*;
