//! shipwright-platform: the orchestration platform boundary.
//!
//! The orchestrator talks to three external collaborators through the
//! traits here and in `shipwright-health`:
//!
//! - [`Platform`]: submit desired state, idempotent by revision;
//! - [`shipwright_health::HealthReporter`]: fleet health, implemented by
//!   [`HttpPlatform`] alongside `Platform`;
//! - [`SecretProvider`]: existence checks for secret references.

pub mod error;
pub mod http;
pub mod memory;
pub mod platform;
pub mod secrets;

pub use error::{PlatformError, PlatformResult};
pub use http::HttpPlatform;
pub use memory::InMemoryPlatform;
pub use platform::{Platform, Submission};
pub use secrets::{EnvSecretProvider, SecretError, SecretProvider, StaticSecretProvider};
