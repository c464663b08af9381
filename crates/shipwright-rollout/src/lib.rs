//! shipwright-rollout: the deployment orchestrator.
//!
//! Validates a desired-state descriptor, submits it to the platform, polls
//! fleet health until two consecutive snapshots match, and rolls back to the
//! last converged descriptor when configured to.

pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod policy;
pub mod validate;

pub use error::{OrchestratorError, OrchestratorResult};
pub use locks::ServiceLocks;
pub use orchestrator::{DeploymentOutcome, Orchestrator};
pub use policy::RolloutPolicy;
pub use validate::Validator;
