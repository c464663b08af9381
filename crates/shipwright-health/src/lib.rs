//! shipwright-health: fleet health as seen by the orchestrator.
//!
//! The platform (or whatever watches it) answers one question: how many
//! replicas of a service are healthy out of how many are desired. This
//! crate defines that contract and the logic that turns a stream of
//! answers into a convergence decision.
//!
//! ```text
//! HealthReporter::snapshot(service) → HealthSnapshot | HealthError
//!                    │
//!                    ▼
//! ConvergenceTracker
//!   ├── two consecutive matching snapshots → Converged
//!   ├── N consecutive Unavailable         → Escalate
//!   └── otherwise                         → Waiting (next_interval())
//! ```
//!
//! A matching snapshot resets the poll interval so the confirming
//! snapshot follows promptly; anything else doubles it up to the cap.

pub mod reporter;
pub mod tracker;

pub use reporter::{HealthError, HealthReporter, HealthSnapshot, ScriptedReporter};
pub use tracker::{ConvergenceTracker, PollVerdict};
