//! shipwright-state: persisted orchestrator state.
//!
//! Backed by [redb](https://docs.rs/redb). Holds three things:
//!
//! - the append-only log of [`DeploymentAttempt`] records, keyed
//!   `{service}/{sequence}` so a prefix scan yields one service's history
//!   in order;
//! - the last descriptor that converged per service (the rollback target);
//! - the highest revision ever submitted per service, with the descriptor
//!   submitted at it.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
