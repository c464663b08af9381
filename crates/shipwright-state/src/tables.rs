//! redb table definitions for the Shipwright state store.

use redb::TableDefinition;

/// Attempt records keyed by `{service}/{sequence:020}`.
pub const ATTEMPTS: TableDefinition<&str, &[u8]> = TableDefinition::new("attempts");

/// Last converged descriptor keyed by service name.
pub const CONVERGED: TableDefinition<&str, &[u8]> = TableDefinition::new("converged");

/// Highest submitted revision keyed by service name.
pub const REVISIONS: TableDefinition<&str, u64> = TableDefinition::new("revisions");

/// Descriptor submitted at the highest revision, keyed by service name.
pub const SUBMITTED: TableDefinition<&str, &[u8]> = TableDefinition::new("submitted");

/// Counters; currently only the attempt sequence.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const ATTEMPT_SEQUENCE: &str = "attempt_sequence";
