//! StateStore: redb-backed persistence for Shipwright.
//!
//! Attempts are JSON-serialized into `&[u8]` value columns. Appending
//! assigns the next sequence number in the same write transaction, so ids
//! are unique and increasing even across processes sharing the file.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use shipwright_core::{DesiredStateDescriptor, Revision};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        txn.open_table(CONVERGED).map_err(map_err!(Table))?;
        txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        txn.open_table(SUBMITTED).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Attempt log ────────────────────────────────────────────────

    /// Append a new attempt, assigning its id. Returns the id.
    pub fn append_attempt(&self, attempt: &mut DeploymentAttempt) -> StateResult<AttemptId> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let next = meta
                .get(ATTEMPT_SEQUENCE)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0)
                + 1;
            meta.insert(ATTEMPT_SEQUENCE, next).map_err(map_err!(Write))?;
            attempt.id = next;

            let key = attempt.table_key();
            let value = serde_json::to_vec(attempt).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service = %attempt.service_name, id = attempt.id, "attempt appended");
        Ok(attempt.id)
    }

    /// Overwrite an existing attempt's record with its latest status.
    ///
    /// Fails with `NotFound` if the attempt was never appended.
    pub fn update_attempt(&self, attempt: &DeploymentAttempt) -> StateResult<()> {
        let key = attempt.table_key();
        let value = serde_json::to_vec(attempt).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
            let exists = table.get(key.as_str()).map_err(map_err!(Read))?.is_some();
            if !exists {
                return Err(StateError::NotFound(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get one attempt by service and id.
    pub fn get_attempt(&self, service: &str, id: AttemptId) -> StateResult<Option<DeploymentAttempt>> {
        let key = attempt_key(service, id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let attempt: DeploymentAttempt =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(attempt))
            }
            None => Ok(None),
        }
    }

    /// All attempts for a service, oldest first.
    pub fn list_attempts(&self, service: &str) -> StateResult<Vec<DeploymentAttempt>> {
        let prefix = format!("{service}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let attempt: DeploymentAttempt =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(attempt);
            }
        }
        Ok(results)
    }

    /// Every attempt across all services, ordered by id.
    pub fn list_all_attempts(&self) -> StateResult<Vec<DeploymentAttempt>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let attempt: DeploymentAttempt =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(attempt);
        }
        results.sort_by_key(|a| a.id);
        Ok(results)
    }

    // ── Last known good ────────────────────────────────────────────

    /// Record `descriptor` as the service's most recently converged state.
    pub fn put_converged(&self, descriptor: &DesiredStateDescriptor) -> StateResult<()> {
        let key = descriptor.service_name.as_str();
        let value = serde_json::to_vec(descriptor).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CONVERGED).map_err(map_err!(Table))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service = %key, revision = descriptor.revision, "converged descriptor stored");
        Ok(())
    }

    pub fn get_converged(&self, service: &str) -> StateResult<Option<DesiredStateDescriptor>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONVERGED).map_err(map_err!(Table))?;
        match table.get(service).map_err(map_err!(Read))? {
            Some(guard) => {
                let descriptor: DesiredStateDescriptor =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(descriptor))
            }
            None => Ok(None),
        }
    }

    // ── Revisions ──────────────────────────────────────────────────

    /// Record that `descriptor` is about to be sent to the platform.
    ///
    /// Raises the service's highest submitted revision and, when
    /// `descriptor` is at that revision, keeps it as the content that
    /// revision stands for. Returns the highest revision.
    pub fn record_submission(&self, descriptor: &DesiredStateDescriptor) -> StateResult<Revision> {
        let service = descriptor.service_name.as_str();
        let revision = descriptor.revision;
        let value = serde_json::to_vec(descriptor).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let highest;
        {
            let mut table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            let current = table
                .get(service)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value());
            highest = current.map_or(revision, |c| c.max(revision));
            table.insert(service, highest).map_err(map_err!(Write))?;

            if highest == revision {
                let mut submitted = txn.open_table(SUBMITTED).map_err(map_err!(Table))?;
                submitted
                    .insert(service, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service = %service, revision, highest, "submission recorded");
        Ok(highest)
    }

    /// The descriptor last submitted at the service's highest revision.
    pub fn submitted_descriptor(&self, service: &str) -> StateResult<Option<DesiredStateDescriptor>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SUBMITTED).map_err(map_err!(Table))?;
        match table.get(service).map_err(map_err!(Read))? {
            Some(guard) => {
                let descriptor: DesiredStateDescriptor =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(descriptor))
            }
            None => Ok(None),
        }
    }

    pub fn highest_revision(&self, service: &str) -> StateResult<Option<Revision>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        Ok(table
            .get(service)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value()))
    }
}
