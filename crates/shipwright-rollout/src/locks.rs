//! Per-service serialization.
//!
//! One `tokio::sync::Mutex` per service name. Tokio's mutex is fair, so
//! waiting requests acquire it in the order they asked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct ServiceLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for the whole of one attempt (and its rollback).
pub type ServiceGuard = OwnedMutexGuard<()>;

impl ServiceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries nobody holds or waits on are dropped on the way.
    fn lock_for(&self, service: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|name, lock| name == service || Arc::strong_count(lock) > 1);
        locks.entry(service.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait for exclusive access to `service`, FIFO among waiters.
    pub async fn acquire(&self, service: &str) -> ServiceGuard {
        self.lock_for(service).lock_owned().await
    }

    /// Exclusive access to `service` if nobody holds it right now.
    pub fn try_acquire(&self, service: &str) -> Option<ServiceGuard> {
        self.lock_for(service).try_lock_owned().ok()
    }
}
