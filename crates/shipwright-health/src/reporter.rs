//! The health reporter contract and a scripted implementation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use shipwright_core::BoxFuture;
use thiserror::Error;

/// Point-in-time replica health for one service. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub service_name: String,
    pub healthy_replicas: u32,
    pub desired_replicas: u32,
    /// Unix timestamp (milliseconds) when the snapshot was taken.
    pub timestamp: u64,
}

impl HealthSnapshot {
    pub fn new(service_name: &str, healthy_replicas: u32, desired_replicas: u32) -> Self {
        Self {
            service_name: service_name.to_string(),
            healthy_replicas,
            desired_replicas,
            timestamp: epoch_millis(),
        }
    }

    /// Whether live state matches desired state in this one observation.
    pub fn is_match(&self) -> bool {
        self.healthy_replicas == self.desired_replicas
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HealthError {
    /// No answer right now; polling continues.
    #[error("health reporter unavailable: {0}")]
    Unavailable(String),

    /// The reporter refused the request (bad credentials, unknown service).
    #[error("health request rejected: {0}")]
    Rejected(String),
}

/// Source of health snapshots, queried once per poll.
pub trait HealthReporter: Send + Sync {
    fn snapshot<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<HealthSnapshot, HealthError>>;
}

/// Replays a fixed sequence of answers, then repeats the last one.
///
/// Each entry is `Ok((healthy, desired))` or an error.
pub struct ScriptedReporter {
    script: Mutex<VecDeque<Result<(u32, u32), HealthError>>>,
    last: Mutex<Option<Result<(u32, u32), HealthError>>>,
    calls: AtomicU32,
}

impl ScriptedReporter {
    pub fn new(script: Vec<Result<(u32, u32), HealthError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// Always answers `healthy/desired`.
    pub fn always(healthy: u32, desired: u32) -> Self {
        Self::new(vec![Ok((healthy, desired))])
    }

    /// Number of snapshots requested so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_answer(&self) -> Result<(u32, u32), HealthError> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(answer) = script.pop_front() {
            *last = Some(answer.clone());
            return answer;
        }
        last.clone()
            .unwrap_or_else(|| Err(HealthError::Unavailable("empty script".to_string())))
    }
}

impl HealthReporter for ScriptedReporter {
    fn snapshot<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<HealthSnapshot, HealthError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (healthy, desired) = self.next_answer()?;
            Ok(HealthSnapshot::new(service, healthy, desired))
        })
    }
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
