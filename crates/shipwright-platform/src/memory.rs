//! In-process platform that records every submission.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use shipwright_core::{BoxFuture, DesiredStateDescriptor, Revision};
use tracing::debug;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::{Platform, Submission};

type FailureFactory = Box<dyn Fn() -> PlatformError + Send + Sync>;

/// Applies desired state per service, no-oping repeated revisions.
#[derive(Default)]
pub struct InMemoryPlatform {
    current: Mutex<HashMap<String, DesiredStateDescriptor>>,
    effective: Mutex<Vec<(String, Revision)>>,
    submissions: AtomicU32,
    failures: Mutex<Option<(u32, FailureFactory)>>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` submissions fail with errors produced by `make`.
    pub fn fail_next(&self, count: u32, make: impl Fn() -> PlatformError + Send + Sync + 'static) {
        *lock(&self.failures) = Some((count, Box::new(make)));
    }

    /// Every `submit` call, including failed and no-op ones.
    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// `(service, revision)` of each submission that changed desired state.
    pub fn effective_updates(&self) -> Vec<(String, Revision)> {
        lock(&self.effective).clone()
    }

    pub fn current(&self, service: &str) -> Option<DesiredStateDescriptor> {
        lock(&self.current).get(service).cloned()
    }

    fn apply(&self, descriptor: &DesiredStateDescriptor) -> PlatformResult<Submission> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = lock(&self.failures);
            if let Some((remaining, make)) = failures.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(make());
                }
            }
        }

        let service = &descriptor.service_name;
        let mut current = lock(&self.current);
        if let Some(existing) = current.get(service) {
            if descriptor.revision == existing.revision {
                debug!(%service, revision = descriptor.revision, "revision already applied");
                return Ok(Submission::AlreadyApplied);
            }
            if descriptor.revision < existing.revision {
                return Err(PlatformError::Rejected(format!(
                    "revision {} is older than applied revision {}",
                    descriptor.revision, existing.revision
                )));
            }
        }

        current.insert(service.clone(), descriptor.clone());
        lock(&self.effective).push((service.clone(), descriptor.revision));
        Ok(Submission::Applied)
    }
}

impl Platform for InMemoryPlatform {
    fn submit<'a>(&'a self, descriptor: &'a DesiredStateDescriptor) -> BoxFuture<'a, PlatformResult<Submission>> {
        Box::pin(async move { self.apply(descriptor) })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
