//! Shared harness: in-memory registry and platform, scripted or
//! platform-driven health, millisecond poll intervals, zero jitter.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shipwright_core::{
    Backoff, BoxFuture, DesiredStateDescriptor, Digest, ImageReference, NetworkPlacement,
    PlatformLimits, ResourceLimits, RetryPolicy, Revision,
};
use shipwright_health::{HealthError, HealthReporter, HealthSnapshot, ScriptedReporter};
use shipwright_platform::{InMemoryPlatform, StaticSecretProvider};
use shipwright_registry::InMemoryRegistry;
use shipwright_rollout::{Orchestrator, RolloutPolicy};
use shipwright_state::StateStore;
use tokio::sync::watch;

pub const REGISTRY: &str = "localhost:5000";

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

pub fn policy() -> RolloutPolicy {
    RolloutPolicy {
        poll: Backoff::new(ms(1), ms(4)),
        convergence_timeout: ms(200),
        rollback_timeout: ms(200),
        unavailable_threshold: 5,
        retry: RetryPolicy::new(3, Backoff::new(ms(1), ms(2))),
        call_timeout: Duration::from_secs(1),
        rollback_enabled: false,
        limits: PlatformLimits::default(),
    }
}

/// An image reference pinned to the digest of `content`.
pub fn image(content: &str) -> ImageReference {
    ImageReference::by_digest(REGISTRY, "svc1", Digest::of(content.as_bytes()))
}

pub fn descriptor(service: &str, revision: Revision, image: ImageReference) -> DesiredStateDescriptor {
    DesiredStateDescriptor {
        service_name: service.to_string(),
        image,
        resources: ResourceLimits {
            cpu_millis: 256,
            memory_bytes: 512 * 1024 * 1024,
        },
        env: BTreeMap::new(),
        network: NetworkPlacement::default(),
        replicas: 2,
        revision,
        health_check: None,
    }
}

/// A receiver whose sender is gone: never cancels.
pub fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

/// Reports health from what the platform currently runs: replicas of an
/// image marked broken never become healthy.
pub struct FleetReporter {
    platform: Arc<InMemoryPlatform>,
    broken: Mutex<HashSet<Digest>>,
}

impl FleetReporter {
    pub fn new(platform: Arc<InMemoryPlatform>) -> Self {
        Self {
            platform,
            broken: Mutex::new(HashSet::new()),
        }
    }

    pub fn break_image(&self, image: &ImageReference) {
        if let Some(digest) = image.digest() {
            self.broken.lock().unwrap().insert(digest.clone());
        }
    }
}

impl HealthReporter for FleetReporter {
    fn snapshot<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<HealthSnapshot, HealthError>> {
        Box::pin(async move {
            let Some(current) = self.platform.current(service) else {
                return Err(HealthError::Unavailable(format!("{service} not scheduled")));
            };
            let broken = current
                .image
                .digest()
                .is_some_and(|d| self.broken.lock().unwrap().contains(d));
            let healthy = if broken { 0 } else { current.replicas };
            Ok(HealthSnapshot::new(service, healthy, current.replicas))
        })
    }
}

/// Answers healthy, but only after `delay`.
pub struct StalledReporter {
    delay: Duration,
    calls: AtomicUsize,
}

impl StalledReporter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HealthReporter for StalledReporter {
    fn snapshot<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<HealthSnapshot, HealthError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(HealthSnapshot::new(service, 2, 2))
        })
    }
}

pub struct Harness {
    pub registry: Arc<InMemoryRegistry>,
    pub platform: Arc<InMemoryPlatform>,
    pub state: StateStore,
    pub orchestrator: Orchestrator,
}

impl Harness {
    /// Harness whose health comes from `reporter`.
    pub fn with_reporter(reporter: Arc<dyn HealthReporter>, policy: RolloutPolicy) -> Self {
        Self::build(Arc::new(InMemoryPlatform::new()), reporter, policy)
    }

    pub fn scripted(reporter: Arc<ScriptedReporter>, policy: RolloutPolicy) -> Self {
        Self::with_reporter(reporter, policy)
    }

    /// Harness whose health follows the platform; returns the reporter too.
    pub fn fleet(policy: RolloutPolicy) -> (Self, Arc<FleetReporter>) {
        let platform = Arc::new(InMemoryPlatform::new());
        let reporter = Arc::new(FleetReporter::new(platform.clone()));
        (Self::build(platform, reporter.clone(), policy), reporter)
    }

    fn build(platform: Arc<InMemoryPlatform>, reporter: Arc<dyn HealthReporter>, policy: RolloutPolicy) -> Self {
        let registry = Arc::new(InMemoryRegistry::new(REGISTRY));
        let state = StateStore::open_in_memory().unwrap();
        let orchestrator = Orchestrator::new(
            registry.clone(),
            platform.clone(),
            reporter,
            Arc::new(StaticSecretProvider::new(["ssm:/prod/db-url"])),
            state.clone(),
            policy,
        );
        Self {
            registry,
            platform,
            state,
            orchestrator,
        }
    }

    /// Make `content`'s image exist in the registry and return its reference.
    pub fn push(&self, content: &str) -> ImageReference {
        let reference = image(content);
        self.registry
            .insert_manifest(&reference, content.as_bytes().to_vec());
        reference
    }
}
