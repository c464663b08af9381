//! The attempt log and revision guard survive a restart.

mod common;

use std::sync::Arc;

use common::*;
use shipwright_health::ScriptedReporter;
use shipwright_platform::{InMemoryPlatform, StaticSecretProvider};
use shipwright_registry::InMemoryRegistry;
use shipwright_rollout::{Orchestrator, OrchestratorError};
use shipwright_state::{AttemptStatus, StateStore};

fn orchestrator(registry: Arc<InMemoryRegistry>, state: StateStore) -> Orchestrator {
    Orchestrator::new(
        registry,
        Arc::new(InMemoryPlatform::new()),
        Arc::new(ScriptedReporter::always(2, 2)),
        Arc::new(StaticSecretProvider::default()),
        state,
        policy(),
    )
}

#[tokio::test]
async fn history_and_revisions_persist_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shipwright.redb");
    let registry = Arc::new(InMemoryRegistry::new(REGISTRY));
    let reference = image("v1");
    registry.insert_manifest(&reference, b"v1".to_vec());

    {
        let first = orchestrator(registry.clone(), StateStore::open(&path).unwrap());
        let outcome = first
            .deploy(descriptor("svc1", 7, reference.clone()), no_cancel())
            .await
            .unwrap();
        assert!(outcome.is_converged());
    }

    let state = StateStore::open(&path).unwrap();
    let second = orchestrator(registry, state.clone());

    let history = second.history("svc1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AttemptStatus::Converged);
    assert_eq!(state.get_converged("svc1").unwrap().unwrap().revision, 7);

    let err = second
        .deploy(descriptor("svc1", 6, reference), no_cancel())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation { revision: 6, .. }));
}
