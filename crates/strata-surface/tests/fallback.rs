//! Backend degradation and recovery

use serde_json::json;
use std::sync::Arc;
use strata_core::{ExecutionState, ExecutionStatus, FileType, Metadata, StateKind};
use strata_surface::{
    LineageError, LineageGraph, StateSurface, SurfaceConfig, WriteRoute, TAG_STRATEGY,
};
use strata_test_utils::{FlakyStateBackend, YieldingStateBackend};

fn surface(backend: &Arc<FlakyStateBackend>) -> StateSurface {
    StateSurface::new(SurfaceConfig::default()).with_state_backend(backend.clone())
}

#[tokio::test]
async fn writes_during_outage_stay_visible_after_recovery() {
    let backend = Arc::new(FlakyStateBackend::new());
    let surface = surface(&backend);

    surface
        .set_state(StateKind::Session, "acme", "before", json!(1), None)
        .await
        .unwrap();

    backend.set_failing(true);
    let route = surface
        .set_state(StateKind::Session, "acme", "during", json!(2), None)
        .await
        .unwrap();
    assert_eq!(route, WriteRoute::Fallback);
    let entry = surface.fallback().entry("session:acme:during").unwrap();
    assert_eq!(entry.tags[TAG_STRATEGY], "fallback");

    backend.set_failing(false);
    assert_eq!(
        surface.get_state(StateKind::Session, "acme", "during").await.unwrap(),
        Some(json!(2))
    );
    assert_eq!(
        surface.list_ids(StateKind::Session, "acme", 10).await.unwrap(),
        vec!["before", "during"]
    );
}

#[tokio::test]
async fn recovered_write_replaces_fallback_copy() {
    let backend = Arc::new(FlakyStateBackend::new());
    let surface = surface(&backend);

    backend.set_failing(true);
    surface
        .set_execution_state("acme", ExecutionState::new("run-1", ExecutionStatus::Running))
        .await
        .unwrap();

    backend.set_failing(false);
    let route = surface
        .set_execution_state("acme", ExecutionState::new("run-1", ExecutionStatus::Completed))
        .await
        .unwrap();
    assert_eq!(route, WriteRoute::Backing);
    assert!(surface.fallback().is_empty());

    let state = surface
        .get_execution_state("acme", "run-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn delete_during_outage_clears_fallback() {
    let backend = Arc::new(FlakyStateBackend::new());
    let surface = surface(&backend);

    backend.set_failing(true);
    surface
        .set_state(StateKind::Session, "acme", "s1", json!(1), None)
        .await
        .unwrap();
    assert!(surface.delete_state(StateKind::Session, "acme", "s1").await.unwrap());
    assert!(surface
        .get_state(StateKind::Session, "acme", "s1")
        .await
        .unwrap()
        .is_none());
    assert!(surface.health().degraded_operations > 0);
}

#[tokio::test]
async fn backed_key_deleted_during_outage_stays_deleted() {
    let backend = Arc::new(FlakyStateBackend::new());
    let surface = surface(&backend);
    surface
        .set_state(StateKind::Session, "acme", "s1", json!(1), None)
        .await
        .unwrap();

    backend.set_failing(true);
    assert!(surface.delete_state(StateKind::Session, "acme", "s1").await.unwrap());
    assert_eq!(
        surface.get_state(StateKind::Session, "acme", "s1").await.unwrap(),
        None
    );
    assert_eq!(surface.health().pending_deletes, 1);

    backend.set_failing(false);
    assert_eq!(
        surface.get_state(StateKind::Session, "acme", "s1").await.unwrap(),
        None
    );
    assert!(backend.inner().is_empty());
    assert_eq!(surface.health().pending_deletes, 0);
    assert!(surface
        .list_ids(StateKind::Session, "acme", 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn links_racing_through_a_shared_backend_stay_symmetric() {
    let backend = Arc::new(YieldingStateBackend::new());
    let graph = |backend: &Arc<YieldingStateBackend>| {
        LineageGraph::new(Arc::new(
            StateSurface::new(SurfaceConfig::default()).with_state_backend(backend.clone()),
        ))
    };
    let (first, second) = (graph(&backend), graph(&backend));

    first
        .record_lineage("a", FileType::Uploaded, "a.pdf", "acme", None, Metadata::new())
        .await
        .unwrap();
    for child in ["b1", "b2"] {
        first
            .record_lineage(child, FileType::Parsed, child, "acme", None, Metadata::new())
            .await
            .unwrap();
    }

    let (r1, r2) = tokio::join!(
        first.link("a", "b1", "parsed_from", "acme"),
        second.link("a", "b2", "parsed_from", "acme"),
    );

    for (result, child) in [(&r1, "b1"), (&r2, "b2")] {
        let parent = first.get_fact("a", "acme").await.unwrap().unwrap();
        let fact = first.get_fact(child, "acme").await.unwrap().unwrap();
        match result {
            Ok(()) => {
                assert!(parent.child_file_ids.contains(child));
                assert_eq!(fact.parent_file_id.as_deref(), Some("a"));
            }
            Err(err) => {
                assert!(matches!(err, LineageError::VersionConflict { .. }), "{err}");
                assert!(!parent.child_file_ids.contains(child));
                assert_eq!(fact.parent_file_id, None);
            }
        }
    }
    assert!(first.reconcile("acme").await.unwrap().is_clean());

    if r1.is_err() {
        first.link("a", "b1", "parsed_from", "acme").await.unwrap();
    }
    if r2.is_err() {
        second.link("a", "b2", "parsed_from", "acme").await.unwrap();
    }
    let parent = second.get_fact("a", "acme").await.unwrap().unwrap();
    assert_eq!(parent.child_file_ids.len(), 2);
}
