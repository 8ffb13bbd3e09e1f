//! End-to-end tests for transfer start, progress, cancel and capacity.

mod common;

use std::time::Duration;

use common::*;
use transfer_engine::config::TransferSettings;
use transfer_engine::transfer::{
    RegistryEvent, StartError, TransferKey, TransferKind, TransferResource, TransferStatus,
};

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_completed_model_shows_selectable_in_every_view() {
    let harness = TestEngine::spawn().await;
    let key = TestEngine::model_key(MODEL_1_ID);

    let record = harness.start_model(MODEL_1_ID).unwrap();
    assert_eq!(record.status, TransferStatus::InProgress);

    harness.transport.push_json(MODEL_1_ID, r#"{"completed":40}"#);
    harness.transport.push_json(MODEL_1_ID, r#"{"completed":90}"#);
    harness
        .transport
        .push_json(MODEL_1_ID, r#"{"status":"success","completed":100,"total":100}"#);

    let record = wait_for_status(harness.registry(), &key, TransferStatus::Completed).await;
    assert_eq!(record.completed_units, 100);
    assert_eq!(record.total_units, Some(100));
    assert!(record.can_select);
    assert_eq!(record.status_label(), "completed");

    for view in [VIEW_ALL, VIEW_OWNED, VIEW_MARKETPLACE] {
        let row = wait_for_view(harness.reconciler(), view, MODEL_1_ID, |e| {
            e.status == Some(TransferStatus::Completed)
        })
        .await;
        assert!(row.can_select, "row in {} is not selectable", view);
        assert_eq!(row.completed_units, 100);
    }

    // Only the view that never fetched the row gets a synthesized one.
    let owned = harness.reconciler().view_snapshot(VIEW_OWNED).unwrap();
    assert_eq!(owned.entries.len(), 1);
    assert!(owned.entries[0].synthesized);
    let all = harness.reconciler().view_snapshot(VIEW_ALL).unwrap();
    assert_eq!(all.entries.len(), CATALOG_MODEL_IDS.len());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_tool_package_install_completes() {
    let harness = TestEngine::spawn().await;
    let key = TransferKey::new(TransferKind::ToolPackage, TOOL_1_ID);

    harness
        .engine
        .orchestrator()
        .start(TransferResource::new(TransferKind::ToolPackage, TOOL_1_ID, "Filesystem"))
        .unwrap();
    assert_eq!(
        harness.registry().get(&key).unwrap().status_label(),
        "downloading"
    );
    harness.transport.push_json(TOOL_1_ID, r#"{"status":"success"}"#);

    let record = wait_for_status(harness.registry(), &key, TransferStatus::Completed).await;
    assert_eq!(record.status_label(), "success");
    let row = wait_for_view(harness.reconciler(), VIEW_TOOLS, TOOL_1_ID, |e| e.can_select).await;
    assert_eq!(row.status, Some(TransferStatus::Completed));

    // Model views are untouched.
    assert!(harness
        .reconciler()
        .view_snapshot(VIEW_OWNED)
        .unwrap()
        .entries
        .is_empty());

    harness.shutdown().await;
}

// ============================================================================
// Uniqueness and monotonic progress
// ============================================================================

#[tokio::test]
async fn test_second_start_does_not_open_another_stream() {
    let harness = TestEngine::spawn().await;

    let first = harness.start_model(MODEL_1_ID).unwrap();
    let second = harness.start_model(MODEL_1_ID).unwrap();
    assert_eq!(first.started_at, second.started_at);

    harness.wait_for_open(MODEL_1_ID, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.transport.open_count(MODEL_1_ID), 1);
    assert_eq!(harness.registry().len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_progress_never_moves_backwards() {
    let harness = TestEngine::spawn().await;
    let key = TestEngine::model_key(MODEL_1_ID);
    let mut events = harness.registry().subscribe();

    harness.start_model(MODEL_1_ID).unwrap();
    for payload in [
        r#"{"completed":40}"#,
        r#"{"completed":30}"#,
        r#"{"completed":60,"progress":60}"#,
        r#"{"progress":20}"#,
        r#"{"status":"success"}"#,
    ] {
        harness.transport.push_json(MODEL_1_ID, payload);
    }

    let mut seen = Vec::new();
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if let Ok(RegistryEvent::Upserted(record)) = events.recv().await {
                if record.key() != key {
                    continue;
                }
                seen.push((record.completed_units, record.percentage()));
                if record.status == TransferStatus::Completed {
                    break;
                }
            }
        }
    })
    .await
    .expect("transfer never completed");

    for pair in seen.windows(2) {
        assert!(pair[0].0 <= pair[1].0, "units regressed: {:?}", seen);
        assert!(pair[0].1 <= pair[1].1, "percentage regressed: {:?}", seen);
    }
    assert_eq!(seen.last(), Some(&(100, 100)));

    harness.shutdown().await;
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_before_first_frame_pauses_and_ignores_late_frames() {
    let harness = TestEngine::spawn().await;
    let key = TestEngine::model_key(MODEL_2_ID);

    harness.start_model(MODEL_2_ID).unwrap();
    let record = harness
        .engine
        .orchestrator()
        .cancel(TransferKind::Model, MODEL_2_ID)
        .await
        .unwrap();
    assert_eq!(record.status, TransferStatus::Paused);
    assert_eq!(harness.transport.aborts(), vec![MODEL_2_ID.to_string()]);

    harness.transport.push_json(MODEL_2_ID, r#"{"completed":50}"#);
    harness
        .transport
        .push_json(MODEL_2_ID, r#"{"status":"success","completed":100,"total":100}"#);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = harness.registry().get(&key).unwrap();
    assert_eq!(record.status, TransferStatus::Paused);
    assert_eq!(record.completed_units, 0);
    assert!(!record.can_select);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_paused_transfer_resumes_from_kept_progress() {
    let harness = TestEngine::spawn().await;
    let key = TestEngine::model_key(MODEL_1_ID);
    let orchestrator = harness.engine.orchestrator();

    harness.start_model(MODEL_1_ID).unwrap();
    harness.transport.push_json(MODEL_1_ID, r#"{"completed":40}"#);
    wait_for_record(harness.registry(), &key, |r| r.completed_units == 40).await;

    orchestrator.cancel(TransferKind::Model, MODEL_1_ID).await.unwrap();
    let paused = wait_for_status(harness.registry(), &key, TransferStatus::Paused).await;
    assert_eq!(paused.completed_units, 40);
    let row = wait_for_view(harness.reconciler(), VIEW_ALL, MODEL_1_ID, |e| {
        e.status == Some(TransferStatus::Paused)
    })
    .await;
    assert_eq!(row.completed_units, 40);

    let resumed = orchestrator.resume(TransferKind::Model, MODEL_1_ID).unwrap();
    assert_eq!(resumed.status, TransferStatus::InProgress);
    assert_eq!(resumed.completed_units, 40);
    harness.wait_for_open(MODEL_1_ID, 2).await;

    harness.transport.push_json(MODEL_1_ID, r#"{"status":"success"}"#);
    let done = wait_for_status(harness.registry(), &key, TransferStatus::Completed).await;
    assert_eq!(done.completed_units, 100);

    harness.shutdown().await;
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_server_error_fails_and_can_be_retried() {
    let harness = TestEngine::spawn().await;
    let key = TestEngine::model_key(MODEL_1_ID);

    harness.start_model(MODEL_1_ID).unwrap();
    harness
        .transport
        .push_json(MODEL_1_ID, r#"{"status":"error","message":"disk full"}"#);

    let failed = wait_for_status(harness.registry(), &key, TransferStatus::Failed).await;
    assert_eq!(failed.error.as_deref(), Some("disk full"));
    wait_for_view(harness.reconciler(), VIEW_MARKETPLACE, MODEL_1_ID, |e| {
        e.status == Some(TransferStatus::Failed)
    })
    .await;

    // A terminal record is replaced by a fresh session.
    let retried = harness.start_model(MODEL_1_ID).unwrap();
    assert_eq!(retried.status, TransferStatus::InProgress);
    assert_eq!(retried.error, None);
    harness.wait_for_open(MODEL_1_ID, 2).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_stream_ending_without_status_leaves_record_for_the_sweeper() {
    let harness = TestEngine::spawn().await;
    let key = TestEngine::model_key(MODEL_1_ID);

    harness.start_model(MODEL_1_ID).unwrap();
    harness.transport.push_json(MODEL_1_ID, r#"{"completed":10}"#);
    wait_for_record(harness.registry(), &key, |r| r.completed_units == 10).await;
    harness.transport.close(MODEL_1_ID);

    tokio::time::timeout(WAIT_TIMEOUT, async {
        while harness.engine.orchestrator().live_sessions() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pump never released its session");
    assert_eq!(
        harness.registry().get(&key).unwrap().status,
        TransferStatus::InProgress
    );

    harness.shutdown().await;
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test]
async fn test_sixth_start_is_rejected_at_capacity_five() {
    let harness = TestEngine::with_settings(TransferSettings {
        max_model_transfers: 5,
        ..TransferSettings::default()
    })
    .await;

    for id in &CATALOG_MODEL_IDS[..5] {
        harness.start_model(id).unwrap();
    }
    assert_eq!(harness.engine.orchestrator().active_count(TransferKind::Model), 5);

    let err = harness.start_model(MODEL_6_ID).unwrap_err();
    assert!(matches!(err, StartError::CapacityExceeded { limit: 5, .. }));
    assert!(err.to_string().contains("limit 5"));
    assert_eq!(harness.registry().len(), 5);
    assert!(harness.registry().get(&TestEngine::model_key(MODEL_6_ID)).is_none());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.transport.open_count(MODEL_6_ID), 0);

    // Tool packages have their own budget.
    harness
        .engine
        .orchestrator()
        .start(TransferResource::new(TransferKind::ToolPackage, TOOL_1_ID, "Filesystem"))
        .unwrap();

    harness.shutdown().await;
}

#[tokio::test]
async fn test_finishing_a_transfer_frees_a_slot() {
    let harness = TestEngine::with_settings(TransferSettings {
        max_model_transfers: 1,
        ..TransferSettings::default()
    })
    .await;

    harness.start_model(MODEL_1_ID).unwrap();
    assert!(harness.start_model(MODEL_2_ID).is_err());

    harness.transport.push_json(MODEL_1_ID, r#"{"status":"success"}"#);
    wait_for_status(
        harness.registry(),
        &TestEngine::model_key(MODEL_1_ID),
        TransferStatus::Completed,
    )
    .await;

    harness.start_model(MODEL_2_ID).unwrap();
    harness.shutdown().await;
}
