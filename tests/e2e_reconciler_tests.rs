//! End-to-end tests for catalog views following the registry.

mod common;

use common::*;
use transfer_engine::transfer::TransferStatus;

#[tokio::test]
async fn test_reconciling_twice_changes_nothing() {
    let harness = TestEngine::spawn().await;
    let key = TestEngine::model_key(MODEL_1_ID);

    harness.start_model(MODEL_1_ID).unwrap();
    harness
        .transport
        .push_json(MODEL_1_ID, r#"{"status":"success","completed":100,"total":100}"#);
    wait_for_status(harness.registry(), &key, TransferStatus::Completed).await;
    for view in [VIEW_ALL, VIEW_OWNED, VIEW_MARKETPLACE] {
        wait_for_view(harness.reconciler(), view, MODEL_1_ID, |e| e.can_select).await;
    }

    let reconciler = harness.reconciler();
    let before: Vec<_> = reconciler
        .view_names()
        .iter()
        .map(|name| reconciler.view_snapshot(name).unwrap())
        .collect();

    assert_eq!(reconciler.reconcile_entry(&key), 0);
    assert_eq!(reconciler.reconcile_entry(&key), 0);
    assert_eq!(reconciler.resync_all(), 0);

    let after: Vec<_> = reconciler
        .view_names()
        .iter()
        .map(|name| reconciler.view_snapshot(name).unwrap())
        .collect();
    assert_eq!(before, after);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_burst_of_frames_is_coalesced() {
    let harness = TestEngine::spawn().await;
    let key = TestEngine::model_key(MODEL_1_ID);
    let start_revision = harness
        .reconciler()
        .view_snapshot(VIEW_ALL)
        .unwrap()
        .revision;

    harness.start_model(MODEL_1_ID).unwrap();
    for completed in 1..=60 {
        harness
            .transport
            .push_json(MODEL_1_ID, &format!(r#"{{"completed":{}}}"#, completed));
    }
    wait_for_record(harness.registry(), &key, |r| r.completed_units == 60).await;

    // The trailing flush delivers the last value.
    let row = wait_for_view(harness.reconciler(), VIEW_ALL, MODEL_1_ID, |e| {
        e.completed_units == 60
    })
    .await;
    assert_eq!(row.status, Some(TransferStatus::InProgress));

    let revisions = harness
        .reconciler()
        .view_snapshot(VIEW_ALL)
        .unwrap()
        .revision
        - start_revision;
    assert!(revisions < 60, "view changed {} times", revisions);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_removed_transfer_releases_its_row() {
    let harness = TestEngine::spawn().await;
    let orchestrator = harness.engine.orchestrator();

    harness.start_model(MODEL_1_ID).unwrap();
    orchestrator
        .cancel(transfer_engine::TransferKind::Model, MODEL_1_ID)
        .await
        .unwrap();
    wait_for_view(harness.reconciler(), VIEW_ALL, MODEL_1_ID, |e| {
        e.status == Some(TransferStatus::Paused)
    })
    .await;

    orchestrator
        .discard(transfer_engine::TransferKind::Model, MODEL_1_ID)
        .unwrap();
    let row = wait_for_view(harness.reconciler(), VIEW_ALL, MODEL_1_ID, |e| e.status.is_none()).await;
    assert_eq!(row.completed_units, 0);

    // Nothing was ever synthesized for a transfer that did not complete.
    assert!(harness
        .reconciler()
        .view_snapshot(VIEW_OWNED)
        .unwrap()
        .entries
        .is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_search_reload_overlays_registry_state() {
    let harness = TestEngine::spawn().await;

    harness.start_model("m3").unwrap();
    harness.transport.push_json("m3", r#"{"completed":25}"#);
    wait_for_record(harness.registry(), &TestEngine::model_key("m3"), |r| {
        r.completed_units == 25
    })
    .await;

    let reconciler = harness.reconciler();
    reconciler
        .set_search(VIEW_MARKETPLACE, Some("m3".to_string()))
        .unwrap();
    assert_eq!(reconciler.load_next_page(VIEW_MARKETPLACE).await.unwrap(), 1);

    let snapshot = reconciler.view_snapshot(VIEW_MARKETPLACE).unwrap();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].status, Some(TransferStatus::InProgress));
    assert_eq!(snapshot.entries[0].completed_units, 25);

    harness.shutdown().await;
}
