//! Integration tests for durability across process restarts.
//!
//! Local state is reopened from the same data directory to stand in for a
//! restart. Records, queued tasks and attempt counts must survive, and a
//! restart between the two snapshot writes must heal record statuses.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]

use std::sync::Arc;

use moneybook::remote::MemoryLedger;
use moneybook::store::snapshot::SnapshotFile;
use moneybook::store::{LocalState, RECORDS_FILE, StoreError, TASKS_FILE};
use moneybook::sync::{PassReport, SyncEngine};
use moneybook_proto::record::{RecordDraft, RecordPatch, SyncStatus};
use moneybook_proto::task::PendingTask;

#[test]
fn records_and_tasks_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = {
        let state = LocalState::open(dir.path()).unwrap();
        let a = state.create(RecordDraft::new("a", 1.0).with_tag("x")).unwrap();
        let b = state.create(RecordDraft::new("b", 2.0)).unwrap();
        state.update(&a, RecordPatch::amount(5.0)).unwrap();
        (a, b)
    };

    let state = LocalState::open(dir.path()).unwrap();
    assert_eq!(state.records().len(), 2);
    assert_eq!(state.records().get(&a).unwrap().amount, 5.0);
    assert_eq!(state.records().get(&a).unwrap().tags, vec!["x".to_string()]);
    assert_eq!(state.records().get(&b).unwrap().sync_status, SyncStatus::Pending);
    assert_eq!(state.queue().len(), 3);
}

#[tokio::test]
async fn attempts_survive_reopen_and_replay_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_offline(true);

    let id = {
        let state = Arc::new(LocalState::open(dir.path()).unwrap());
        let id = state.create(RecordDraft::new("Taxi", -18.0)).unwrap();
        let engine = SyncEngine::new(Arc::clone(&state), Arc::clone(&ledger), None);
        engine.run_once().await;
        id
    };

    let state = Arc::new(LocalState::open(dir.path()).unwrap());
    let task = &state.queue().snapshot()[0];
    assert_eq!(task.attempts, 1);
    assert_eq!(state.records().get(&id).unwrap().sync_status, SyncStatus::Error);

    ledger.set_offline(false);
    let engine = SyncEngine::new(Arc::clone(&state), Arc::clone(&ledger), None);
    let report = engine.run_once().await;
    assert!(matches!(report, PassReport::Completed(s) if s.succeeded == 1));
    assert!(ledger.row(&id).is_some());

    let reopened = LocalState::open(dir.path()).unwrap();
    assert!(reopened.queue().is_empty());
    assert_eq!(
        reopened.records().get(&id).unwrap().sync_status,
        SyncStatus::Synced
    );
}

#[test]
fn pending_record_without_task_heals_to_synced() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let state = LocalState::open(dir.path()).unwrap();
        state.create(RecordDraft::new("orphan", 1.0)).unwrap()
    };
    // Queue lost: as if the dequeue landed but the status write did not.
    SnapshotFile::<PendingTask>::new(dir.path().join(TASKS_FILE))
        .save(&[])
        .unwrap();

    let state = LocalState::open(dir.path()).unwrap();
    assert_eq!(state.records().get(&id).unwrap().sync_status, SyncStatus::Synced);
}

#[test]
fn corrupt_snapshot_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    {
        let state = LocalState::open(dir.path()).unwrap();
        state.create(RecordDraft::new("a", 1.0)).unwrap();
    }
    let path = dir.path().join(RECORDS_FILE);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let result = LocalState::open(dir.path());
    assert!(matches!(result, Err(StoreError::Corrupt { .. })));
}

#[test]
fn fresh_directory_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let state = LocalState::open(&dir.path().join("nested").join("data")).unwrap();
    assert!(state.records().is_empty());
    assert!(state.queue().is_empty());
}
