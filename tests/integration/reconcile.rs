//! Integration tests for pull-and-merge against a remote snapshot.
//!
//! The merged store must mirror the remote ledger except where local work
//! is still unconfirmed: pending edits win, pending deletes stay deleted,
//! and local-only records are kept.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use moneybook::book::Book;
use moneybook::remote::{MemoryLedger, RemoteLedger};
use moneybook::sync::ReconcileOutcome;
use moneybook_proto::flat::FlatRecord;
use moneybook_proto::record::{Record, RecordDraft, RecordId, RecordPatch, SyncStatus};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Remote row created `day` days after 2024-01-01.
fn remote_row(name: &str, day: i64, amount: f64) -> FlatRecord {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap() + Duration::days(day);
    let record = Record::from_draft(RecordDraft::new(name, amount).created_at(at), at);
    FlatRecord::from_record(&record)
}

fn book_with(rows: Vec<FlatRecord>) -> (tempfile::TempDir, Arc<MemoryLedger>, Book<MemoryLedger>) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::with_rows(rows));
    let book = Book::open(dir.path(), Arc::clone(&ledger), None).unwrap();
    (dir, ledger, book)
}

fn names(book: &Book<MemoryLedger>) -> Vec<String> {
    book.list().into_iter().map(|r| r.name).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pull_into_empty_store() {
    let (_dir, _ledger, book) = book_with(vec![
        remote_row("older", 1, -5.0),
        remote_row("newer", 3, -7.0),
        remote_row("middle", 2, 12.0),
    ]);

    let outcome = book.refresh().await;
    let ReconcileOutcome::Merged { merge, .. } = outcome else {
        panic!("expected a merge, got {outcome:?}");
    };
    assert_eq!(merge.records, 3);
    assert_eq!(merge.kept_local, 0);

    assert_eq!(names(&book), vec!["newer", "middle", "older"]);
    assert!(book.list().iter().all(|r| r.sync_status == SyncStatus::Synced));
    // Stored order matches display order.
    let stored: Vec<String> = book.state().records().list().into_iter().map(|r| r.name).collect();
    assert_eq!(stored, vec!["newer", "middle", "older"]);
}

#[tokio::test]
async fn unconfirmed_local_work_survives_merge() {
    let edited = remote_row("edited", 1, 10.0);
    let deleted = remote_row("deleted", 2, 20.0);
    let untouched = remote_row("untouched", 3, 30.0);
    let edited_id = RecordId::from_string(edited.id.clone());
    let deleted_id = RecordId::from_string(deleted.id.clone());
    let (_dir, ledger, book) = book_with(vec![edited, deleted, untouched]);
    book.refresh().await;

    ledger.fail_update_of(&edited_id);
    ledger.fail_delete_of(&deleted_id);
    ledger.fail_create(true);
    book.edit(&edited_id, RecordPatch::amount(11.0)).unwrap();
    book.delete(&deleted_id).unwrap();
    let local_only = book.add(RecordDraft::new("local", 1.0)).unwrap();

    let outcome = book.refresh().await;
    let ReconcileOutcome::Merged { pass, merge } = outcome else {
        panic!("expected a merge, got {outcome:?}");
    };
    assert_eq!(pass.failed, 3);
    assert_eq!(merge.kept_local, 2);
    assert_eq!(merge.dropped_deleted, 1);
    assert_eq!(merge.records, 3);

    let state = book.state().records();
    assert_eq!(state.get(&edited_id).unwrap().amount, 11.0);
    assert_eq!(state.get(&edited_id).unwrap().sync_status, SyncStatus::Error);
    assert!(state.get(&deleted_id).is_none());
    assert_eq!(state.get(&local_only).unwrap().sync_status, SyncStatus::Error);
    assert_eq!(names(&book), vec!["local", "untouched", "edited"]);
}

#[tokio::test]
async fn remote_deletion_removes_synced_record() {
    let gone = remote_row("gone", 1, 1.0);
    let gone_id = RecordId::from_string(gone.id.clone());
    let (_dir, ledger, book) = book_with(vec![gone, remote_row("stays", 2, 2.0)]);
    book.refresh().await;
    assert_eq!(book.list().len(), 2);

    // Another client deletes the row.
    ledger.delete(&gone_id).await.unwrap();

    book.refresh().await;
    assert_eq!(names(&book), vec!["stays"]);
}

#[tokio::test]
async fn failed_pull_leaves_local_state_untouched() {
    let (_dir, ledger, book) = book_with(vec![remote_row("remote", 1, 1.0)]);
    book.add(RecordDraft::new("local", 2.0)).unwrap();
    ledger.set_offline(true);

    let outcome = book.refresh().await;
    assert!(matches!(outcome, ReconcileOutcome::Aborted { .. }));
    assert_eq!(names(&book), vec!["local"]);
}

#[tokio::test]
async fn malformed_pull_aborts() {
    let mut bad = remote_row("bad", 1, 1.0);
    bad.created_at = "yesterday".to_string();
    let (_dir, _ledger, book) = book_with(vec![bad]);

    let outcome = book.refresh().await;
    let ReconcileOutcome::Aborted { reason, .. } = outcome else {
        panic!("expected an abort, got {outcome:?}");
    };
    assert!(reason.contains("created_at"));
    assert!(book.list().is_empty());
}

#[tokio::test]
async fn confirmed_pass_then_pull_is_clean() {
    let (_dir, ledger, book) = book_with(Vec::new());
    let id = book.add(RecordDraft::new("Lunch", -9.0).with_tag("food")).unwrap();

    let outcome = book.refresh().await;
    let ReconcileOutcome::Merged { pass, merge } = outcome else {
        panic!("expected a merge, got {outcome:?}");
    };
    assert_eq!(pass.succeeded, 1);
    assert_eq!(merge.kept_local, 0);
    assert!(ledger.row(&id).is_some());
    let record = book.state().records().get(&id).unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.tags, vec!["food".to_string()]);
}
