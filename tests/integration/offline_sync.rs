//! Integration tests for offline mutation and later sync.
//!
//! Every mutation must succeed locally with the remote ledger unreachable,
//! queue exactly one task, and reach the ledger in order once it is back.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]

use std::sync::Arc;

use moneybook::book::Book;
use moneybook::remote::MemoryLedger;
use moneybook::remote::memory::LedgerCall;
use moneybook::sync::PassReport;
use moneybook_proto::record::{RecordDraft, RecordPatch, SyncStatus};
use moneybook_proto::task::SyncAction;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn offline_book() -> (tempfile::TempDir, Arc<MemoryLedger>, Book<MemoryLedger>) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_offline(true);
    let book = Book::open(dir.path(), Arc::clone(&ledger), None).unwrap();
    (dir, ledger, book)
}

fn completed(report: PassReport) -> moneybook::sync::PassSummary {
    match report {
        PassReport::Completed(summary) => summary,
        PassReport::Skipped => panic!("pass was skipped"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mutations_work_without_network() {
    let (_dir, _ledger, book) = offline_book();

    let lunch = book.add(RecordDraft::new("Lunch", -12.5).with_tag("food")).unwrap();
    let rent = book.add(RecordDraft::new("Rent", -800.0)).unwrap();
    let edited = book.edit(&lunch, RecordPatch::amount(-14.0)).unwrap().unwrap();
    assert!(book.delete(&rent).unwrap());

    assert_eq!(edited.amount, -14.0);
    assert_eq!(edited.sync_status, SyncStatus::Pending);
    assert_eq!(book.list().len(), 1);

    let actions: Vec<SyncAction> = book
        .state()
        .queue()
        .snapshot()
        .into_iter()
        .map(|t| t.action)
        .collect();
    assert_eq!(
        actions,
        vec![SyncAction::Add, SyncAction::Add, SyncAction::Edit, SyncAction::Delete]
    );
}

#[tokio::test]
async fn failed_pass_marks_errors_and_keeps_queue() {
    let (_dir, _ledger, book) = offline_book();
    let id = book.add(RecordDraft::new("Coffee", -3.0)).unwrap();

    let summary = completed(book.sync().await);
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 0);

    let record = book.state().records().get(&id).unwrap();
    assert_eq!(record.sync_status, SyncStatus::Error);
    let task = &book.state().queue().snapshot()[0];
    assert_eq!(task.attempts, 1);
    assert!(task.last_error.is_some());
}

#[tokio::test]
async fn reconnect_replays_queue_in_order() {
    let (_dir, ledger, book) = offline_book();

    let kept = book.add(RecordDraft::new("Salary", 2500.0)).unwrap();
    let gone = book.add(RecordDraft::new("Typo", 1.0)).unwrap();
    book.edit(&kept, RecordPatch::amount(2600.0)).unwrap();
    book.delete(&gone).unwrap();
    book.sync().await;

    ledger.set_offline(false);
    ledger.clear_calls();
    let summary = completed(book.sync().await);
    assert_eq!(summary.succeeded, 4);
    assert!(!summary.had_failures());

    assert_eq!(
        ledger.calls(),
        vec![
            LedgerCall::CreateBatch(vec![kept.to_string(), gone.to_string()]),
            LedgerCall::Update(kept.to_string()),
            LedgerCall::Delete(gone.to_string()),
        ]
    );
    let row = ledger.row(&kept).unwrap();
    assert_eq!(row.price, 2600.0);
    assert!(ledger.row(&gone).is_none());

    assert!(book.state().queue().is_empty());
    let record = book.state().records().get(&kept).unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn one_failing_record_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let book = Book::open(dir.path(), Arc::clone(&ledger), None).unwrap();

    let a = book.add(RecordDraft::new("a", 1.0)).unwrap();
    let b = book.add(RecordDraft::new("b", 2.0)).unwrap();
    book.sync().await;
    assert!(book.state().queue().is_empty());

    ledger.fail_update_of(&a);
    book.edit(&a, RecordPatch::amount(10.0)).unwrap();
    book.delete(&a).unwrap();
    book.edit(&b, RecordPatch::amount(20.0)).unwrap();

    let summary = completed(book.sync().await);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(ledger.row(&b).unwrap().price, 20.0);
    assert_eq!(
        book.state().records().get(&b).unwrap().sync_status,
        SyncStatus::Synced
    );
    // The delete of `a` waits behind its failed edit.
    assert!(ledger.row(&a).is_some());
    assert_eq!(book.state().queue().len(), 2);

    ledger.heal();
    let summary = completed(book.sync().await);
    assert_eq!(summary.succeeded, 2);
    assert!(ledger.row(&a).is_none());
    assert!(book.state().queue().is_empty());
}

#[tokio::test]
async fn dead_tasks_wait_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_offline(true);
    let book = Book::open(dir.path(), Arc::clone(&ledger), Some(2)).unwrap();
    let id = book.add(RecordDraft::new("Gym", -30.0)).unwrap();

    book.sync().await;
    let summary = completed(book.sync().await);
    assert_eq!(summary.parked, 1);
    assert_eq!(book.status().dead, 1);

    ledger.set_offline(false);
    let summary = completed(book.sync().await);
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.dead_skipped, 1);
    assert!(ledger.row(&id).is_none());

    assert_eq!(book.retry_dead().unwrap(), 1);
    let summary = completed(book.sync().await);
    assert_eq!(summary.succeeded, 1);
    assert!(ledger.row(&id).is_some());
}
