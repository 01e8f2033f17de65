//! End-to-end tests: the HTTP client against the reference ledger server.
//!
//! Each test starts its own ledger on an ephemeral port and drives it
//! through a [`Book`] backed by [`HttpLedger`].

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use moneybook::book::Book;
use moneybook::remote::{HttpLedger, RemoteError, RemoteLedger};
use moneybook::sync::{PassReport, PassSummary, ReconcileOutcome};
use moneybook_ledger::server::{LedgerState, start_server_with_state};
use moneybook_ledger::store::LedgerTable;
use moneybook_proto::flat::FlatRecord;
use moneybook_proto::ledger::LEDGER_PATH;
use moneybook_proto::record::{Record, RecordDraft, RecordId, RecordPatch, SyncStatus};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    _dir: tempfile::TempDir,
    server: Arc<LedgerState>,
    book: Book<HttpLedger>,
}

async fn start_with(state: LedgerState) -> Harness {
    let server = Arc::new(state);
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&server))
        .await
        .unwrap();
    let endpoint = format!("http://{addr}{LEDGER_PATH}");
    let remote = HttpLedger::new(&endpoint, Duration::from_secs(5), Duration::from_secs(2)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let book = Book::open(dir.path(), Arc::new(remote), None).unwrap();
    Harness {
        _dir: dir,
        server,
        book,
    }
}

async fn start() -> Harness {
    start_with(LedgerState::new()).await
}

fn completed(report: PassReport) -> PassSummary {
    match report {
        PassReport::Completed(summary) => summary,
        PassReport::Skipped => panic!("pass was skipped"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_edit_delete_reach_the_server() {
    let h = start().await;

    let lunch = h
        .book
        .add(RecordDraft::new("Lunch", -12.0).with_tag("food").with_tag("work"))
        .unwrap();
    let typo = h.book.add(RecordDraft::new("Typo", 1.0)).unwrap();
    let summary = completed(h.book.sync().await);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(h.server.table.len().await, 2);

    let row = h.server.table.get(lunch.as_str()).await.unwrap();
    assert_eq!(row.tags, "food,work");
    assert_eq!(row.price, -12.0);

    h.book
        .edit(
            &lunch,
            RecordPatch {
                description: Some(Some("team lunch".into())),
                ..RecordPatch::amount(-15.0)
            },
        )
        .unwrap();
    h.book.delete(&typo).unwrap();
    let summary = completed(h.book.sync().await);
    assert_eq!(summary.succeeded, 2);

    let row = h.server.table.get(lunch.as_str()).await.unwrap();
    assert_eq!(row.price, -15.0);
    assert_eq!(row.description, "team lunch");
    assert!(h.server.table.get(typo.as_str()).await.is_none());
    assert_eq!(
        h.book.state().records().get(&lunch).unwrap().sync_status,
        SyncStatus::Synced
    );
}

#[tokio::test]
async fn maintenance_outage_is_retried() {
    let h = start().await;
    h.server.set_maintenance(true);

    let id = h.book.add(RecordDraft::new("Coffee", -3.5)).unwrap();
    let summary = completed(h.book.sync().await);
    assert_eq!(summary.failed, 1);
    let task = &h.book.state().queue().snapshot()[0];
    assert!(task.last_error.as_deref().unwrap().contains("503"));

    h.server.set_maintenance(false);
    let summary = completed(h.book.sync().await);
    assert_eq!(summary.succeeded, 1);
    assert!(h.server.table.get(id.as_str()).await.is_some());
}

#[tokio::test]
async fn update_of_row_missing_remotely_fails() {
    let h = start().await;
    let id = h.book.add(RecordDraft::new("Bus", -2.0)).unwrap();
    h.book.sync().await;
    assert!(h.server.table.delete(id.as_str()).await);

    h.book.edit(&id, RecordPatch::amount(-2.5)).unwrap();
    let summary = completed(h.book.sync().await);
    assert_eq!(summary.failed, 1);
    assert_eq!(
        h.book.state().records().get(&id).unwrap().sync_status,
        SyncStatus::Error
    );
}

#[tokio::test]
async fn delete_of_row_missing_remotely_succeeds() {
    let h = start().await;
    let id = h.book.add(RecordDraft::new("Gift", 50.0)).unwrap();
    h.book.sync().await;
    h.server.table.delete(id.as_str()).await;

    h.book.delete(&id).unwrap();
    let summary = completed(h.book.sync().await);
    assert_eq!(summary.succeeded, 1);
    assert!(h.book.state().queue().is_empty());
}

#[tokio::test]
async fn refresh_pulls_rows_from_other_clients() {
    let h = start().await;
    let foreign = Record::from_draft(RecordDraft::new("From phone", -20.0), chrono::Utc::now());
    h.server
        .table
        .upsert_batch(vec![FlatRecord::from_record(&foreign)])
        .await;
    let mine = h.book.add(RecordDraft::new("From laptop", -10.0)).unwrap();

    let outcome = h.book.refresh().await;
    let ReconcileOutcome::Merged { pass, merge } = outcome else {
        panic!("expected a merge, got {outcome:?}");
    };
    assert_eq!(pass.succeeded, 1);
    assert_eq!(merge.records, 2);

    let records = h.book.state().records();
    assert_eq!(records.get(&foreign.id).unwrap().name, "From phone");
    assert_eq!(records.get(&mine).unwrap().sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn oversized_batch_is_rejected_and_kept() {
    let h = start_with(LedgerState::with_config(1, 1024 * 1024, LedgerTable::new())).await;
    h.book.add(RecordDraft::new("a", 1.0)).unwrap();
    h.book.add(RecordDraft::new("b", 2.0)).unwrap();

    let summary = completed(h.book.sync().await);
    assert_eq!(summary.failed, 2);
    assert!(h.server.table.is_empty().await);
    assert_eq!(h.book.state().queue().len(), 2);
}

#[tokio::test]
async fn unreachable_server_is_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = HttpLedger::new(
        &format!("http://{addr}{LEDGER_PATH}"),
        Duration::from_secs(2),
        Duration::from_secs(1),
    )
    .unwrap();
    let result = remote.delete(&RecordId::from_string("x")).await;
    assert!(matches!(result, Err(RemoteError::Unreachable(_))));
}
