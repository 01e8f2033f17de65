//! Integration tests for the background sync scheduler.
//!
//! Uses short intervals so timer-driven passes happen within the test.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use moneybook::book::Book;
use moneybook::remote::MemoryLedger;
use moneybook::sync::{PassReport, ReconcileOutcome, SchedulerConfig, SyncEvent};
use moneybook_proto::record::{RecordDraft, SyncStatus};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        interval: Duration::from_millis(20),
        backoff_factor: 1.5,
        max_backoff: Duration::from_millis(100),
        ..SchedulerConfig::default()
    }
}

fn book() -> (tempfile::TempDir, Arc<MemoryLedger>, Book<MemoryLedger>) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let book = Book::open(dir.path(), Arc::clone(&ledger), None).unwrap();
    (dir, ledger, book)
}

/// Waits for the first event matching `pred`, failing after five seconds.
async fn wait_for(
    events: &mut mpsc::Receiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("scheduler stopped");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn clean_pass(event: &SyncEvent) -> bool {
    matches!(event, SyncEvent::Pass(PassReport::Completed(s)) if !s.had_failures())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timer_retries_until_ledger_returns() {
    let (_dir, ledger, mut book) = book();
    ledger.set_offline(true);
    let (scheduler, mut events) = book.start_scheduler(fast_config());

    let id = book.add(RecordDraft::new("Lunch", -8.0)).unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SyncEvent::Pass(PassReport::Completed(s)) if s.failed == 1)
    })
    .await;
    assert_eq!(
        book.state().records().get(&id).unwrap().sync_status,
        SyncStatus::Error
    );

    ledger.set_offline(false);
    wait_for(&mut events, clean_pass).await;
    assert!(ledger.row(&id).is_some());
    assert!(book.state().queue().is_empty());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn idle_queue_makes_no_remote_calls() {
    let (_dir, ledger, mut book) = book();
    let (scheduler, _events) = book.start_scheduler(fast_config());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(ledger.calls().is_empty());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn sync_and_refresh_go_through_the_scheduler() {
    let (_dir, ledger, mut book) = book();
    let config = SchedulerConfig {
        interval: Duration::from_secs(3600),
        ..SchedulerConfig::default()
    };
    let (scheduler, mut events) = book.start_scheduler(config);

    let id = book.add(RecordDraft::new("Rent", -800.0)).unwrap();
    let report = book.sync().await;
    assert!(matches!(report, PassReport::Completed(_)));
    assert!(ledger.row(&id).is_some());

    let outcome = book.refresh().await;
    assert!(matches!(outcome, ReconcileOutcome::Merged { .. }));
    wait_for(&mut events, |e| matches!(e, SyncEvent::Reconciled(_))).await;

    scheduler.shutdown().await;
    // After shutdown the book falls back to running passes itself.
    assert!(matches!(book.sync().await, PassReport::Completed(_)));
}

#[tokio::test]
async fn shutdown_closes_event_channel() {
    let (_dir, _ledger, mut book) = book();
    let (scheduler, mut events) = book.start_scheduler(fast_config());
    scheduler.shutdown().await;

    let next = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap();
    assert!(next.is_none());
}
