//! Application-facing entry point tying local state to sync.
//!
//! A [`Book`] is what a front end holds: it applies mutations locally,
//! then nudges the scheduler (if one is running) so the change reaches the
//! remote ledger without the caller waiting for the network.

use std::path::Path;
use std::sync::Arc;

use moneybook_proto::record::{Record, RecordDraft, RecordId, RecordPatch, SyncStatus};
use tokio::sync::mpsc;

use crate::remote::RemoteLedger;
use crate::store::{LocalState, StoreError};
use crate::sync::{
    PassReport, ReconcileOutcome, Reconciler, Scheduler, SchedulerConfig, SchedulerHandle,
    SyncEngine, SyncEvent,
};

/// Counts shown next to the record list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookStatus {
    /// Records held locally.
    pub records: usize,
    /// Records with a queued, not yet attempted or retried change.
    pub pending: usize,
    /// Records whose last push failed.
    pub errored: usize,
    /// Tasks in the queue, dead ones included.
    pub queued: usize,
    /// Tasks parked after too many failures.
    pub dead: usize,
    /// `true` while a sync pass is running.
    pub syncing: bool,
}

impl BookStatus {
    /// Counts taken from `state`. `syncing` is left `false`.
    #[must_use]
    pub fn of(state: &LocalState) -> Self {
        let records = state.records().list();
        let count = |status| records.iter().filter(|r| r.sync_status == status).count();
        Self {
            records: records.len(),
            pending: count(SyncStatus::Pending),
            errored: count(SyncStatus::Error),
            queued: state.queue().len(),
            dead: state.queue().dead_count(),
            syncing: false,
        }
    }
}

/// Local records plus the machinery that syncs them.
pub struct Book<L> {
    state: Arc<LocalState>,
    engine: Arc<SyncEngine<L>>,
    reconciler: Reconciler<L>,
    scheduler: Option<SchedulerHandle>,
}

impl<L: RemoteLedger + 'static> Book<L> {
    /// Builds a book over already opened local state.
    pub fn new(state: Arc<LocalState>, remote: Arc<L>, max_attempts: Option<u32>) -> Self {
        let engine = Arc::new(SyncEngine::new(Arc::clone(&state), remote, max_attempts));
        Self {
            state,
            reconciler: Reconciler::new(Arc::clone(&engine)),
            engine,
            scheduler: None,
        }
    }

    /// Opens the local state under `data_dir` and builds a book over it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the local snapshots cannot be loaded.
    pub fn open(data_dir: &Path, remote: Arc<L>, max_attempts: Option<u32>) -> Result<Self, StoreError> {
        let state = Arc::new(LocalState::open(data_dir)?);
        Ok(Self::new(state, remote, max_attempts))
    }

    /// Starts the background scheduler and routes later triggers through it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_scheduler(&mut self, config: SchedulerConfig) -> (Scheduler, mpsc::Receiver<SyncEvent>) {
        let (scheduler, events) = Scheduler::spawn(Arc::clone(&self.engine), config);
        self.scheduler = Some(scheduler.handle());
        (scheduler, events)
    }

    /// Local state behind this book.
    #[must_use]
    pub const fn state(&self) -> &Arc<LocalState> {
        &self.state
    }

    /// Records a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the change cannot be persisted.
    pub fn add(&self, draft: RecordDraft) -> Result<RecordId, StoreError> {
        let id = self.state.create(draft)?;
        self.trigger();
        Ok(id)
    }

    /// Applies `patch` to a transaction. `None` if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the change cannot be persisted.
    pub fn edit(&self, id: &RecordId, patch: RecordPatch) -> Result<Option<Record>, StoreError> {
        let updated = self.state.update(id, patch)?;
        if updated.is_some() {
            self.trigger();
        }
        Ok(updated)
    }

    /// Deletes a transaction. `false` if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the change cannot be persisted.
    pub fn delete(&self, id: &RecordId) -> Result<bool, StoreError> {
        let deleted = self.state.delete(id)?;
        if deleted {
            self.trigger();
        }
        Ok(deleted)
    }

    /// Every record, newest first by creation date.
    #[must_use]
    pub fn list(&self) -> Vec<Record> {
        let mut records = self.state.records().list();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Current counts.
    #[must_use]
    pub fn status(&self) -> BookStatus {
        BookStatus {
            syncing: self.engine.is_running(),
            ..BookStatus::of(&self.state)
        }
    }

    /// Runs one sync pass and waits for it.
    pub async fn sync(&self) -> PassReport {
        if let Some(handle) = &self.scheduler {
            if let Some(report) = handle.sync_now().await {
                return report;
            }
        }
        self.engine.run_once().await
    }

    /// Pushes queued changes, then pulls and merges the remote ledger.
    pub async fn refresh(&self) -> ReconcileOutcome {
        if let Some(handle) = &self.scheduler {
            if let Some(outcome) = handle.refresh().await {
                return outcome;
            }
        }
        self.reconciler.reconcile().await
    }

    /// Revives parked tasks and requests a pass. Returns how many were
    /// revived.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the queue cannot be written.
    pub fn retry_dead(&self) -> Result<usize, StoreError> {
        let revived = self.state.revive_dead()?;
        if revived > 0 {
            self.trigger();
        }
        Ok(revived)
    }

    fn trigger(&self) {
        if let Some(handle) = &self.scheduler {
            handle.trigger();
        }
    }
}
