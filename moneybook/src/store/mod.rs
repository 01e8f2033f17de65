//! Durable local state: the record store and the pending task queue.
//!
//! [`LocalState`] owns both and is the only way user mutations should
//! reach them. Every mutation queues its task before touching the record
//! store. A failed store write takes the task back out; a crash between
//! the two writes is repaired when the state is next opened.

pub mod queue;
pub mod records;
pub mod snapshot;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use moneybook_proto::codec::CodecError;
use moneybook_proto::record::{Record, RecordDraft, RecordId, RecordPatch, SyncStatus};
use moneybook_proto::task::{PendingTask, SyncAction, TaskId};
use parking_lot::{Mutex, MutexGuard};

pub use queue::TaskQueue;
pub use records::RecordStore;

/// File name of the record snapshot inside the data directory.
pub const RECORDS_FILE: &str = "records.snapshot";

/// File name of the task queue snapshot inside the data directory.
pub const TASKS_FILE: &str = "tasks.snapshot";

/// Errors from the durable local state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filesystem operation on a snapshot failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Snapshot the operation was for.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A snapshot exists but cannot be decoded.
    #[error("corrupt snapshot {}: {source}", path.display())]
    Corrupt {
        /// Snapshot that failed to decode.
        path: PathBuf,
        /// Decoder error.
        source: CodecError,
    },

    /// In-memory state could not be serialized.
    #[error("failed to encode snapshot: {0}")]
    Encode(CodecError),

    /// An amount is NaN or infinite.
    #[error("amount {0} is not a finite number")]
    NonFiniteAmount(f64),
}

/// Counts of what [`LocalState::apply_pass`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// Tasks removed from the queue.
    pub dequeued: usize,
    /// Records flipped to synced.
    pub synced: usize,
    /// Records flipped to error.
    pub errored: usize,
    /// Tasks parked as dead by this application.
    pub parked: usize,
}

/// Outcome of one sync pass, ready to be written to local state.
#[derive(Debug, Default)]
pub struct PassResults {
    /// Tasks the remote ledger confirmed.
    pub completed: Vec<TaskId>,
    /// Targets of the confirmed tasks.
    pub confirmed: Vec<RecordId>,
    /// Tasks that failed or were deferred, with the reason.
    pub failures: Vec<(TaskId, String)>,
    /// Targets of the failed tasks.
    pub failed: Vec<RecordId>,
}

/// Record store and task queue behind one write gate.
///
/// The gate serializes compound operations that touch both halves: user
/// mutations, the application of a sync pass, and the reconcile merge.
/// It is a plain mutex and is never held across an `.await`.
pub struct LocalState {
    records: RecordStore,
    queue: TaskQueue,
    gate: Mutex<()>,
}

impl LocalState {
    /// Opens (or creates) the local state under `data_dir`.
    ///
    /// Statuses that disagree with the queue, which only a crash between
    /// the two writes can produce, are repaired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either snapshot is unreadable or the repair
    /// cannot be persisted.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let state = Self {
            records: RecordStore::open(data_dir.join(RECORDS_FILE))?,
            queue: TaskQueue::open(data_dir.join(TASKS_FILE))?,
            gate: Mutex::new(()),
        };
        state.heal_statuses()?;
        tracing::info!(
            data_dir = %data_dir.display(),
            records = state.records.len(),
            tasks = state.queue.len(),
            "local state opened"
        );
        Ok(state)
    }

    /// Read access to the record store.
    #[must_use]
    pub const fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Read access to the task queue.
    #[must_use]
    pub const fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Takes the write gate.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock()
    }

    /// Creates a pending record and queues its `add` task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either write fails.
    pub fn create(&self, draft: RecordDraft) -> Result<RecordId, StoreError> {
        check_amount(draft.amount)?;
        let _gate = self.lock();
        let record = Record::from_draft(draft, Utc::now());
        let id = record.id.clone();
        let task = PendingTask::add(&record, Utc::now());
        self.queued(task, || self.records.insert(record))?;
        tracing::info!(record_id = %id, "record created");
        Ok(id)
    }

    /// Patches a record and queues an `edit` task with the merged result.
    ///
    /// Returns `None` (and queues nothing) if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either write fails.
    pub fn update(&self, id: &RecordId, patch: RecordPatch) -> Result<Option<Record>, StoreError> {
        if let Some(amount) = patch.amount {
            check_amount(amount)?;
        }
        let _gate = self.lock();
        let Some(current) = self.records.get(id) else {
            tracing::debug!(record_id = %id, "update of unknown record ignored");
            return Ok(None);
        };
        let next = current.patched(patch, Utc::now());
        let task = PendingTask::edit(&next, Utc::now());
        self.queued(task, || self.records.replace(next.clone()))?;
        tracing::info!(record_id = %id, "record updated");
        Ok(Some(next))
    }

    /// Removes a record locally and queues its `delete` task.
    ///
    /// Returns `false` (and queues nothing) if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either write fails.
    pub fn delete(&self, id: &RecordId) -> Result<bool, StoreError> {
        let _gate = self.lock();
        if self.records.get(id).is_none() {
            tracing::debug!(record_id = %id, "delete of unknown record ignored");
            return Ok(false);
        }
        let task = PendingTask::delete(id.clone(), Utc::now());
        self.queued(task, || self.records.delete(id))?;
        tracing::info!(record_id = %id, "record deleted");
        Ok(true)
    }

    /// Clears the dead flag on every parked task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the queue cannot be written.
    pub fn revive_dead(&self) -> Result<usize, StoreError> {
        let _gate = self.lock();
        self.queue.revive_dead()
    }

    /// Writes the results of a sync pass.
    ///
    /// Failures are recorded and their targets flipped to error while the
    /// tasks stay queued. Confirmed tasks are then dequeued, and a confirmed
    /// target becomes synced only if nothing failed for it and nothing for it
    /// is still queued (a task enqueued while the pass was in flight keeps
    /// the record pending).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a write fails; earlier writes stay applied.
    pub fn apply_pass(
        &self,
        results: &PassResults,
        max_attempts: Option<u32>,
    ) -> Result<Applied, StoreError> {
        let _gate = self.lock();
        let mut applied = Applied {
            parked: self.queue.record_failures(&results.failures, max_attempts)?,
            errored: self.records.mark_error(&results.failed)?,
            ..Applied::default()
        };
        applied.dequeued = self.queue.dequeue_completed(&results.completed)?;

        let failed: HashSet<&RecordId> = results.failed.iter().collect();
        let mut seen = HashSet::new();
        let synced: Vec<RecordId> = results
            .confirmed
            .iter()
            .filter(|id| !failed.contains(id) && seen.insert(*id))
            .filter(|id| !self.queue.has_tasks_for(id))
            .cloned()
            .collect();
        applied.synced = self.records.mark_synced(&synced)?;
        Ok(applied)
    }

    /// Queues `task`, then runs `write`. If the write fails the task is
    /// withdrawn so nothing is pushed for a change that did not land.
    fn queued<T>(
        &self,
        task: PendingTask,
        write: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let task_id = task.id.clone();
        self.queue.enqueue(task)?;
        write().inspect_err(|e| {
            tracing::warn!(task_id = %task_id, error = %e, "record write failed, withdrawing task");
            if let Err(rollback) = self.queue.dequeue_completed(std::slice::from_ref(&task_id)) {
                // Left for the next open to drop.
                tracing::error!(task_id = %task_id, error = %rollback, "failed to withdraw task");
            }
        })
    }

    /// Drops `add` and `edit` tasks whose record is gone and has no delete
    /// queued after them.
    fn drop_stale_tasks(&self) -> Result<(), StoreError> {
        let tasks = self.queue.snapshot();
        let stale: Vec<TaskId> = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.action != SyncAction::Delete)
            .filter(|(_, t)| self.records.get(&t.target).is_none())
            .filter(|(i, t)| {
                !tasks[i + 1..]
                    .iter()
                    .any(|later| later.target == t.target && later.action == SyncAction::Delete)
            })
            .map(|(_, t)| t.id.clone())
            .collect();
        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "tasks for missing records dropped");
            self.queue.dequeue_completed(&stale)?;
        }
        Ok(())
    }

    fn heal_statuses(&self) -> Result<(), StoreError> {
        self.drop_stale_tasks()?;
        let mut orphaned = Vec::new();
        let mut unmarked = Vec::new();
        for record in self.records.list() {
            let queued = self.queue.has_tasks_for(&record.id);
            match (record.sync_status.is_unconfirmed(), queued) {
                (true, false) => orphaned.push(record.id),
                (false, true) => unmarked.push(record.id),
                _ => {}
            }
        }
        if !orphaned.is_empty() {
            tracing::warn!(count = orphaned.len(), "unconfirmed records without tasks marked synced");
            self.records.mark_synced(&orphaned)?;
        }
        if !unmarked.is_empty() {
            tracing::warn!(count = unmarked.len(), "synced records with queued tasks marked pending");
            self.records.set_status(&unmarked, SyncStatus::Pending)?;
        }
        Ok(())
    }
}

fn check_amount(amount: f64) -> Result<(), StoreError> {
    if amount.is_finite() {
        Ok(())
    } else {
        Err(StoreError::NonFiniteAmount(amount))
    }
}
