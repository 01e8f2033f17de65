//! Durable queue of not yet confirmed remote mutations.

use std::collections::HashSet;
use std::path::PathBuf;

use moneybook_proto::record::RecordId;
use moneybook_proto::task::{PendingTask, SyncAction, TaskId};
use parking_lot::Mutex;

use super::StoreError;
use super::snapshot::SnapshotFile;

/// Append-only log of [`PendingTask`]s, persisted on every change.
///
/// Tasks leave the queue only through [`TaskQueue::dequeue_completed`].
pub struct TaskQueue {
    tasks: Mutex<Vec<PendingTask>>,
    file: SnapshotFile<PendingTask>,
}

impl TaskQueue {
    /// Opens the queue at `path`, loading any existing snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if an existing snapshot cannot be read or
    /// decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = SnapshotFile::new(path);
        let tasks = file.load()?;
        tracing::debug!(path = %file.path().display(), count = tasks.len(), "task queue loaded");
        Ok(Self {
            tasks: Mutex::new(tasks),
            file,
        })
    }

    /// Appends `task` and persists the queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written; the task is
    /// then not queued.
    pub fn enqueue(&self, task: PendingTask) -> Result<(), StoreError> {
        tracing::debug!(task_id = %task.id, action = %task.action, target = %task.target, "task enqueued");
        self.mutate(|tasks| {
            tasks.push(task);
            true
        })
        .map(|_| ())
    }

    /// Removes the tasks with the given ids in one write.
    ///
    /// Unknown ids are ignored, so completing a task twice is harmless.
    /// Returns how many tasks were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    pub fn dequeue_completed(&self, ids: &[TaskId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let done: HashSet<&TaskId> = ids.iter().collect();
        let mut removed = 0;
        self.mutate(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| !done.contains(&t.id));
            removed = before - tasks.len();
            removed > 0
        })?;
        Ok(removed)
    }

    /// Records one failed attempt per task in `failures`.
    ///
    /// A task whose attempt count reaches `max_attempts` is parked as dead.
    /// Returns how many tasks became dead in this call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    pub fn record_failures(
        &self,
        failures: &[(TaskId, String)],
        max_attempts: Option<u32>,
    ) -> Result<usize, StoreError> {
        if failures.is_empty() {
            return Ok(0);
        }
        let mut newly_dead = 0;
        self.mutate(|tasks| {
            let mut touched = false;
            for (id, reason) in failures {
                let Some(task) = tasks.iter_mut().find(|t| t.id == *id) else {
                    continue;
                };
                task.attempts = task.attempts.saturating_add(1);
                task.last_error = Some(reason.clone());
                if !task.dead && max_attempts.is_some_and(|max| task.attempts >= max) {
                    task.dead = true;
                    newly_dead += 1;
                    tracing::warn!(
                        task_id = %task.id,
                        target = %task.target,
                        attempts = task.attempts,
                        "task parked after repeated failures"
                    );
                }
                touched = true;
            }
            touched
        })?;
        Ok(newly_dead)
    }

    /// Clears the dead flag and attempt counter of every parked task.
    /// Returns how many tasks were revived.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    pub fn revive_dead(&self) -> Result<usize, StoreError> {
        let mut revived = 0;
        self.mutate(|tasks| {
            for task in tasks.iter_mut().filter(|t| t.dead) {
                task.dead = false;
                task.attempts = 0;
                revived += 1;
            }
            revived > 0
        })?;
        Ok(revived)
    }

    /// Full ordered content of the queue. Does not drain it.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PendingTask> {
        self.tasks.lock().clone()
    }

    /// Returns `true` if any task, live or dead, targets `id`.
    #[must_use]
    pub fn has_tasks_for(&self, id: &RecordId) -> bool {
        self.tasks.lock().iter().any(|t| t.target == *id)
    }

    /// Targets of every queued delete.
    #[must_use]
    pub fn pending_deletes(&self) -> HashSet<RecordId> {
        self.tasks
            .lock()
            .iter()
            .filter(|t| t.action == SyncAction::Delete)
            .map(|t| t.target.clone())
            .collect()
    }

    /// Number of queued tasks, dead ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Number of parked tasks.
    #[must_use]
    pub fn dead_count(&self) -> usize {
        self.tasks.lock().iter().filter(|t| t.dead).count()
    }

    /// Returns `true` if at least one task would be sent by the next pass.
    #[must_use]
    pub fn has_live_tasks(&self) -> bool {
        self.tasks.lock().iter().any(|t| !t.dead)
    }

    fn mutate<F>(&self, change: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Vec<PendingTask>) -> bool,
    {
        let mut tasks = self.tasks.lock();
        let mut next = tasks.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        self.file.save(&next)?;
        *tasks = next;
        drop(tasks);
        Ok(true)
    }
}
