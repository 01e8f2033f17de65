//! Sync engine: drains the pending task queue against the remote ledger.
//!
//! A pass works on a snapshot of the queue taken at its start, so tasks
//! enqueued while it runs wait for the next pass. Work is grouped by action
//! and sent in three phases:
//!
//! 1. every `add` payload in one batched create (all-or-nothing),
//! 2. `edit` tasks concurrently,
//! 3. `delete` tasks concurrently.
//!
//! Within a phase, tasks for the same record form a chain sent in enqueue
//! order. Once a task for a record fails, the record's remaining tasks in
//! the pass are deferred: they stay queued without being sent. A parked
//! task holds back the later tasks of its record the same way.
//!
//! Results are written back through [`LocalState::apply_pass`]. Remote
//! failures are logged and reported, never returned as errors.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use moneybook_proto::record::RecordId;
use moneybook_proto::task::{PendingTask, SyncAction, TaskId};

use crate::remote::{RemoteError, RemoteLedger};
use crate::store::{LocalState, PassResults};

/// Counts describing one completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Tasks sent to the remote ledger.
    pub attempted: usize,
    /// Tasks the ledger confirmed and that were dequeued.
    pub succeeded: usize,
    /// Tasks whose remote call failed.
    pub failed: usize,
    /// Tasks held back because an earlier task for their record failed.
    pub deferred: usize,
    /// Parked tasks skipped by this pass.
    pub dead_skipped: usize,
    /// Tasks that became dead as a result of this pass.
    pub parked: usize,
    /// `false` if writing the results to local state failed.
    pub applied: bool,
}

impl PassSummary {
    /// Returns `true` if any task failed or was deferred.
    #[must_use]
    pub const fn had_failures(&self) -> bool {
        self.failed > 0 || self.deferred > 0 || !self.applied
    }
}

/// Result of [`SyncEngine::run_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReport {
    /// Another pass was already running; nothing was done.
    Skipped,
    /// The pass ran to completion.
    Completed(PassSummary),
}

impl PassReport {
    /// Returns `true` if the pass did not run.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// Summary of a completed pass.
    #[must_use]
    pub const fn summary(&self) -> Option<&PassSummary> {
        match self {
            Self::Skipped => None,
            Self::Completed(summary) => Some(summary),
        }
    }
}

/// What happened to one task during a pass.
#[derive(Debug)]
enum Outcome {
    Done,
    Failed(String),
    Deferred,
}

/// Proof that the holder owns the engine's in-progress flag. Dropping it
/// releases the flag, however the holder exits.
pub(crate) struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays queued tasks against a [`RemoteLedger`].
///
/// At most one pass runs at a time per engine; a concurrent
/// [`run_once`](Self::run_once) returns [`PassReport::Skipped`] at once.
pub struct SyncEngine<L> {
    state: Arc<LocalState>,
    remote: Arc<L>,
    running: AtomicBool,
    max_attempts: Option<u32>,
}

impl<L: RemoteLedger> SyncEngine<L> {
    /// Creates an engine over `state` and `remote`.
    ///
    /// With `max_attempts` set, a task that fails that many times is parked
    /// until [`LocalState::revive_dead`] is called.
    pub const fn new(state: Arc<LocalState>, remote: Arc<L>, max_attempts: Option<u32>) -> Self {
        Self {
            state,
            remote,
            running: AtomicBool::new(false),
            max_attempts,
        }
    }

    /// Local state this engine writes to.
    #[must_use]
    pub const fn state(&self) -> &Arc<LocalState> {
        &self.state
    }

    /// Remote ledger this engine sends to.
    #[must_use]
    pub const fn remote(&self) -> &Arc<L> {
        &self.remote
    }

    /// Returns `true` while a pass is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one sync pass over the current queue snapshot.
    pub async fn run_once(&self) -> PassReport {
        let Some(held) = self.try_begin() else {
            tracing::debug!("sync pass already running, skipping");
            return PassReport::Skipped;
        };
        PassReport::Completed(self.run_pass(&held).await)
    }

    /// Claims the in-progress flag, or returns `None` if a pass is running.
    pub(crate) fn try_begin(&self) -> Option<PassGuard<'_>> {
        PassGuard::acquire(&self.running)
    }

    /// Runs a pass while the caller holds the in-progress flag.
    pub(crate) async fn run_pass(&self, _held: &PassGuard<'_>) -> PassSummary {
        let (live, dead): (Vec<PendingTask>, Vec<PendingTask>) = self
            .state
            .queue()
            .snapshot()
            .into_iter()
            .partition(|t| !t.dead);
        let mut summary = PassSummary {
            dead_skipped: dead.len(),
            applied: true,
            ..PassSummary::default()
        };
        if live.is_empty() {
            return summary;
        }
        tracing::debug!(tasks = live.len(), dead = dead.len(), "sync pass started");

        let mut results = PassResults::default();
        let mut blocked: HashSet<RecordId> = dead.iter().map(|t| t.target.clone()).collect();

        let adds: Vec<&PendingTask> = live.iter().filter(|t| t.action == SyncAction::Add).collect();
        let outcomes = self.send_adds(&adds).await;
        collect(&adds, outcomes, &mut results, &mut blocked, &mut summary);

        for action in [SyncAction::Edit, SyncAction::Delete] {
            let tasks: Vec<&PendingTask> = live.iter().filter(|t| t.action == action).collect();
            let chains = chains_by_target(&tasks);
            let futures = chains.iter().map(|chain| self.send_chain(chain, &blocked));
            let outcomes = join_all(futures).await;
            for (chain, chain_outcomes) in chains.iter().zip(outcomes) {
                collect(chain, chain_outcomes, &mut results, &mut blocked, &mut summary);
            }
        }

        match self.state.apply_pass(&results, self.max_attempts) {
            Ok(applied) => {
                summary.succeeded = applied.dequeued;
                summary.parked = applied.parked;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to apply sync results");
                summary.applied = false;
            }
        }

        tracing::info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            deferred = summary.deferred,
            "sync pass finished"
        );
        summary
    }

    async fn send_adds(&self, adds: &[&PendingTask]) -> Vec<Outcome> {
        if adds.is_empty() {
            return Vec::new();
        }
        let payloads: Vec<_> = adds.iter().filter_map(|t| t.payload.clone()).collect();
        if payloads.len() != adds.len() {
            tracing::warn!("add task without payload, batch not sent");
            return adds
                .iter()
                .map(|_| Outcome::Failed("add task without payload".into()))
                .collect();
        }
        match self.remote.create_batch(&payloads).await {
            Ok(()) => adds.iter().map(|_| Outcome::Done).collect(),
            Err(e) => {
                tracing::warn!(error = %e, count = adds.len(), "batch create failed");
                let reason = e.to_string();
                adds.iter().map(|_| Outcome::Failed(reason.clone())).collect()
            }
        }
    }

    /// Sends the tasks of one record in order, stopping at the first failure.
    async fn send_chain(&self, chain: &[&PendingTask], blocked: &HashSet<RecordId>) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(chain.len());
        let mut failed = chain.first().is_some_and(|t| blocked.contains(&t.target));
        for task in chain {
            if failed {
                outcomes.push(Outcome::Deferred);
                continue;
            }
            match self.send(task).await {
                Ok(()) => outcomes.push(Outcome::Done),
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        action = %task.action,
                        target = %task.target,
                        error = %e,
                        "remote call failed"
                    );
                    outcomes.push(Outcome::Failed(e.to_string()));
                    failed = true;
                }
            }
        }
        outcomes
    }

    async fn send(&self, task: &PendingTask) -> Result<(), RemoteError> {
        match (task.action, &task.payload) {
            (SyncAction::Delete, _) => self.remote.delete(&task.target).await,
            (SyncAction::Edit, Some(payload)) => self.remote.update(payload).await,
            (SyncAction::Add, Some(payload)) => {
                self.remote.create_batch(std::slice::from_ref(payload)).await
            }
            (_, None) => Err(RemoteError::Malformed(format!(
                "{} task without payload",
                task.action
            ))),
        }
    }
}

/// Groups tasks by target, keeping first-seen target order and enqueue
/// order inside each group.
fn chains_by_target<'a>(tasks: &[&'a PendingTask]) -> Vec<Vec<&'a PendingTask>> {
    let mut chains: Vec<Vec<&PendingTask>> = Vec::new();
    for task in tasks {
        match chains.iter_mut().find(|c| c[0].target == task.target) {
            Some(chain) => chain.push(task),
            None => chains.push(vec![task]),
        }
    }
    chains
}

fn collect(
    tasks: &[&PendingTask],
    outcomes: Vec<Outcome>,
    results: &mut PassResults,
    blocked: &mut HashSet<RecordId>,
    summary: &mut PassSummary,
) {
    for (task, outcome) in tasks.iter().zip(outcomes) {
        let id: TaskId = task.id.clone();
        match outcome {
            Outcome::Done => {
                summary.attempted += 1;
                results.completed.push(id);
                results.confirmed.push(task.target.clone());
            }
            Outcome::Failed(reason) => {
                summary.attempted += 1;
                summary.failed += 1;
                results.failures.push((id, reason));
                results.failed.push(task.target.clone());
                blocked.insert(task.target.clone());
            }
            Outcome::Deferred => {
                summary.deferred += 1;
                results.failed.push(task.target.clone());
                blocked.insert(task.target.clone());
            }
        }
    }
}
