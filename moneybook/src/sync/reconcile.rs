//! Pull-and-merge of the remote snapshot with local optimistic state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use moneybook_proto::flat::FlatRecord;
use moneybook_proto::record::{Record, RecordId, SyncStatus};

use super::engine::{PassSummary, SyncEngine};
use crate::remote::RemoteLedger;

/// Counts describing one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Records in the local store after the merge.
    pub records: usize,
    /// Unconfirmed local records kept over the remote version or added
    /// because the remote does not know them yet.
    pub kept_local: usize,
    /// Remote rows dropped because a local delete is still queued.
    pub dropped_deleted: usize,
}

/// Result of [`Reconciler::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The local store now mirrors the remote plus unconfirmed local edits.
    Merged {
        /// The sync pass that ran first.
        pass: PassSummary,
        /// What the merge did.
        merge: MergeSummary,
    },
    /// A sync pass was already running; nothing was done.
    Skipped,
    /// The pull failed; local state is untouched.
    Aborted {
        /// The sync pass that ran first.
        pass: PassSummary,
        /// Why the pull was abandoned.
        reason: String,
    },
}

/// Merges remote `rows` with `local` records.
///
/// Remote records come back as synced, except those with unconfirmed
/// local edits, which are kept verbatim. Unconfirmed local records the
/// remote does not know are added. Rows whose id is in `deleting` are
/// dropped. The result is ordered newest first by `created_at`; ties keep
/// their relative order.
#[must_use]
pub fn merge(
    local: &[Record],
    remote: Vec<Record>,
    deleting: &HashSet<RecordId>,
) -> (Vec<Record>, MergeSummary) {
    let mut unconfirmed: HashMap<&RecordId, &Record> = local
        .iter()
        .filter(|r| r.sync_status.is_unconfirmed())
        .map(|r| (&r.id, r))
        .collect();
    let mut summary = MergeSummary::default();

    let mut merged = Vec::with_capacity(remote.len() + unconfirmed.len());
    for mut record in remote {
        if deleting.contains(&record.id) {
            summary.dropped_deleted += 1;
            continue;
        }
        if let Some(mine) = unconfirmed.remove(&record.id) {
            merged.push(mine.clone());
            summary.kept_local += 1;
        } else {
            record.sync_status = SyncStatus::Synced;
            merged.push(record);
        }
    }

    // Local-only records go first, in their local order.
    let local_only: Vec<Record> = local
        .iter()
        .filter(|r| unconfirmed.contains_key(&r.id))
        .cloned()
        .collect();
    summary.kept_local += local_only.len();
    merged.splice(0..0, local_only);

    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    summary.records = merged.len();
    (merged, summary)
}

fn decode(rows: Vec<FlatRecord>) -> Result<Vec<Record>, String> {
    rows.into_iter()
        .map(|row| {
            let id = row.id.clone();
            row.into_record(SyncStatus::Synced)
                .map_err(|e| format!("row {id:?}: {e}"))
        })
        .collect()
}

/// Runs a sync pass, then replaces local records with the merged remote
/// snapshot.
pub struct Reconciler<L> {
    engine: Arc<SyncEngine<L>>,
}

impl<L: RemoteLedger> Reconciler<L> {
    /// Creates a reconciler driving `engine`.
    pub const fn new(engine: Arc<SyncEngine<L>>) -> Self {
        Self { engine }
    }

    /// Pushes queued work, pulls the remote snapshot and merges it.
    ///
    /// The engine's in-progress flag is held throughout, so no other pass
    /// can apply results between the fetch and the merge. The merge and the
    /// replace run under the local write gate.
    pub async fn reconcile(&self) -> ReconcileOutcome {
        let Some(held) = self.engine.try_begin() else {
            tracing::debug!("sync pass already running, reconcile skipped");
            return ReconcileOutcome::Skipped;
        };
        let pass = self.engine.run_pass(&held).await;

        let rows = match self.engine.remote().fetch_all().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "reconcile aborted: fetch failed");
                return ReconcileOutcome::Aborted {
                    pass,
                    reason: e.to_string(),
                };
            }
        };
        let remote = match decode(rows) {
            Ok(remote) => remote,
            Err(reason) => {
                tracing::warn!(%reason, "reconcile aborted: malformed remote row");
                return ReconcileOutcome::Aborted { pass, reason };
            }
        };

        let state = self.engine.state();
        let _gate = state.lock();
        let local = state.records().list();
        let deleting = state.queue().pending_deletes();
        let (merged, summary) = merge(&local, remote, &deleting);
        if let Err(e) = state.records().replace_all(merged) {
            tracing::error!(error = %e, "reconcile aborted: could not persist merge");
            return ReconcileOutcome::Aborted {
                pass,
                reason: e.to_string(),
            };
        }
        drop(held);
        tracing::info!(
            records = summary.records,
            kept_local = summary.kept_local,
            dropped_deleted = summary.dropped_deleted,
            "reconcile finished"
        );
        ReconcileOutcome::Merged {
            pass,
            merge: summary,
        }
    }
}
