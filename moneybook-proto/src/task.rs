//! Pending sync tasks.
//!
//! Every local mutation produces one [`PendingTask`] describing the remote
//! call that will make the ledger agree with it. Tasks are replayed by the
//! sync engine and removed only once the remote call has been confirmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flat::FlatRecord;
use crate::record::{Record, RecordId};

/// Unique identifier for a task, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote operation a task replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncAction {
    /// Create the record remotely (sent in a batch).
    Add,
    /// Overwrite the remote row with the payload.
    Edit,
    /// Remove the remote row.
    Delete,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Edit => write!(f, "edit"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A queued, not yet confirmed remote mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    /// Identity of the task itself.
    pub id: TaskId,
    /// What to do remotely.
    pub action: SyncAction,
    /// Record this task mutates.
    pub target: RecordId,
    /// Record snapshot to send. `None` for deletes.
    pub payload: Option<FlatRecord>,
    /// When the task was queued.
    pub enqueued_at: DateTime<Utc>,
    /// Failed remote attempts so far.
    pub attempts: u32,
    /// Message from the most recent failure.
    pub last_error: Option<String>,
    /// Parked after too many failures; skipped until revived.
    pub dead: bool,
}

impl PendingTask {
    fn new(
        action: SyncAction,
        target: RecordId,
        payload: Option<FlatRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            action,
            target,
            payload,
            enqueued_at: now,
            attempts: 0,
            last_error: None,
            dead: false,
        }
    }

    /// Task that creates `record` remotely.
    #[must_use]
    pub fn add(record: &Record, now: DateTime<Utc>) -> Self {
        Self::new(
            SyncAction::Add,
            record.id.clone(),
            Some(FlatRecord::from_record(record)),
            now,
        )
    }

    /// Task that overwrites the remote row with `record`.
    #[must_use]
    pub fn edit(record: &Record, now: DateTime<Utc>) -> Self {
        Self::new(
            SyncAction::Edit,
            record.id.clone(),
            Some(FlatRecord::from_record(record)),
            now,
        )
    }

    /// Task that deletes `target` remotely.
    #[must_use]
    pub fn delete(target: RecordId, now: DateTime<Utc>) -> Self {
        Self::new(SyncAction::Delete, target, None, now)
    }
}
