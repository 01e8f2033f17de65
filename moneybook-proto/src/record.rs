//! Local record model for `MoneyBook`.
//!
//! A [`Record`] is one financial transaction as the client sees it: the
//! user-editable fields plus a [`SyncStatus`] that tracks whether the last
//! local mutation has been confirmed by the remote ledger. The status never
//! crosses the wire; see [`crate::flat`] for the remote shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flat::normalize_tags;

/// Opaque, client-assigned identifier for a record.
///
/// New ids are UUID v7 strings so they sort roughly by creation time, but
/// any string received from the remote ledger is accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a fresh time-ordered identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an existing identifier string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the latest local state of a record is known to the remote ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// A local mutation is queued and has not been confirmed yet.
    Pending,
    /// The remote ledger holds this exact version.
    Synced,
    /// The last attempt to push a mutation for this record failed.
    Error,
}

impl SyncStatus {
    /// Returns `true` for statuses that carry unconfirmed local edits.
    #[must_use]
    pub const fn is_unconfirmed(self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Synced => write!(f, "synced"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One financial transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier, never changes after creation.
    pub id: RecordId,
    /// Short label shown in lists.
    pub name: String,
    /// Signed amount. Zero marks a planned, not yet confirmed entry.
    pub amount: f64,
    /// Free-text labels in user order. May contain duplicates.
    pub tags: Vec<String>,
    /// Optional longer note.
    pub description: Option<String>,
    /// When the transaction happened. Caller-settable for backdating.
    pub created_at: DateTime<Utc>,
    /// Last local modification.
    pub updated_at: DateTime<Utc>,
    /// Local sync state; never sent to the remote ledger.
    pub sync_status: SyncStatus,
}

impl Record {
    /// Builds a new pending record from user input.
    ///
    /// Assigns a fresh [`RecordId`]. `created_at` defaults to `now` unless the
    /// draft carries an explicit value.
    #[must_use]
    pub fn from_draft(draft: RecordDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            name: draft.name,
            amount: draft.amount,
            tags: normalize_tags(draft.tags),
            description: draft.description,
            created_at: draft.created_at.unwrap_or(now),
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Returns a copy with `patch` applied, `updated_at` bumped and the
    /// status reset to [`SyncStatus::Pending`].
    #[must_use]
    pub fn patched(&self, patch: RecordPatch, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(amount) = patch.amount {
            next.amount = amount;
        }
        if let Some(tags) = patch.tags {
            next.tags = normalize_tags(tags);
        }
        if let Some(description) = patch.description {
            next.description = description;
        }
        if let Some(created_at) = patch.created_at {
            next.created_at = created_at;
        }
        next.updated_at = now;
        next.sync_status = SyncStatus::Pending;
        next
    }
}

/// User input for a new record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    /// Record name.
    pub name: String,
    /// Signed amount.
    pub amount: f64,
    /// Labels in display order.
    pub tags: Vec<String>,
    /// Optional note.
    pub description: Option<String>,
    /// Backdated creation time, or `None` for "now".
    pub created_at: Option<DateTime<Utc>>,
}

impl RecordDraft {
    /// Starts a draft with a name and amount and no tags.
    pub fn new(name: impl Into<String>, amount: f64) -> Self {
        Self {
            name: name.into(),
            amount,
            ..Self::default()
        }
    }

    /// Adds a tag, keeping insertion order.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Backdates the record.
    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

/// Partial update for an existing record. `None` leaves a field unchanged.
///
/// `description` is doubly optional: `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// New name.
    pub name: Option<String>,
    /// New amount.
    pub amount: Option<f64>,
    /// Replacement tag list.
    pub tags: Option<Vec<String>>,
    /// New description, or `Some(None)` to clear it.
    pub description: Option<Option<String>>,
    /// New creation time.
    pub created_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    /// Patch that only changes the amount.
    #[must_use]
    pub fn amount(amount: f64) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }

    /// Returns `true` if the patch would change nothing but `updated_at`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.amount.is_none()
            && self.tags.is_none()
            && self.description.is_none()
            && self.created_at.is_none()
    }
}
