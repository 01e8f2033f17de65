//! Durable record store.
//!
//! Holds the visible set of records together with their [`SyncStatus`].
//! Every mutation writes the full snapshot before the in-memory copy is
//! swapped, so a failed write leaves the store exactly as it was and a
//! crash right after a successful call cannot lose the mutation.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Utc;
use moneybook_proto::record::{Record, RecordDraft, RecordId, RecordPatch, SyncStatus};
use parking_lot::Mutex;

use super::StoreError;
use super::snapshot::SnapshotFile;

/// Ordered collection of records persisted to a snapshot file.
///
/// The store does not sort. New records are placed first, which matches
/// how the list is usually displayed, but callers that need an order must
/// apply it themselves.
pub struct RecordStore {
    records: Mutex<Vec<Record>>,
    file: SnapshotFile<Record>,
}

impl RecordStore {
    /// Opens the store at `path`, loading any existing snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if an existing snapshot cannot be read or
    /// decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = SnapshotFile::new(path);
        let records = file.load()?;
        tracing::debug!(path = %file.path().display(), count = records.len(), "record store loaded");
        Ok(Self {
            records: Mutex::new(records),
            file,
        })
    }

    /// Creates a pending record from `draft` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    pub fn create(&self, draft: RecordDraft) -> Result<RecordId, StoreError> {
        let record = Record::from_draft(draft, Utc::now());
        let id = record.id.clone();
        self.insert(record)?;
        Ok(id)
    }

    /// Inserts a fully built record at the front of the list.
    pub(crate) fn insert(&self, record: Record) -> Result<(), StoreError> {
        self.mutate(|records| {
            records.insert(0, record);
            true
        })
        .map(|_| ())
    }

    /// Applies `patch` to the record with `id`.
    ///
    /// Returns the updated record, or `None` if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    pub fn update(&self, id: &RecordId, patch: RecordPatch) -> Result<Option<Record>, StoreError> {
        let Some(current) = self.get(id) else {
            return Ok(None);
        };
        let next = current.patched(patch, Utc::now());
        Ok(self.replace(next.clone())?.then_some(next))
    }

    /// Overwrites the record that has the same id as `record`.
    ///
    /// Returns `false` if no such record exists.
    pub(crate) fn replace(&self, record: Record) -> Result<bool, StoreError> {
        self.mutate(|records| {
            records
                .iter_mut()
                .find(|r| r.id == record.id)
                .map(|slot| *slot = record)
                .is_some()
        })
    }

    /// Removes the record with `id`. Returns `false` if it was not present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    pub fn delete(&self, id: &RecordId) -> Result<bool, StoreError> {
        self.mutate(|records| {
            let before = records.len();
            records.retain(|r| r.id != *id);
            records.len() != before
        })
    }

    /// Marks the given records as confirmed by the remote ledger.
    ///
    /// Unknown ids are ignored. Returns how many records changed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    pub fn mark_synced(&self, ids: &[RecordId]) -> Result<usize, StoreError> {
        self.set_status(ids, SyncStatus::Synced)
    }

    /// Marks the given records as failed to sync.
    ///
    /// Unknown ids are ignored. Returns how many records changed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    pub fn mark_error(&self, ids: &[RecordId]) -> Result<usize, StoreError> {
        self.set_status(ids, SyncStatus::Error)
    }

    pub(crate) fn set_status(&self, ids: &[RecordId], status: SyncStatus) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let wanted: HashSet<&RecordId> = ids.iter().collect();
        let mut changed = 0;
        self.mutate(|records| {
            for record in records.iter_mut() {
                if wanted.contains(&record.id) && record.sync_status != status {
                    record.sync_status = status;
                    changed += 1;
                }
            }
            changed > 0
        })?;
        Ok(changed)
    }

    /// Replaces the whole content, e.g. after a reconcile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    pub fn replace_all(&self, records: Vec<Record>) -> Result<(), StoreError> {
        self.mutate(move |current| {
            *current = records;
            true
        })
        .map(|_| ())
    }

    /// Returns a copy of the record with `id`.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.records.lock().iter().find(|r| r.id == *id).cloned()
    }

    /// Snapshot of every record in store order.
    #[must_use]
    pub fn list(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Runs `change` on a copy of the records and, if it reports a change,
    /// persists the copy and swaps it in. Returns what `change` returned.
    fn mutate<F>(&self, change: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Vec<Record>) -> bool,
    {
        let mut records = self.records.lock();
        let mut next = records.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        self.file.save(&next)?;
        *records = next;
        drop(records);
        Ok(true)
    }
}
