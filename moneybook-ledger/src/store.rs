//! In-memory ledger table.
//!
//! Rows are kept in insertion order and keyed by their `id` string. Batch
//! create upserts, so replaying a batch whose first attempt was applied but
//! never acknowledged leaves the table unchanged.

use moneybook_proto::flat::FlatRecord;
use tokio::sync::RwLock;

/// Thread-safe, ordered set of ledger rows.
#[derive(Default)]
pub struct LedgerTable {
    rows: RwLock<Vec<FlatRecord>>,
}

impl LedgerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table pre-filled with `rows`.
    #[must_use]
    pub fn with_rows(rows: Vec<FlatRecord>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    /// Every row in insertion order.
    pub async fn all(&self) -> Vec<FlatRecord> {
        self.rows.read().await.clone()
    }

    /// Row with `id`, if present.
    pub async fn get(&self, id: &str) -> Option<FlatRecord> {
        self.rows.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Number of rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Returns `true` if the table holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Inserts or replaces each row by id. Returns how many rows were new.
    pub async fn upsert_batch(&self, batch: Vec<FlatRecord>) -> usize {
        let mut rows = self.rows.write().await;
        let mut inserted = 0;
        for row in batch {
            match rows.iter_mut().find(|r| r.id == row.id) {
                Some(slot) => *slot = row,
                None => {
                    rows.push(row);
                    inserted += 1;
                }
            }
        }
        drop(rows);
        inserted
    }

    /// Replaces the row with the same id. Returns `false` if there is none.
    pub async fn update(&self, row: FlatRecord) -> bool {
        let mut rows = self.rows.write().await;
        let Some(slot) = rows.iter_mut().find(|r| r.id == row.id) else {
            return false;
        };
        *slot = row;
        drop(rows);
        true
    }

    /// Removes the row with `id`. Returns `false` if there was none.
    pub async fn delete(&self, id: &str) -> bool {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        let removed = rows.len() != before;
        drop(rows);
        removed
    }
}
