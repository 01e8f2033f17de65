//! In-process remote ledger for tests and offline demos.
//!
//! Behaves like the reference ledger server (batch create upserts, update
//! of an unknown id is a 404, delete of an unknown id succeeds) and can be
//! switched offline or told to fail individual calls. Every call is logged
//! so tests can assert on grouping and ordering.

use std::collections::HashSet;
use std::time::Duration;

use moneybook_proto::flat::FlatRecord;
use moneybook_proto::record::RecordId;
use parking_lot::Mutex;

use super::{RemoteError, RemoteLedger};

/// One call received by a [`MemoryLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    /// `fetch_all`.
    FetchAll,
    /// `create_batch` with these ids, in order.
    CreateBatch(Vec<String>),
    /// `update` of this id.
    Update(String),
    /// `delete` of this id.
    Delete(String),
}

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    fail_fetch: bool,
    malformed_fetch: bool,
    fail_create: bool,
    fail_update: HashSet<String>,
    fail_delete: HashSet<String>,
}

/// Remote ledger that keeps its rows in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    rows: Mutex<Vec<FlatRecord>>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<LedgerCall>>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryLedger {
    /// Creates an empty, healthy ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger that already holds `rows`.
    #[must_use]
    pub fn with_rows(rows: Vec<FlatRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    /// Makes every call fail as unreachable while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().offline = offline;
    }

    /// Makes `fetch_all` fail.
    pub fn fail_fetch(&self, fail: bool) {
        self.faults.lock().fail_fetch = fail;
    }

    /// Makes `fetch_all` answer with an undecodable body.
    pub fn malformed_fetch(&self, malformed: bool) {
        self.faults.lock().malformed_fetch = malformed;
    }

    /// Makes `create_batch` fail.
    pub fn fail_create(&self, fail: bool) {
        self.faults.lock().fail_create = fail;
    }

    /// Makes `update` of `id` fail until [`MemoryLedger::heal`].
    pub fn fail_update_of(&self, id: &RecordId) {
        self.faults.lock().fail_update.insert(id.as_str().to_string());
    }

    /// Makes `delete` of `id` fail until [`MemoryLedger::heal`].
    pub fn fail_delete_of(&self, id: &RecordId) {
        self.faults.lock().fail_delete.insert(id.as_str().to_string());
    }

    /// Clears every injected fault.
    pub fn heal(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Current rows in ledger order.
    #[must_use]
    pub fn rows(&self) -> Vec<FlatRecord> {
        self.rows.lock().clone()
    }

    /// Row with `id`, if present.
    #[must_use]
    pub fn row(&self, id: &RecordId) -> Option<FlatRecord> {
        self.rows.lock().iter().find(|r| r.id == id.as_str()).cloned()
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().clone()
    }

    /// Forgets the call log.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Writes a row directly, bypassing the call log and faults.
    pub fn put_row(&self, row: FlatRecord) {
        upsert(&mut self.rows.lock(), row);
    }

    async fn enter(&self, call: LedgerCall) -> Result<(), RemoteError> {
        self.calls.lock().push(call);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.faults.lock().offline {
            return Err(RemoteError::Unreachable("memory ledger is offline".into()));
        }
        Ok(())
    }
}

fn upsert(rows: &mut Vec<FlatRecord>, row: FlatRecord) {
    match rows.iter_mut().find(|r| r.id == row.id) {
        Some(slot) => *slot = row,
        None => rows.push(row),
    }
}

fn injected(status: u16) -> RemoteError {
    RemoteError::Status {
        status,
        message: "injected failure".into(),
    }
}

impl RemoteLedger for MemoryLedger {
    async fn fetch_all(&self) -> Result<Vec<FlatRecord>, RemoteError> {
        self.enter(LedgerCall::FetchAll).await?;
        let (fail, malformed) = {
            let faults = self.faults.lock();
            (faults.fail_fetch, faults.malformed_fetch)
        };
        if fail {
            return Err(injected(500));
        }
        if malformed {
            return Err(RemoteError::Malformed("expected an array of rows".into()));
        }
        Ok(self.rows())
    }

    async fn create_batch(&self, records: &[FlatRecord]) -> Result<(), RemoteError> {
        let ids = records.iter().map(|r| r.id.clone()).collect();
        self.enter(LedgerCall::CreateBatch(ids)).await?;
        if self.faults.lock().fail_create {
            return Err(injected(500));
        }
        let mut rows = self.rows.lock();
        for record in records {
            upsert(&mut rows, record.clone());
        }
        Ok(())
    }

    async fn update(&self, record: &FlatRecord) -> Result<(), RemoteError> {
        self.enter(LedgerCall::Update(record.id.clone())).await?;
        if self.faults.lock().fail_update.contains(&record.id) {
            return Err(injected(500));
        }
        let mut rows = self.rows.lock();
        let Some(slot) = rows.iter_mut().find(|r| r.id == record.id) else {
            return Err(RemoteError::Status {
                status: 404,
                message: format!("no row with id {}", record.id),
            });
        };
        *slot = record.clone();
        Ok(())
    }

    async fn delete(&self, id: &RecordId) -> Result<(), RemoteError> {
        self.enter(LedgerCall::Delete(id.as_str().to_string())).await?;
        if self.faults.lock().fail_delete.contains(id.as_str()) {
            return Err(injected(500));
        }
        self.rows.lock().retain(|r| r.id != id.as_str());
        Ok(())
    }
}
