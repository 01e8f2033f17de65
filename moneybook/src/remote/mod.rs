//! Remote ledger abstraction.
//!
//! The remote ledger is the authoritative store the client syncs against.
//! It supports exactly four operations: fetch everything, create a batch,
//! update one row and delete one row. [`HttpLedger`] talks to a real
//! endpoint; [`MemoryLedger`] keeps rows in process and can be told to fail.

pub mod http;
pub mod memory;

use moneybook_proto::flat::FlatRecord;
use moneybook_proto::record::RecordId;

pub use http::HttpLedger;
pub use memory::MemoryLedger;

/// Errors returned by remote ledger operations.
///
/// Every variant is treated as transient by the sync engine: the task
/// stays queued and is retried on a later pass.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The ledger could not be reached.
    #[error("ledger unreachable: {0}")]
    Unreachable(String),

    /// The request did not complete within the configured timeout.
    #[error("ledger request timed out")]
    Timeout,

    /// The ledger answered with a non-success status.
    #[error("ledger answered {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error text from the body, if any.
        message: String,
    },

    /// The ledger answered with a body that does not decode.
    #[error("malformed ledger response: {0}")]
    Malformed(String),

    /// The configured endpoint is not a usable URL.
    #[error("invalid ledger endpoint: {0}")]
    InvalidEndpoint(String),

    /// Any other HTTP client failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Async interface to the remote ledger.
///
/// Calls are independent: a failure of one says nothing about the next.
/// Implementations must not retry internally; retry is the sync engine's
/// job.
pub trait RemoteLedger: Send + Sync {
    /// Fetches every row the ledger holds.
    fn fetch_all(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<FlatRecord>, RemoteError>> + Send;

    /// Creates all `records` in one call. All-or-nothing from the caller's
    /// point of view.
    fn create_batch(
        &self,
        records: &[FlatRecord],
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    /// Overwrites the row with the same id as `record`.
    fn update(
        &self,
        record: &FlatRecord,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    /// Deletes the row with `id`.
    fn delete(
        &self,
        id: &RecordId,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;
}
