//! Moving local mutations to the remote ledger and remote truth back.
//!
//! - [`engine`]: replays the pending task queue.
//! - [`reconcile`]: merges a remote snapshot with unconfirmed local edits.
//! - [`scheduler`]: decides when passes and reconciles run.

pub mod engine;
pub mod reconcile;
pub mod scheduler;

pub use engine::{PassReport, PassSummary, SyncEngine};
pub use reconcile::{MergeSummary, ReconcileOutcome, Reconciler};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, SyncEvent};
