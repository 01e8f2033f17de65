//! `MoneyBook`: offline-first personal finance ledger library.
//!
//! Records are edited locally and persisted at once; a background sync
//! pushes the queued changes to a remote ledger and pulls remote truth back.

pub mod book;
pub mod config;
pub mod remote;
pub mod store;
pub mod sync;
