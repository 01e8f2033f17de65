//! `MoneyBook` reference ledger server library.
//!
//! Exposes the ledger server for use in tests and embedding. The server
//! keeps rows in memory and speaks the HTTP interface described in
//! [`moneybook_proto::ledger`].

pub mod config;
pub mod server;
pub mod store;
