//! `MoneyBook` ledger server: a small in-memory remote ledger.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin moneybook-ledger
//!
//! # Run on custom address
//! cargo run --bin moneybook-ledger -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! LEDGER_ADDR=127.0.0.1:8080 cargo run --bin moneybook-ledger
//! ```

use std::sync::Arc;

use clap::Parser;
use moneybook_ledger::config::{LedgerCliArgs, LedgerConfig};
use moneybook_ledger::server::{self, LedgerState};
use moneybook_ledger::store::LedgerTable;

#[tokio::main]
async fn main() {
    let cli = LedgerCliArgs::parse();

    let config = match LedgerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting moneybook ledger");

    let state = Arc::new(LedgerState::with_config(
        config.max_batch_size,
        config.max_body_size,
        LedgerTable::new(),
    ));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "ledger listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "ledger server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start ledger server");
            std::process::exit(1);
        }
    }
}
