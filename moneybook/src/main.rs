//! `MoneyBook`: offline-first personal finance ledger.
//!
//! Every mutation is stored locally first and works without a network.
//! With an endpoint configured, mutations are followed by one sync pass and
//! `watch` keeps syncing in the background.
//!
//! ```bash
//! # Offline
//! moneybook add "Lunch" 120 --tag food
//! moneybook list
//!
//! # Against a ledger server
//! moneybook --endpoint http://127.0.0.1:9100/ledger sync
//! MONEYBOOK_ENDPOINT=http://127.0.0.1:9100/ledger moneybook watch
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use moneybook::book::{Book, BookStatus};
use moneybook::config::{CliArgs, ClientConfig, Command, ConfigError};
use moneybook::remote::{HttpLedger, RemoteError};
use moneybook::store::{LocalState, StoreError};
use moneybook::sync::{PassReport, ReconcileOutcome, SyncEvent};
use moneybook_proto::flat::join_tags;
use moneybook_proto::record::{Record, RecordDraft, RecordId, RecordPatch};

/// Errors that end a CLI invocation.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Local state could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The remote ledger client could not be built.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A command needs an endpoint but none is configured.
    #[error("no remote endpoint configured (use --endpoint or [remote] endpoint)")]
    NoEndpoint,

    /// User input could not be understood.
    #[error("invalid {what}: {reason}")]
    Input {
        /// Which argument.
        what: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// No record has the given id.
    #[error("no record with id {0}")]
    NotFound(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let result = match ClientConfig::load(&cli) {
        Ok(config) => run(cli.command.clone().unwrap_or(Command::List), &config).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// Returns a [`WorkerGuard`] for the file writer that must be held until
/// shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &ClientConfig) -> Result<(), CliError> {
    let state = Arc::new(LocalState::open(&config.data_dir)?);
    let book = match config.endpoint.as_deref() {
        Some(endpoint) => {
            let remote = HttpLedger::new(endpoint, config.request_timeout, config.connect_timeout)?;
            Some(Book::new(
                Arc::clone(&state),
                Arc::new(remote),
                config.max_attempts,
            ))
        }
        None => None,
    };

    match command {
        Command::Add {
            name,
            amount,
            tags,
            description,
            date,
        } => {
            let draft = RecordDraft {
                name,
                amount,
                tags,
                description,
                created_at: date.as_deref().map(parse_date).transpose()?,
            };
            let id = state.create(draft)?;
            println!("{id}");
            push_after_mutation(book.as_ref()).await;
        }
        Command::Edit {
            id,
            name,
            amount,
            tags,
            description,
            clear_description,
            date,
        } => {
            let patch = RecordPatch {
                name,
                amount,
                tags,
                description: if clear_description {
                    Some(None)
                } else {
                    description.map(Some)
                },
                created_at: date.as_deref().map(parse_date).transpose()?,
            };
            if patch.is_empty() {
                return Err(CliError::Input {
                    what: "edit",
                    reason: "nothing to change".into(),
                });
            }
            let record = state
                .update(&RecordId::from_string(&id), patch)?
                .ok_or(CliError::NotFound(id))?;
            print_record(&record);
            push_after_mutation(book.as_ref()).await;
        }
        Command::Delete { id } => {
            if !state.delete(&RecordId::from_string(&id))? {
                return Err(CliError::NotFound(id));
            }
            push_after_mutation(book.as_ref()).await;
        }
        Command::List => {
            let mut records = state.records().list();
            records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            for record in &records {
                print_record(record);
            }
        }
        Command::Status => {
            let status = BookStatus::of(&state);
            println!("records: {}", status.records);
            println!("pending: {}", status.pending);
            println!("error:   {}", status.errored);
            println!("queued:  {} ({} parked)", status.queued, status.dead);
            println!(
                "remote:  {}",
                config.endpoint.as_deref().unwrap_or("(offline)")
            );
        }
        Command::Sync => {
            let book = book.ok_or(CliError::NoEndpoint)?;
            print_pass(&book.sync().await);
        }
        Command::Pull => {
            let book = book.ok_or(CliError::NoEndpoint)?;
            print_reconcile(&book.refresh().await);
        }
        Command::RetryDead => {
            let revived = state.revive_dead()?;
            println!("revived {revived} parked task(s)");
            if revived > 0 {
                push_after_mutation(book.as_ref()).await;
            }
        }
        Command::Watch => {
            let book = book.ok_or(CliError::NoEndpoint)?;
            watch(book, config).await;
        }
    }
    Ok(())
}

async fn watch(mut book: Book<HttpLedger>, config: &ClientConfig) {
    let (scheduler, mut events) = book.start_scheduler(config.scheduler_config());
    scheduler.handle().trigger();
    tracing::info!("watching, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SyncEvent::Pass(report)) => print_pass(&report),
                Some(SyncEvent::Reconciled(outcome)) => print_reconcile(&outcome),
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }
    scheduler.shutdown().await;
}

/// One best-effort pass after a mutation. Failures leave the task queued.
async fn push_after_mutation(book: Option<&Book<HttpLedger>>) {
    if let Some(book) = book {
        print_pass(&book.sync().await);
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CliError::Input {
            what: "date",
            reason: format!("{raw:?}: {e}"),
        })
}

fn print_record(record: &Record) {
    println!(
        "{}  {}  {:>12.2}  {:<8}  {}  [{}]",
        record.id,
        record.created_at.format("%Y-%m-%d"),
        record.amount,
        record.sync_status,
        record.name,
        join_tags(&record.tags),
    );
}

fn print_pass(report: &PassReport) {
    match report {
        PassReport::Skipped => println!("sync: another pass is running"),
        PassReport::Completed(s) => println!(
            "sync: {} sent, {} confirmed, {} failed, {} deferred, {} parked",
            s.attempted, s.succeeded, s.failed, s.deferred, s.dead_skipped + s.parked
        ),
    }
}

fn print_reconcile(outcome: &ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::Merged { pass, merge } => {
            print_pass(&PassReport::Completed(*pass));
            println!(
                "pull: {} records, {} local changes kept",
                merge.records, merge.kept_local
            );
        }
        ReconcileOutcome::Skipped => println!("pull: a sync pass is running, try again"),
        ReconcileOutcome::Aborted { pass, reason } => {
            print_pass(&PassReport::Completed(*pass));
            println!("pull: aborted ({reason})");
        }
    }
}
