//! Configuration system for the `MoneyBook` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/moneybook/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::sync::SchedulerConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value is present but unusable.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Dotted key of the offending setting.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    remote: RemoteFileConfig,
    sync: SyncFileConfig,
    storage: StorageFileConfig,
}

/// `[remote]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RemoteFileConfig {
    endpoint: Option<String>,
    request_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    interval_secs: Option<u64>,
    backoff_factor: Option<f64>,
    max_backoff_secs: Option<u64>,
    max_attempts: Option<u32>,
    trigger_buffer: Option<usize>,
    event_buffer: Option<usize>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Remote --
    /// Remote ledger endpoint. `None` means offline only.
    pub endpoint: Option<String>,
    /// Upper bound for one remote call.
    pub request_timeout: Duration,
    /// Upper bound for establishing a connection.
    pub connect_timeout: Duration,

    // -- Sync --
    /// Delay between timer-driven passes.
    pub interval: Duration,
    /// Growth of the delay after a failed pass.
    pub backoff_factor: f64,
    /// Ceiling of the backed-off delay.
    pub max_backoff: Duration,
    /// Failed attempts after which a task is parked. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Capacity of the scheduler trigger channel.
    pub trigger_buffer: usize,
    /// Capacity of the scheduler event channel.
    pub event_buffer: usize,

    // -- Storage --
    /// Directory holding `records.snapshot` and `tasks.snapshot`.
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let sync = SchedulerConfig::default();
        Self {
            endpoint: None,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            interval: sync.interval,
            backoff_factor: sync.backoff_factor,
            max_backoff: sync.max_backoff,
            max_attempts: None,
            trigger_buffer: sync.trigger_buffer,
            event_buffer: sync.event_buffer,
            data_dir: default_data_dir(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/moneybook/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if a resolved value is out of range.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            endpoint: cli
                .endpoint
                .clone()
                .or_else(|| file.remote.endpoint.clone())
                .filter(|e| !e.is_empty()),
            request_timeout: file
                .remote
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            connect_timeout: file
                .remote
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            interval: file
                .sync
                .interval_secs
                .map_or(defaults.interval, Duration::from_secs),
            backoff_factor: file.sync.backoff_factor.unwrap_or(defaults.backoff_factor),
            max_backoff: file
                .sync
                .max_backoff_secs
                .map_or(defaults.max_backoff, Duration::from_secs),
            max_attempts: file.sync.max_attempts.or(defaults.max_attempts),
            trigger_buffer: file.sync.trigger_buffer.unwrap_or(defaults.trigger_buffer),
            event_buffer: file.sync.event_buffer.unwrap_or(defaults.event_buffer),
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .unwrap_or(defaults.data_dir),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "sync.interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid {
                key: "sync.backoff_factor",
                reason: format!("must be a finite number >= 1.0, got {}", self.backoff_factor),
            });
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid {
                key: "sync.max_attempts",
                reason: "must be at least 1 (omit it to retry forever)".into(),
            });
        }
        Ok(())
    }

    /// Scheduler settings from this configuration.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.interval,
            backoff_factor: self.backoff_factor,
            max_backoff: self.max_backoff,
            trigger_buffer: self.trigger_buffer,
            event_buffer: self.event_buffer,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Offline-first personal finance ledger")]
pub struct CliArgs {
    /// Remote ledger endpoint URL. Without one, everything stays local.
    #[arg(long, env = "MONEYBOOK_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Directory for local state (default: platform data dir + `moneybook`).
    #[arg(long, env = "MONEYBOOK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Path to config file (default: `~/.config/moneybook/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", env = "MONEYBOOK_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands of the `moneybook` binary.
#[derive(clap::Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Record a new transaction.
    Add {
        /// Short label, e.g. "Lunch".
        name: String,
        /// Signed amount; zero marks a planned entry.
        #[arg(allow_hyphen_values = true)]
        amount: f64,
        /// Tag to attach (repeatable).
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Free-text description.
        #[arg(short, long)]
        description: Option<String>,
        /// Backdate the entry (RFC 3339).
        #[arg(long)]
        date: Option<String>,
    },
    /// Change fields of an existing transaction.
    Edit {
        /// Record id.
        id: String,
        /// New label.
        #[arg(long)]
        name: Option<String>,
        /// New amount.
        #[arg(long, allow_hyphen_values = true)]
        amount: Option<f64>,
        /// Replace all tags (repeatable).
        #[arg(short, long = "tag")]
        tags: Option<Vec<String>>,
        /// New description.
        #[arg(short, long, conflicts_with = "clear_description")]
        description: Option<String>,
        /// Remove the description.
        #[arg(long)]
        clear_description: bool,
        /// New creation date (RFC 3339).
        #[arg(long)]
        date: Option<String>,
    },
    /// Delete a transaction.
    Delete {
        /// Record id.
        id: String,
    },
    /// List transactions, newest first.
    List,
    /// Show queue and sync status counts.
    Status,
    /// Push queued changes to the remote ledger once.
    Sync,
    /// Push queued changes, then pull and merge the remote ledger.
    Pull,
    /// Clear the parked flag on tasks that exceeded the attempt ceiling.
    RetryDead,
    /// Keep syncing in the background until interrupted.
    Watch,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".moneybook"), |d| d.join("moneybook"))
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("moneybook").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
