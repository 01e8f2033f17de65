//! Ledger server settings.
//!
//! Each setting is taken from the command line (or its `LEDGER_*`
//! environment variable), else from `[server]` in
//! `~/.config/moneybook-ledger/config.toml`, else from the server's
//! compiled limits.

use std::path::{Path, PathBuf};

use crate::server::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BODY_SIZE};

/// Ledger configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read, or was named
    /// explicitly and does not exist.
    #[error("cannot read ledger config {path}: {source}")]
    ReadFile {
        /// File that was read.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`LedgerConfig`].
    #[error("invalid ledger config: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A limit was set to zero.
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LedgerConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the ledger config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_batch_size: Option<usize>,
    max_body_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the ledger server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "MoneyBook reference ledger server")]
pub struct LedgerCliArgs {
    /// Address to bind the ledger server to.
    #[arg(short, long, env = "LEDGER_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/moneybook-ledger/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum rows accepted in one batch create.
    #[arg(long)]
    pub max_batch_size: Option<usize>,

    /// Maximum request body size in bytes.
    #[arg(long)]
    pub max_body_size: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LEDGER_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved ledger server configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9100`).
    pub bind_addr: String,
    /// Maximum rows in one batch create.
    pub max_batch_size: usize,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Builds the configuration from the command line and the config file.
    ///
    /// An explicit `--config` path must exist; the default path may be
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or a limit resolves to zero.
    pub fn load(cli: &LedgerCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_config_file(path, true)?,
            None => match default_config_path() {
                Some(path) => read_config_file(&path, false)?,
                None => LedgerConfigFile::default(),
            },
        };
        let config = Self::resolve(cli, file);
        config.validate()?;
        Ok(config)
    }

    /// Command line first, then the file, then [`LedgerConfig::default`].
    fn resolve(cli: &LedgerCliArgs, file: LedgerConfigFile) -> Self {
        let ServerFileConfig {
            bind_addr,
            max_batch_size,
            max_body_size,
        } = file.server;
        let defaults = Self::default();
        Self {
            bind_addr: cli.bind.clone().or(bind_addr).unwrap_or(defaults.bind_addr),
            max_batch_size: cli
                .max_batch_size
                .or(max_batch_size)
                .unwrap_or(defaults.max_batch_size),
            max_body_size: cli.max_body_size.or(max_body_size).unwrap_or(defaults.max_body_size),
            log_level: cli.log_level.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        [
            ("max_batch_size", self.max_batch_size),
            ("max_body_size", self.max_body_size),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0)
        .map_or(Ok(()), |(name, _)| Err(ConfigError::ZeroLimit(name)))
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// `<config dir>/moneybook-ledger/config.toml`, if the platform has one.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("moneybook-ledger").join("config.toml"))
}

/// Reads and parses `path`. A missing file is an empty config unless
/// `required` is set.
fn read_config_file(path: &Path, required: bool) -> Result<LedgerConfigFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(LedgerConfigFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}
