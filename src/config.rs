use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::db::collections::validate_collection_name;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Where the tracked data lives
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Directory holding the database files.
    #[serde(default = "default_uri")]
    pub uri: PathBuf,
    /// Database name; the database file is `<uri>/<db>.db`.
    #[serde(default = "default_db")]
    pub db: String,
    /// Name of the long-lived tracked accounts collection.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            db: default_db(),
            collection: default_collection(),
        }
    }
}

/// Input/output files and batching
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_input_files")]
    pub input_files: PathBuf,
    #[serde(default = "default_output_list")]
    pub output_list: PathBuf,
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            input_files: default_input_files(),
            output_list: default_output_list(),
            read_chunk_bytes: default_read_chunk_bytes(),
        }
    }
}

/// Per-account change history
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,
    /// Entries kept per account, newest first. 0 keeps everything.
    #[serde(default = "default_history_max_entries")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_history_enabled(),
            max_entries: default_history_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            migrations_dir: default_migrations_dir(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_uri() -> PathBuf {
    PathBuf::from("data")
}

fn default_db() -> String {
    "instagram".to_string()
}

fn default_collection() -> String {
    "trackFollowers".to_string()
}

fn default_batch_size() -> usize {
    5000
}

fn default_input_files() -> PathBuf {
    PathBuf::from("data")
}

fn default_output_list() -> PathBuf {
    PathBuf::from("data").join("list")
}

fn default_read_chunk_bytes() -> usize {
    64 * 1024
}

fn default_history_enabled() -> bool {
    true
}

fn default_history_max_entries() -> usize {
    50
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            connection: ConnectionConfig::default(),
            files: FilesConfig::default(),
            history: HistoryConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for the settings file in this order:
    /// 1. Path specified in INSTACO_CONFIG environment variable
    /// 2. ./settings.toml in current directory
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("INSTACO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("settings.toml"));

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path.
    ///
    /// A missing file falls back to the built-in defaults; a file that exists
    /// but does not parse or validate is an error.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            log::warn!(
                "Settings file {} not found, using default settings",
                config_path.display()
            );
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read settings file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.files.batch_size == 0 {
            anyhow::bail!("files.batch_size must be greater than 0");
        }

        if self.files.read_chunk_bytes == 0 {
            anyhow::bail!("files.read_chunk_bytes must be greater than 0");
        }

        if self.connection.db.trim().is_empty() {
            anyhow::bail!("connection.db must not be empty");
        }

        validate_collection_name(&self.connection.collection)
            .context("connection.collection is not a usable collection name")?;

        Ok(())
    }

    /// Get database file path
    pub fn db_path(&self) -> PathBuf {
        self.connection.uri.join(format!("{}.db", self.connection.db))
    }

    pub fn input_dir(&self) -> &Path {
        &self.files.input_files
    }

    pub fn output_dir(&self) -> &Path {
        &self.files.output_list
    }
}
