//! Configuration for hepm-migrator
//!
//! Bootstrap TOML (`hepm-migrator.toml`) with environment overrides for the
//! operational switches.
//!
//! File resolution priority: `--config` → `HEPM_CONFIG` →
//! `~/.config/hepm/hepm-migrator.toml` → `/etc/hepm/hepm-migrator.toml` →
//! compiled defaults.

use hepm_common::config::{env_flag, env_override, load_or_default, resolve_config_path, LoggingConfig};
use hepm_common::Result;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Config file name looked up in the user and system config directories
pub const CONFIG_FILE_NAME: &str = "hepm-migrator.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "HEPM_CONFIG";

/// Complete migrator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MigratorConfig {
    /// SQLite database file (default: `<data dir>/hepm.db`)
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Base URL used to build `$ref` pointers between records
    #[serde(default = "default_records_base_url")]
    pub records_base_url: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub migration: MigrationSettings,

    #[serde(default)]
    pub features: FeatureFlags,

    #[serde(default)]
    pub indexer: IndexerSettings,

    #[serde(default)]
    pub importer: ImporterSettings,

    #[serde(default)]
    pub health: HealthSettings,
}

/// `[migration]` table
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSettings {
    /// Parallel per-record workers in step 2 and relation synchronization
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Mirror rows handed to the worker pool at a time
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Sleep between continuous-mode cycles
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Liveness marker touched once per completed cycle
    #[serde(default = "default_lastrun_file")]
    pub lastrun_file: PathBuf,

    /// Directory polled for new legacy dumps in continuous mode
    #[serde(default)]
    pub drop_dir: Option<PathBuf>,

    /// Total retry budget for "database is locked"
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

/// `[features]` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FeatureFlags {
    /// Merged identifiers become REDIRECTED (true) or DELETED (false)
    #[serde(default = "default_true")]
    pub enable_pid_redirection: bool,

    /// Exclude self-citations from displayed citation counts
    #[serde(default)]
    pub enable_self_citations: bool,
}

/// `[indexer]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexerSettings {
    /// Indexing collaborator endpoint; absent means log-only
    #[serde(default)]
    pub url: Option<String>,
}

/// `[importer]` table
#[derive(Debug, Clone, Deserialize)]
pub struct ImporterSettings {
    #[serde(default = "default_arxiv_url")]
    pub arxiv_url: String,

    #[serde(default = "default_crossref_url")]
    pub crossref_url: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// `[health]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthSettings {
    /// Bind address for `GET /health` in continuous mode
    #[serde(default)]
    pub bind: Option<SocketAddr>,
}

fn default_database_path() -> PathBuf {
    hepm_common::config::default_data_dir().join("hepm.db")
}

fn default_records_base_url() -> String {
    "https://inspirehep.net/api".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_chunk_size() -> usize {
    200
}

fn default_polling_interval_ms() -> u64 {
    1000
}

fn default_lastrun_file() -> PathBuf {
    hepm_common::config::default_data_dir().join("lastrun")
}

fn default_lock_wait_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_arxiv_url() -> String {
    "http://export.arxiv.org/oai2".to_string()
}

fn default_crossref_url() -> String {
    "https://api.crossref.org/works".to_string()
}

fn default_max_retries() -> u32 {
    3
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            records_base_url: default_records_base_url(),
            logging: LoggingConfig::default(),
            migration: MigrationSettings::default(),
            features: FeatureFlags::default(),
            indexer: IndexerSettings::default(),
            importer: ImporterSettings::default(),
            health: HealthSettings::default(),
        }
    }
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            chunk_size: default_chunk_size(),
            polling_interval_ms: default_polling_interval_ms(),
            lastrun_file: default_lastrun_file(),
            drop_dir: None,
            lock_wait_ms: default_lock_wait_ms(),
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_pid_redirection: true,
            enable_self_citations: false,
        }
    }
}

impl Default for ImporterSettings {
    fn default() -> Self {
        Self {
            arxiv_url: default_arxiv_url(),
            crossref_url: default_crossref_url(),
            max_retries: default_max_retries(),
        }
    }
}

impl MigratorConfig {
    /// Resolve, load and apply environment overrides
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME);
        let mut config: MigratorConfig = load_or_default(path.as_deref())?;
        config.apply_env_overrides()?;

        if let Some(path) = &path {
            info!(path = %path.display(), "Configuration resolved");
        }
        Ok(config)
    }

    /// Apply `HEPM_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(path) = env_override::<PathBuf>("HEPM_DATABASE_PATH")? {
            self.database_path = path;
        }
        if let Some(flag) = env_flag("HEPM_ENABLE_PID_REDIRECTION")? {
            self.features.enable_pid_redirection = flag;
        }
        if let Some(flag) = env_flag("HEPM_ENABLE_SELF_CITATIONS")? {
            self.features.enable_self_citations = flag;
        }
        if let Some(ms) = env_override::<u64>("HEPM_POLLING_INTERVAL_MS")? {
            self.migration.polling_interval_ms = ms;
        }
        if let Some(path) = env_override::<PathBuf>("HEPM_LASTRUN_FILE")? {
            self.migration.lastrun_file = path;
        }
        Ok(())
    }

    /// Worker count clamped to at least one
    pub fn worker_count(&self) -> usize {
        self.migration.worker_count.max(1)
    }
}
