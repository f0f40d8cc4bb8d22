//! Configuration loading
//!
//! Loads configuration from `~/.config/normas/normas-sync.toml` (or the
//! `NORMAS_SYNC_CONFIG` env var). A missing file means defaults.
//!
//! `[tables]` is the only place where a logical table is bound to a
//! physical `schema.table`; every statement in the store and the
//! classification reader goes through [`TableRef::qualified`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::store::MAX_STAGING_BATCH_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NormasConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub tables: TablesConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub service: ServiceConfig,
}

/// Warehouse connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Main SQLite database file (schema `main`)
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Create the normas/classification tables when absent
    #[serde(default = "default_create_missing_tables")]
    pub create_missing_tables: bool,

    /// Extra schemas: name -> database file, ATTACHed on every connection
    #[serde(default)]
    pub attach: BTreeMap<String, String>,
}

fn default_db_path() -> String {
    dirs::data_dir()
        .map(|d| {
            d.join("normas")
                .join("warehouse.db")
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "warehouse.db".to_string())
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_create_missing_tables() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            create_missing_tables: default_create_missing_tables(),
            attach: BTreeMap::new(),
        }
    }
}

/// A physical table location.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TableRef {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
}

fn default_schema() -> String {
    MAIN_SCHEMA.to_string()
}

/// Schema name of the main database file.
pub const MAIN_SCHEMA: &str = "main";

impl TableRef {
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    /// Quoted `"schema"."table"` for use in SQL text.
    ///
    /// Only valid after [`NormasConfig::validate`] has accepted both parts.
    pub fn qualified(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TablesConfig {
    #[serde(default = "default_normas_table")]
    pub normas: TableRef,

    #[serde(default = "default_classifications_table")]
    pub classifications: TableRef,
}

fn default_normas_table() -> TableRef {
    TableRef::new(MAIN_SCHEMA, "tb_normas_consolidadas")
}

fn default_classifications_table() -> TableRef {
    TableRef::new(MAIN_SCHEMA, "management_systems_classifications")
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            normas: default_normas_table(),
            classifications: default_classifications_table(),
        }
    }
}

/// Reconciliation settings
#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    /// Deadline for each phase's I/O call
    #[serde(default = "default_phase_timeout_secs")]
    pub phase_timeout_secs: u64,

    #[serde(default = "default_schedule_enabled")]
    pub schedule_enabled: bool,

    /// Period between scheduled runs (weekly by default)
    #[serde(default = "default_schedule_interval_secs")]
    pub schedule_interval_secs: u64,

    /// Rows per multi-row INSERT into the staging table
    #[serde(default = "default_staging_batch_size")]
    pub staging_batch_size: usize,
}

fn default_phase_timeout_secs() -> u64 {
    300
}

fn default_schedule_enabled() -> bool {
    true
}

fn default_schedule_interval_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_staging_batch_size() -> usize {
    500
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            phase_timeout_secs: default_phase_timeout_secs(),
            schedule_enabled: default_schedule_enabled(),
            schedule_interval_secs: default_schedule_interval_secs(),
            staging_batch_size: default_staging_batch_size(),
        }
    }
}

impl SyncSettings {
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub socket_path: Option<String>,
}

impl NormasConfig {
    /// Environment variable overriding the config file location
    pub const ENV_CONFIG_PATH: &'static str = "NORMAS_SYNC_CONFIG";

    pub const DEFAULT_CONFIG_FILENAME: &'static str = "normas-sync.toml";

    /// Load configuration
    ///
    /// Resolution order:
    /// 1. `NORMAS_SYNC_CONFIG` environment variable
    /// 2. `~/.config/normas/normas-sync.toml`
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let cfg: NormasConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|c| c.join("normas").join(Self::DEFAULT_CONFIG_FILENAME))
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "database.pool_size must be at least 1".to_string(),
            ));
        }
        if self.sync.phase_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.phase_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.sync.schedule_enabled && self.sync.schedule_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.schedule_interval_secs must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_STAGING_BATCH_SIZE).contains(&self.sync.staging_batch_size) {
            return Err(ConfigError::Invalid(format!(
                "sync.staging_batch_size must be between 1 and {MAX_STAGING_BATCH_SIZE}"
            )));
        }

        for name in self.database.attach.keys() {
            check_identifier("database.attach", name)?;
            if name.eq_ignore_ascii_case(MAIN_SCHEMA) || name.eq_ignore_ascii_case("temp") {
                return Err(ConfigError::Invalid(format!(
                    "database.attach: schema name `{name}` is reserved"
                )));
            }
        }

        for (key, table) in [
            ("tables.normas", &self.tables.normas),
            ("tables.classifications", &self.tables.classifications),
        ] {
            check_identifier(key, &table.schema)?;
            check_identifier(key, &table.table)?;
            if table.schema != MAIN_SCHEMA && !self.database.attach.contains_key(&table.schema) {
                return Err(ConfigError::Invalid(format!(
                    "{key}: schema `{}` is not main and not listed in database.attach",
                    table.schema
                )));
            }
        }

        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn check_identifier(key: &str, ident: &str) -> Result<(), ConfigError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{key}: `{ident}` is not a valid identifier"
        )))
    }
}
