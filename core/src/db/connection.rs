//! Connection pooling and pragma configuration

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use super::{Result, migrations};
use crate::config::{DatabaseConfig, NormasConfig, TablesConfig};

/// Initialize a connection pool over the main database file.
///
/// Every pooled connection gets WAL mode, the busy timeout, foreign-key
/// enforcement and the configured schema ATTACHes.
pub fn initialize_pool(cfg: &DatabaseConfig) -> Result<Pool<SqliteConnectionManager>> {
    ensure_parent_dir(Path::new(&cfg.path))?;
    for path in cfg.attach.values() {
        ensure_parent_dir(Path::new(path))?;
    }

    let busy_timeout = Duration::from_millis(cfg.busy_timeout_ms);
    let attach: Vec<(String, String)> = cfg
        .attach
        .iter()
        .map(|(name, path)| (name.clone(), path.clone()))
        .collect();

    let manager = SqliteConnectionManager::file(&cfg.path).with_init(move |conn| {
        apply_pragmas(conn, busy_timeout)?;
        for (name, path) in &attach {
            conn.execute(&format!("ATTACH DATABASE ?1 AS \"{name}\""), [path])?;
        }
        Ok(())
    });

    let pool = Pool::builder().max_size(cfg.pool_size).build(manager)?;
    Ok(pool)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

/// Owned handle to the warehouse: pool plus the physical table mapping.
///
/// Acquired once at startup and shared by the store and the
/// classification reader; dropping the last clone closes the pool.
#[derive(Clone)]
pub struct Warehouse {
    pool: Pool<SqliteConnectionManager>,
    tables: TablesConfig,
}

impl Warehouse {
    /// Open the pool and, when configured, create missing tables.
    pub fn open(cfg: &NormasConfig) -> Result<Self> {
        let pool = initialize_pool(&cfg.database)?;
        let warehouse = Self {
            pool,
            tables: cfg.tables.clone(),
        };

        if cfg.database.create_missing_tables {
            let mut conn = warehouse.pool.get()?;
            migrations::ensure_schema(&mut conn, &warehouse.tables)?;
        }

        tracing::debug!(
            path = %cfg.database.path,
            attached = cfg.database.attach.len(),
            pool_size = cfg.database.pool_size,
            "Warehouse opened"
        );

        Ok(warehouse)
    }

    pub fn pool(&self) -> &Pool<SqliteConnectionManager> {
        &self.pool
    }

    pub fn tables(&self) -> &TablesConfig {
        &self.tables
    }
}
