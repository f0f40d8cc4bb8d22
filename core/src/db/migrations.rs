//! Table bootstrap for local warehouses
//!
//! In production the ingestion pipeline owns both tables; a local or test
//! warehouse gets them created here. Statements are idempotent
//! (`IF NOT EXISTS`), so running against an existing catalog is a no-op.

use rusqlite::{Connection, TransactionBehavior};

use super::{Result, execute_in_transaction};
use crate::config::TablesConfig;

/// Current schema version, recorded in `main`'s `user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Create the normas and classification tables when absent.
pub fn ensure_schema(conn: &mut Connection, tables: &TablesConfig) -> Result<()> {
    let current = get_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(super::DbError::Migration(format!(
            "database schema version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    let normas = tables.normas.qualified();
    let classifications = tables.classifications.qualified();
    let index = format!(
        "\"{}\".\"idx_{}_norm_id\"",
        tables.classifications.schema, tables.classifications.table
    );

    execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {normas} (
                id INTEGER PRIMARY KEY,
                tipo_norma TEXT,
                numero_norma TEXT,
                ano_publicacao INTEGER,
                ementa TEXT,
                situacao TEXT,
                status_vigencia TEXT,
                divisao_politica TEXT,
                origem_publicacao TEXT,
                origem_dado TEXT,
                link_norma TEXT,
                data_publicacao TEXT,
                aplicavel INTEGER NOT NULL DEFAULT 0,
                sistema_gestao TEXT
            );
            CREATE TABLE IF NOT EXISTS {classifications} (
                norm_id INTEGER NOT NULL,
                mngm_sys TEXT,
                classification INTEGER NOT NULL DEFAULT 0,
                dst REAL,
                hst REAL,
                classification_injection TEXT
            );
            CREATE INDEX IF NOT EXISTS {index}
                ON \"{}\" (norm_id, classification);",
            tables.classifications.table
        ))?;
        Ok(())
    })?;

    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableRef;

    #[test]
    fn creates_tables_idempotently() {
        let mut conn = Connection::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let tables = TablesConfig::default();

        ensure_schema(&mut conn, &tables).unwrap_or_else(|e| panic!("first: {e}"));
        ensure_schema(&mut conn, &tables).unwrap_or_else(|e| panic!("second: {e}"));

        assert_eq!(get_schema_version(&conn).ok(), Some(SCHEMA_VERSION));
        conn.execute(
            "INSERT INTO tb_normas_consolidadas (id, ementa) VALUES (1, 'x')",
            [],
        )
        .unwrap_or_else(|e| panic!("insert: {e}"));
        let aplicavel: bool = conn
            .query_row(
                "SELECT aplicavel FROM tb_normas_consolidadas WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap_or_else(|e| panic!("select: {e}"));
        assert!(!aplicavel);
    }

    #[test]
    fn creates_tables_in_attached_schema() {
        let mut conn = Connection::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        conn.execute_batch("ATTACH DATABASE ':memory:' AS models")
            .unwrap_or_else(|e| panic!("attach: {e}"));
        let tables = TablesConfig {
            normas: TableRef::new("main", "normas"),
            classifications: TableRef::new("models", "classifications"),
        };

        ensure_schema(&mut conn, &tables).unwrap_or_else(|e| panic!("ensure: {e}"));

        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM models.sqlite_master WHERE name = 'classifications'",
                [],
                |row| row.get(0),
            )
            .unwrap_or_else(|e| panic!("master: {e}"));
        assert_eq!(n, 1);
    }

    #[test]
    fn rejects_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap_or_else(|e| panic!("pragma: {e}"));
        let err = ensure_schema(&mut conn, &TablesConfig::default());
        assert!(err.is_err());
    }
}
