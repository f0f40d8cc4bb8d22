//! Fixtures for tests in this crate and in the service crate
//! (`test-utils` feature).

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rusqlite::{OptionalExtension, params};
use tempfile::TempDir;

use crate::config::{DatabaseConfig, NormasConfig};
use crate::db::Warehouse;
use crate::model::Norma;

/// Config pointing at a fresh database under `dir`.
pub fn temp_config(dir: &TempDir) -> NormasConfig {
    NormasConfig {
        database: DatabaseConfig {
            path: dir.path().join("warehouse.db").to_string_lossy().into_owned(),
            pool_size: 4,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Warehouse over a fresh temp database with both tables created.
pub fn temp_warehouse() -> (TempDir, Warehouse) {
    let dir = TempDir::new().expect("tempdir");
    let warehouse = Warehouse::open(&temp_config(&dir)).expect("open warehouse");
    (dir, warehouse)
}

/// Minimal norma with `aplicavel = 0`.
pub fn insert_norma(warehouse: &Warehouse, id: i64, data_publicacao: Option<&str>) {
    insert_full_norma(
        warehouse,
        &Norma {
            id,
            tipo_norma: Some("Lei".to_string()),
            numero_norma: Some(id.to_string()),
            ano_publicacao: None,
            ementa: Some(format!("Norma {id}")),
            situacao: None,
            status_vigencia: Some("Em vigor".to_string()),
            divisao_politica: None,
            origem_publicacao: None,
            origem_dado: None,
            link_norma: None,
            data_publicacao: data_publicacao.map(str::to_string),
            aplicavel: false,
            sistema_gestao: None,
        },
    );
}

pub fn insert_full_norma(warehouse: &Warehouse, norma: &Norma) {
    let conn = warehouse.pool().get().expect("pooled connection");
    conn.execute(
        &format!(
            "INSERT INTO {} (id, tipo_norma, numero_norma, ano_publicacao, ementa, situacao,
                status_vigencia, divisao_politica, origem_publicacao, origem_dado, link_norma,
                data_publicacao, aplicavel, sistema_gestao)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            warehouse.tables().normas.qualified()
        ),
        params![
            norma.id,
            norma.tipo_norma,
            norma.numero_norma,
            norma.ano_publicacao,
            norma.ementa,
            norma.situacao,
            norma.status_vigencia,
            norma.divisao_politica,
            norma.origem_publicacao,
            norma.origem_dado,
            norma.link_norma,
            norma.data_publicacao,
            norma.aplicavel,
            norma.sistema_gestao,
        ],
    )
    .expect("insert norma");
}

pub fn insert_classification(
    warehouse: &Warehouse,
    norma_id: i64,
    label: Option<&str>,
    classification: bool,
) {
    let conn = warehouse.pool().get().expect("pooled connection");
    conn.execute(
        &format!(
            "INSERT INTO {} (norm_id, mngm_sys, classification, classification_injection)
             VALUES (?1, ?2, ?3, datetime('now'))",
            warehouse.tables().classifications.qualified()
        ),
        params![norma_id, label, classification],
    )
    .expect("insert classification");
}

/// `(aplicavel, sistema_gestao)` for one norma, `None` if the row is absent.
pub fn norma_state(warehouse: &Warehouse, id: i64) -> Option<(bool, Option<String>)> {
    let conn = warehouse.pool().get().expect("pooled connection");
    conn.query_row(
        &format!(
            "SELECT aplicavel, sistema_gestao FROM {} WHERE id = ?1",
            warehouse.tables().normas.qualified()
        ),
        [id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .expect("select norma")
}

/// Force the flags of every norma, bypassing the reconciler.
pub fn set_all_applicable(warehouse: &Warehouse, label: &str) {
    let conn = warehouse.pool().get().expect("pooled connection");
    conn.execute(
        &format!(
            "UPDATE {} SET aplicavel = 1, sistema_gestao = ?1",
            warehouse.tables().normas.qualified()
        ),
        [label],
    )
    .expect("update normas");
}
