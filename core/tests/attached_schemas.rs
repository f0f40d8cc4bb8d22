#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Full reconciliation against a warehouse split across attached databases.

use std::sync::Arc;

use normas_core::config::TableRef;
use normas_core::model::{NormasFilter, SyncTrigger};
use normas_core::{
    NormasConfig, NormasStore, Reconciler, SqliteClassificationSource, SqliteNormasStore,
    Warehouse,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn split_config(dir: &TempDir) -> NormasConfig {
    let mut cfg = NormasConfig::default();
    cfg.database.path = dir.path().join("main.db").to_string_lossy().into_owned();
    cfg.database.attach.insert(
        "unificado".to_string(),
        dir.path().join("unificado.db").to_string_lossy().into_owned(),
    );
    cfg.database.attach.insert(
        "models".to_string(),
        dir.path().join("models.db").to_string_lossy().into_owned(),
    );
    cfg.tables.normas = TableRef::new("unificado", "tb_normas_consolidadas");
    cfg.tables.classifications = TableRef::new("models", "management_systems_classifications");
    cfg.validate().expect("valid config");
    cfg
}

fn seed(warehouse: &Warehouse) {
    let conn = warehouse.pool().get().expect("connection");
    conn.execute_batch(
        "INSERT INTO unificado.tb_normas_consolidadas (id, ementa, data_publicacao)
            VALUES (1, 'Residuos solidos', '2021-03-01'),
                   (2, 'Seguranca do trabalho', '2022-05-10'),
                   (3, 'Tributos', NULL);
         INSERT INTO models.management_systems_classifications (norm_id, mngm_sys, classification)
            VALUES (1, 'QMS', 1), (2, 'EMS', 1), (2, 'OHS', 1), (4, 'QMS', 1), (3, 'QMS', 0);",
    )
    .expect("seed");
}

#[tokio::test]
async fn reconciles_across_attached_schemas() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = split_config(&dir);
    let warehouse = Warehouse::open(&cfg).expect("open");
    seed(&warehouse);

    let store = Arc::new(SqliteNormasStore::new(
        warehouse.clone(),
        cfg.sync.staging_batch_size,
    ));
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(SqliteClassificationSource::new(warehouse.clone())),
        &cfg.sync,
    );

    let outcome = reconciler
        .reconcile(SyncTrigger::Manual)
        .await
        .expect("reconcile");
    assert_eq!(outcome.updated, 2);

    let applicable = store
        .list(&NormasFilter {
            aplicavel: Some(true),
            ..Default::default()
        })
        .await
        .expect("list");
    let got: Vec<_> = applicable
        .data
        .iter()
        .map(|n| (n.id, n.sistema_gestao.clone()))
        .collect();
    assert_eq!(
        got,
        vec![
            (2, Some("EMS, OHS".to_string())),
            (1, Some("QMS".to_string())),
        ]
    );

    // Nothing leaked into the main database.
    let conn = warehouse.pool().get().expect("connection");
    let main_tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM main.sqlite_master WHERE type = 'table'",
            [],
            |row| row.get(0),
        )
        .expect("master");
    assert_eq!(main_tables, 0);

    let orphans = reconciler.find_orphans().await.expect("orphans");
    assert_eq!(orphans.orphan_ids, vec![4]);
}

#[tokio::test]
async fn search_matches_ementa_case_insensitively() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = split_config(&dir);
    let warehouse = Warehouse::open(&cfg).expect("open");
    seed(&warehouse);
    let store = SqliteNormasStore::new(warehouse, 500);

    let page = store
        .list(&NormasFilter {
            search: Some("SEGURANCA".to_string()),
            ..Default::default()
        })
        .await
        .expect("list");

    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.data[0].id, 2);
}
