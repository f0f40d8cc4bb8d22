//! Classification source reader.
//!
//! Reads the external classification dataset. Only rows with
//! `classification = true` ever reach the aggregator. The reader never
//! retries; a failed query surfaces as [`DbError`] and the reconciler turns
//! it into `SourceUnavailable`.

use async_trait::async_trait;
use rusqlite::params;

use crate::db::{DbError, Warehouse, with_connection};
use crate::model::{Classification, ClassificationRow, ManagementSystemCount};

/// Read-only access to the classification dataset.
#[async_trait]
pub trait ClassificationSource: Send + Sync {
    /// All `{norma_id, label}` pairs with the classification flag set.
    ///
    /// Returns the full dataset in one response, in insertion order.
    async fn fetch_true_classifications(&self) -> Result<Vec<ClassificationRow>, DbError>;

    /// Every classification row for one norma, newest first.
    async fn classifications_for_norma(&self, norma_id: i64)
    -> Result<Vec<Classification>, DbError>;

    /// Labels with the number of distinct normas classified under each.
    async fn management_systems(&self) -> Result<Vec<ManagementSystemCount>, DbError>;
}

/// Classification reader over the warehouse's classification table.
pub struct SqliteClassificationSource {
    warehouse: Warehouse,
}

impl SqliteClassificationSource {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    fn table(&self) -> String {
        self.warehouse.tables().classifications.qualified()
    }
}

#[async_trait]
impl ClassificationSource for SqliteClassificationSource {
    async fn fetch_true_classifications(&self) -> Result<Vec<ClassificationRow>, DbError> {
        let sql = format!(
            "SELECT norm_id, mngm_sys FROM {} WHERE classification = 1 ORDER BY rowid",
            self.table()
        );
        with_connection(self.warehouse.pool(), move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ClassificationRow {
                        norma_id: row.get(0)?,
                        management_system_label: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn classifications_for_norma(
        &self,
        norma_id: i64,
    ) -> Result<Vec<Classification>, DbError> {
        let sql = format!(
            "SELECT norm_id, mngm_sys, classification, classification_injection
             FROM {}
             WHERE norm_id = ?1
             ORDER BY classification_injection DESC",
            self.table()
        );
        with_connection(self.warehouse.pool(), move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![norma_id], |row| {
                    Ok(Classification {
                        norma_id: row.get(0)?,
                        sistema_gestao: row.get(1)?,
                        classification: row.get(2)?,
                        data_classificacao: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn management_systems(&self) -> Result<Vec<ManagementSystemCount>, DbError> {
        let sql = format!(
            "SELECT mngm_sys, COUNT(DISTINCT norm_id) AS total_normas
             FROM {}
             WHERE classification = 1 AND mngm_sys IS NOT NULL AND TRIM(mngm_sys) <> ''
             GROUP BY mngm_sys
             ORDER BY total_normas DESC, mngm_sys",
            self.table()
        );
        with_connection(self.warehouse.pool(), move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| {
                    let total: i64 = row.get(1)?;
                    Ok(ManagementSystemCount {
                        sistema_gestao: row.get(0)?,
                        total_normas: u64::try_from(total).unwrap_or_default(),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}
