//! Normas store.
//!
//! The reconciler is the only writer of `aplicavel`/`sistema_gestao`, and
//! always writes them together. The read paths (listing, single lookup,
//! orphan check) never mutate.
//!
//! ## Apply mechanism
//!
//! ```text
//! BEGIN IMMEDIATE
//!   CREATE TEMP TABLE aplicavel_staging (norma_id PK, sistema_gestao)
//!   INSERT INTO staging VALUES (?, ?), (?, ?), ...   -- batched, bound
//!   UPDATE normas AS n SET aplicavel = 1, sistema_gestao = s.sistema_gestao
//!     FROM staging AS s WHERE n.id = s.norma_id
//!   DELETE FROM staging
//! COMMIT
//! ```
//!
//! Staged ids with no matching norma are simply not joined. Reset and apply
//! run under an [`Interrupter`], so a deadline can abort them mid-statement
//! and the transaction rolls back.

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Row, TransactionBehavior, params_from_iter};

use crate::aggregate::NormaLabels;
use crate::db::{
    DbError, Interrupter, Warehouse, execute_in_transaction, with_connection,
    with_interruptible_connection,
};
use crate::model::{FilterValues, Norma, NormasFilter, Page, Pagination};

/// Bound on `IN (...)` list length for id lookups.
const ID_LOOKUP_CHUNK: usize = 500;

/// Largest staging batch: two bound variables per row must stay under
/// SQLite's 32766-variable limit.
pub const MAX_STAGING_BATCH_SIZE: usize = 16_000;

const NORMA_COLUMNS: &str = "n.id, n.tipo_norma, n.numero_norma, n.ano_publicacao, n.ementa, \
     n.situacao, n.status_vigencia, n.divisao_politica, n.origem_publicacao, n.origem_dado, \
     n.link_norma, n.data_publicacao, n.aplicavel, n.sistema_gestao";

#[async_trait]
pub trait NormasStore: Send + Sync {
    /// Clear `aplicavel` and `sistema_gestao` on every row in one statement.
    async fn reset_all_applicability(&self) -> Result<u64, DbError>;

    /// Mark every mapped norma applicable with its joined labels, as one
    /// all-or-nothing write. Returns the number of rows matched.
    async fn bulk_set_applicability(&self, labels: &NormaLabels) -> Result<u64, DbError>;

    async fn count_applicable(&self) -> Result<u64, DbError>;

    /// Subset of `ids` present in the store, ascending.
    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>, DbError>;

    async fn list(&self, filter: &NormasFilter) -> Result<Page<Norma>, DbError>;

    async fn get(&self, id: i64) -> Result<Option<Norma>, DbError>;

    /// Distinct non-null values of each listing filter column.
    async fn filter_values(&self) -> Result<FilterValues, DbError>;

    /// Abort the reset or apply in flight. Its future still resolves: with
    /// an error if the abort landed, with the committed result if not.
    fn interrupt(&self) {}
}

pub struct SqliteNormasStore {
    warehouse: Warehouse,
    staging_batch_size: usize,
    interrupter: Interrupter,
}

impl SqliteNormasStore {
    /// `staging_batch_size` is clamped to `1..=MAX_STAGING_BATCH_SIZE`.
    pub fn new(warehouse: Warehouse, staging_batch_size: usize) -> Self {
        Self {
            warehouse,
            staging_batch_size: staging_batch_size.clamp(1, MAX_STAGING_BATCH_SIZE),
            interrupter: Interrupter::default(),
        }
    }

    fn table(&self) -> String {
        self.warehouse.tables().normas.qualified()
    }
}

fn norma_from_row(row: &Row<'_>) -> rusqlite::Result<Norma> {
    Ok(Norma {
        id: row.get(0)?,
        tipo_norma: row.get(1)?,
        numero_norma: row.get(2)?,
        ano_publicacao: row.get(3)?,
        ementa: row.get(4)?,
        situacao: row.get(5)?,
        status_vigencia: row.get(6)?,
        divisao_politica: row.get(7)?,
        origem_publicacao: row.get(8)?,
        origem_dado: row.get(9)?,
        link_norma: row.get(10)?,
        data_publicacao: row.get(11)?,
        aplicavel: row.get(12)?,
        sistema_gestao: row.get(13)?,
    })
}

fn count_to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or_default()
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// WHERE clause plus bound values for a listing filter.
fn filter_clause(filter: &NormasFilter) -> (String, Vec<Value>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(aplicavel) = filter.aplicavel {
        conditions.push("n.aplicavel = ?");
        values.push(Value::Integer(i64::from(aplicavel)));
    }
    for (column, value) in [
        ("n.tipo_norma = ?", &filter.tipo_norma),
        ("n.status_vigencia = ?", &filter.status_vigencia),
        ("n.divisao_politica = ?", &filter.divisao_politica),
        ("n.origem_publicacao = ?", &filter.origem_publicacao),
        ("n.origem_dado = ?", &filter.origem_dado),
    ] {
        if let Some(v) = value {
            conditions.push(column);
            values.push(Value::Text(v.clone()));
        }
    }
    if let Some(search) = filter.search.as_deref().map(str::trim)
        && !search.is_empty()
    {
        conditions.push("(n.ementa LIKE ? ESCAPE '\\' OR n.numero_norma LIKE ? ESCAPE '\\')");
        let pattern = like_pattern(search);
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (clause, values)
}

#[async_trait]
impl NormasStore for SqliteNormasStore {
    async fn reset_all_applicability(&self) -> Result<u64, DbError> {
        let sql = format!(
            "UPDATE {} SET aplicavel = 0, sistema_gestao = NULL",
            self.table()
        );
        with_interruptible_connection(self.warehouse.pool(), &self.interrupter, move |conn| {
            let changed = conn.execute(&sql, [])?;
            Ok(changed as u64)
        })
        .await
    }

    async fn bulk_set_applicability(&self, labels: &NormaLabels) -> Result<u64, DbError> {
        if labels.is_empty() {
            return Ok(0);
        }

        let assignments: Vec<(i64, Option<String>)> = labels.assignments().collect();
        let batch_size = self.staging_batch_size;
        let update_sql = format!(
            "UPDATE {} AS n SET aplicavel = 1, sistema_gestao = s.sistema_gestao
             FROM temp.aplicavel_staging AS s
             WHERE n.id = s.norma_id",
            self.table()
        );

        let interrupter = self.interrupter.clone();
        with_interruptible_connection(self.warehouse.pool(), &self.interrupter, move |conn| {
            execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                tx.execute_batch(
                    "CREATE TEMP TABLE IF NOT EXISTS aplicavel_staging (
                        norma_id INTEGER PRIMARY KEY,
                        sistema_gestao TEXT
                    );
                    DELETE FROM temp.aplicavel_staging;",
                )?;

                for chunk in assignments.chunks(batch_size) {
                    interrupter.check()?;
                    let placeholders = vec!["(?, ?)"; chunk.len()].join(", ");
                    let sql = format!(
                        "INSERT INTO temp.aplicavel_staging (norma_id, sistema_gestao) VALUES {placeholders}"
                    );
                    let values = chunk.iter().flat_map(|(id, label)| {
                        [
                            Value::Integer(*id),
                            label.clone().map_or(Value::Null, Value::Text),
                        ]
                    });
                    tx.execute(&sql, params_from_iter(values))?;
                }

                interrupter.check()?;
                let matched = tx.execute(&update_sql, [])?;
                tx.execute("DELETE FROM temp.aplicavel_staging", [])?;
                Ok(matched as u64)
            })
        })
        .await
    }

    async fn count_applicable(&self) -> Result<u64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE aplicavel = 1", self.table());
        with_connection(self.warehouse.pool(), move |conn| {
            let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count_to_u64(n))
        })
        .await
    }

    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.to_vec();
        let table = self.table();

        with_connection(self.warehouse.pool(), move |conn| {
            let mut found = Vec::new();
            for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!("SELECT id FROM {table} WHERE id IN ({placeholders})");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter()), |row| row.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                found.extend(rows);
            }
            found.sort_unstable();
            found.dedup();
            Ok(found)
        })
        .await
    }

    async fn list(&self, filter: &NormasFilter) -> Result<Page<Norma>, DbError> {
        let (clause, values) = filter_clause(filter);
        let page = filter.page();
        let per_page = filter.per_page();
        let offset = filter.offset();
        let table = self.table();

        let count_sql = format!("SELECT COUNT(*) FROM {table} n {clause}");
        let data_sql = format!(
            "SELECT {NORMA_COLUMNS}
             FROM {table} n
             {clause}
             ORDER BY
                CASE WHEN n.data_publicacao IS NULL THEN 1 ELSE 0 END,
                n.data_publicacao DESC,
                n.id DESC
             LIMIT ? OFFSET ?"
        );

        with_connection(self.warehouse.pool(), move |conn| {
            let total: i64 =
                conn.query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))?;

            let mut data_values = values;
            data_values.push(Value::Integer(i64::from(per_page)));
            data_values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

            let mut stmt = conn.prepare(&data_sql)?;
            let data = stmt
                .query_map(params_from_iter(data_values.iter()), norma_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page {
                data,
                pagination: Pagination::new(page, per_page, count_to_u64(total)),
            })
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Option<Norma>, DbError> {
        let sql = format!("SELECT {NORMA_COLUMNS} FROM {} n WHERE n.id = ?1", self.table());
        with_connection(self.warehouse.pool(), move |conn| {
            use rusqlite::OptionalExtension;
            Ok(conn.query_row(&sql, [id], norma_from_row).optional()?)
        })
        .await
    }

    async fn filter_values(&self) -> Result<FilterValues, DbError> {
        let table = self.table();
        with_connection(self.warehouse.pool(), move |conn| {
            let distinct = |column: &str| -> Result<Vec<String>, DbError> {
                let sql = format!(
                    "SELECT DISTINCT {column} FROM {table}
                     WHERE {column} IS NOT NULL
                     ORDER BY {column}"
                );
                let mut stmt = conn.prepare(&sql)?;
                let values = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(values)
            };
            Ok(FilterValues {
                tipo_norma: distinct("tipo_norma")?,
                status_vigencia: distinct("status_vigencia")?,
                divisao_politica: distinct("divisao_politica")?,
                origem_publicacao: distinct("origem_publicacao")?,
                origem_dado: distinct("origem_dado")?,
            })
        })
        .await
    }

    fn interrupt(&self) {
        self.interrupter.interrupt();
    }
}
