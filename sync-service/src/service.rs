//! SyncService: shared state behind the socket and the scheduler.
//!
//! One instance per process. Owns the reconciler (and with it the run
//! guard), the read-side store and classification reader, and the
//! schedule bookkeeping reported by `service.status`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use normas_core::config::{NormasConfig, SyncSettings};
use normas_core::db::DbError;
use normas_core::model::{
    FilterValues, Norma, NormasFilter, OrphanReport, Page, SyncOutcome, SyncStatus, SyncTrigger,
};
pub use normas_core::ReadError;
use normas_core::{
    ClassificationSource, ConfigError, NormasStore, Reconciler, SqliteClassificationSource,
    SqliteNormasStore, SyncError, Warehouse,
};
use tokio::sync::{MutexGuard, RwLock};

use crate::protocol::{ManagementSystemsResult, NormaDetail, ServiceStatusResult};

/// Startup failure.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("warehouse error: {0}")]
    Warehouse(#[from] DbError),
}

pub struct SyncService {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn NormasStore>,
    source: Arc<dyn ClassificationSource>,
    settings: SyncSettings,
    started_at: Instant,
    next_scheduled_run: RwLock<Option<DateTime<Utc>>>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn NormasStore>,
        source: Arc<dyn ClassificationSource>,
        settings: SyncSettings,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&source),
            &settings,
        ));
        Self {
            reconciler,
            store,
            source,
            settings,
            started_at: Instant::now(),
            next_scheduled_run: RwLock::new(None),
        }
    }

    /// Open the warehouse described by `cfg` and wire the SQLite store and
    /// classification reader onto it.
    pub fn open(cfg: &NormasConfig) -> Result<Self, ServiceError> {
        cfg.validate()?;
        let warehouse = Warehouse::open(cfg)?;
        Ok(Self::with_warehouse(warehouse, cfg.sync.clone()))
    }

    pub fn with_warehouse(warehouse: Warehouse, settings: SyncSettings) -> Self {
        let store = Arc::new(SqliteNormasStore::new(
            warehouse.clone(),
            settings.staging_batch_size,
        ));
        let source = Arc::new(SqliteClassificationSource::new(warehouse));
        Self::new(store, source, settings)
    }

    /// Service uptime in seconds.
    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn run_sync(&self, trigger: SyncTrigger) -> Result<SyncOutcome, SyncError> {
        self.reconciler.reconcile(trigger).await
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.reconciler.status().await
    }

    /// Wait for the sync in flight, then hold off new ones while the guard
    /// lives. Used on shutdown.
    pub async fn quiesce(&self) -> MutexGuard<'_, ()> {
        self.reconciler.quiesce().await
    }

    pub async fn orphans(&self) -> Result<OrphanReport, ReadError> {
        self.reconciler.find_orphans().await
    }

    pub async fn list_normas(&self, filter: &NormasFilter) -> Result<Page<Norma>, ReadError> {
        self.store.list(filter).await.map_err(ReadError::Store)
    }

    /// One norma with all of its classification rows.
    pub async fn get_norma(&self, id: i64) -> Result<NormaDetail, ReadError> {
        let norma = self
            .store
            .get(id)
            .await
            .map_err(ReadError::Store)?
            .ok_or(ReadError::NotFound { id })?;
        let classifications = self
            .source
            .classifications_for_norma(id)
            .await
            .map_err(ReadError::Source)?;
        Ok(NormaDetail {
            norma,
            management_systems_classifications: classifications,
        })
    }

    pub async fn filter_values(&self) -> Result<FilterValues, ReadError> {
        self.store.filter_values().await.map_err(ReadError::Store)
    }

    pub async fn management_systems(&self) -> Result<ManagementSystemsResult, ReadError> {
        let systems = self
            .source
            .management_systems()
            .await
            .map_err(ReadError::Source)?;
        Ok(ManagementSystemsResult { systems })
    }

    pub async fn set_next_scheduled_run(&self, at: Option<DateTime<Utc>>) {
        *self.next_scheduled_run.write().await = at;
    }

    pub async fn status(&self) -> ServiceStatusResult {
        let sync = self.reconciler.status().await;
        ServiceStatusResult {
            uptime_s: self.uptime_s(),
            sync_running: sync.running,
            sync_phase: sync.phase,
            schedule_enabled: self.settings.schedule_enabled,
            schedule_interval_secs: self.settings.schedule_interval_secs,
            next_scheduled_run: self
                .next_scheduled_run
                .read()
                .await
                .map(|at| at.to_rfc3339()),
        }
    }
}
