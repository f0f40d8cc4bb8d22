//! Applicability reconciler.
//!
//! One run: reset -> fetch -> aggregate -> apply -> verify, strictly in that
//! order. Any phase failure aborts the run with no further phases. Once the
//! reset has committed, a failed fetch or apply leaves every norma
//! non-applicable (fail-closed) and the error says so.
//!
//! At most one run is in flight per reconciler; a second trigger is
//! rejected with [`SyncError::ConcurrentSyncInProgress`] without touching
//! the store.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::aggregate::aggregate;
use crate::config::SyncSettings;
use crate::db::DbError;
use crate::error::{ReadError, SyncError};
use crate::model::{
    OrphanReport, SyncOutcome, SyncPhase, SyncReport, SyncStatus, SyncTrigger,
};
use crate::source::ClassificationSource;
use crate::store::NormasStore;

pub const SYNC_COMPLETED_MESSAGE: &str = "Sync completed successfully";
pub const NO_CLASSIFICATIONS_MESSAGE: &str = "No classified normas found";

/// How often an interrupted store write is re-interrupted until it settles.
const INTERRUPT_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct ReconcilerState {
    phase: SyncPhase,
    last_run: Option<SyncReport>,
}

pub struct Reconciler {
    store: Arc<dyn NormasStore>,
    source: Arc<dyn ClassificationSource>,
    phase_timeout: Duration,
    /// Held for the whole run.
    run_guard: Mutex<()>,
    state: RwLock<ReconcilerState>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn NormasStore>,
        source: Arc<dyn ClassificationSource>,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            store,
            source,
            phase_timeout: settings.phase_timeout(),
            run_guard: Mutex::new(()),
            state: RwLock::new(ReconcilerState {
                phase: SyncPhase::Stale,
                last_run: None,
            }),
        }
    }

    /// Override the per-phase I/O deadline.
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Whether a run currently holds the guard.
    pub fn is_running(&self) -> bool {
        self.run_guard.try_lock().is_err()
    }

    pub async fn status(&self) -> SyncStatus {
        let state = self.state.read().await;
        SyncStatus {
            phase: state.phase,
            running: self.is_running(),
            last_run: state.last_run.clone(),
        }
    }

    pub async fn last_run(&self) -> Option<SyncReport> {
        self.state.read().await.last_run.clone()
    }

    /// Wait for the run in flight to finish, then reject new runs for as
    /// long as the returned guard is held.
    pub async fn quiesce(&self) -> MutexGuard<'_, ()> {
        if self.is_running() {
            tracing::info!("Waiting for the aplicavel sync in flight");
        }
        self.run_guard.lock().await
    }

    /// Run one full reconciliation.
    ///
    /// On success `updated` is the store's own count of applicable normas
    /// after the apply, not the size of the classification mapping.
    pub async fn reconcile(&self, trigger: SyncTrigger) -> Result<SyncOutcome, SyncError> {
        let Ok(_running) = self.run_guard.try_lock() else {
            tracing::warn!(?trigger, "Aplicavel sync rejected: a run is already in flight");
            return Err(SyncError::ConcurrentSyncInProgress);
        };

        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(?trigger, "Aplicavel sync started");

        let mut classified = None;
        let result = self.run(&mut classified).await;

        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        let report = match &result {
            Ok(outcome) => {
                tracing::info!(
                    ?trigger,
                    updated = outcome.updated,
                    classified = classified.unwrap_or_default(),
                    duration_ms,
                    "Aplicavel sync completed"
                );
                SyncReport {
                    trigger,
                    state: SyncPhase::Reconciled,
                    started_at: started_at.to_rfc3339(),
                    finished_at: Utc::now().to_rfc3339(),
                    duration_ms,
                    updated: Some(outcome.updated),
                    classified,
                    error: None,
                    flags_cleared: false,
                }
            }
            Err(err) => {
                tracing::error!(
                    ?trigger,
                    category = err.category().as_str(),
                    flags_cleared = err.flags_cleared(),
                    duration_ms,
                    "Aplicavel sync failed: {err}"
                );
                SyncReport {
                    trigger,
                    state: SyncPhase::Failed,
                    started_at: started_at.to_rfc3339(),
                    finished_at: Utc::now().to_rfc3339(),
                    duration_ms,
                    updated: None,
                    classified,
                    error: Some(err.operator_message()),
                    flags_cleared: err.flags_cleared(),
                }
            }
        };

        let mut state = self.state.write().await;
        state.phase = report.state;
        state.last_run = Some(report);
        result
    }

    async fn run(&self, classified: &mut Option<u64>) -> Result<SyncOutcome, SyncError> {
        self.enter(SyncPhase::Resetting).await;
        let started = Instant::now();
        let reset = self
            .timed_write(SyncPhase::Resetting, self.store.reset_all_applicability())
            .await
            .map_err(|failure| {
                if failure.committed {
                    failure.error.with_flags_cleared()
                } else {
                    failure.error
                }
            })?;
        tracing::info!(
            phase = "resetting",
            rows = reset,
            elapsed_ms = elapsed_ms(started),
            "Applicability flags cleared"
        );

        // From here on a failure leaves the store all-false until the
        // next successful run.
        self.enter(SyncPhase::Fetching).await;
        let started = Instant::now();
        let rows = self
            .timed(SyncPhase::Fetching, self.source.fetch_true_classifications())
            .await
            .map_err(SyncError::with_flags_cleared)?;
        tracing::info!(
            phase = "fetching",
            rows = rows.len(),
            elapsed_ms = elapsed_ms(started),
            "True classifications fetched"
        );

        if rows.is_empty() {
            *classified = Some(0);
            tracing::info!("No true classifications, store left fully reset");
            return Ok(SyncOutcome {
                message: NO_CLASSIFICATIONS_MESSAGE.to_string(),
                updated: 0,
            });
        }

        self.enter(SyncPhase::Aggregating).await;
        let labels = aggregate(rows);
        *classified = Some(labels.len() as u64);
        tracing::debug!(phase = "aggregating", normas = labels.len(), "Labels aggregated");

        self.enter(SyncPhase::Applying).await;
        let started = Instant::now();
        let matched = self
            .timed_write(SyncPhase::Applying, self.store.bulk_set_applicability(&labels))
            .await
            .map_err(|failure| {
                if failure.committed {
                    failure.error
                } else {
                    failure.error.with_flags_cleared()
                }
            })?;
        let unmatched = (labels.len() as u64).saturating_sub(matched);
        tracing::info!(
            phase = "applying",
            matched,
            unmatched,
            elapsed_ms = elapsed_ms(started),
            "Applicability flags applied"
        );

        // The apply has committed; a verify failure leaves the flags set.
        self.enter(SyncPhase::Verifying).await;
        let updated = self
            .timed(SyncPhase::Verifying, self.store.count_applicable())
            .await?;

        Ok(SyncOutcome {
            message: SYNC_COMPLETED_MESSAGE.to_string(),
            updated,
        })
    }

    /// Read-only: norma ids referenced by true classifications but absent
    /// from the store. Does not take the run guard.
    pub async fn find_orphans(&self) -> Result<OrphanReport, ReadError> {
        let rows = self
            .source
            .fetch_true_classifications()
            .await
            .map_err(ReadError::Source)?;
        let labels = aggregate(rows);
        let ids: Vec<i64> = labels.ids().collect();

        let existing = self
            .store
            .existing_ids(&ids)
            .await
            .map_err(ReadError::Store)?;

        let orphan_ids: Vec<i64> = ids
            .into_iter()
            .filter(|id| existing.binary_search(id).is_err())
            .collect();
        if !orphan_ids.is_empty() {
            tracing::warn!(
                orphans = orphan_ids.len(),
                "Classifications reference normas missing from the store"
            );
        }

        Ok(OrphanReport {
            classified: labels.len() as u64,
            orphan_ids,
        })
    }

    async fn enter(&self, phase: SyncPhase) {
        tracing::debug!(phase = phase.as_str(), "Entering phase");
        self.state.write().await.phase = phase;
    }

    /// Apply the phase deadline to a read and classify the failure.
    ///
    /// The fetch phase reports `SourceUnavailable`, verify
    /// `StoreUnavailable`. A timed-out read is abandoned.
    async fn timed<T>(
        &self,
        phase: SyncPhase,
        io: impl Future<Output = Result<T, DbError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.phase_timeout, io).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if phase == SyncPhase::Fetching => {
                Err(SyncError::source_unavailable(phase, e))
            }
            Ok(Err(e)) => Err(SyncError::store_unavailable(phase, e)),
            Err(_) => Err(SyncError::timed_out(phase, self.phase_timeout.as_secs())),
        }
    }

    /// Apply the phase deadline to a store write.
    ///
    /// Past the deadline the write is interrupted and the phase fails as a
    /// timeout, but only once the write has settled: the failure records
    /// whether it rolled back or committed anyway.
    async fn timed_write<T>(
        &self,
        phase: SyncPhase,
        io: impl Future<Output = Result<T, DbError>>,
    ) -> Result<T, WriteFailure> {
        let mut io = std::pin::pin!(io);
        if let Ok(result) = tokio::time::timeout(self.phase_timeout, io.as_mut()).await {
            return result.map_err(|e| WriteFailure {
                error: SyncError::store_unavailable(phase, e),
                committed: false,
            });
        }

        tracing::warn!(
            phase = phase.as_str(),
            timeout_secs = self.phase_timeout.as_secs(),
            "Phase deadline passed, interrupting store write"
        );
        let settled = loop {
            self.store.interrupt();
            if let Ok(result) = tokio::time::timeout(INTERRUPT_RETRY, io.as_mut()).await {
                break result;
            }
        };

        let committed = match settled {
            Ok(_) => {
                tracing::warn!(
                    phase = phase.as_str(),
                    "Store write committed after its deadline"
                );
                true
            }
            Err(e) => {
                tracing::debug!(phase = phase.as_str(), "Interrupted store write: {e}");
                false
            }
        };
        Err(WriteFailure {
            error: SyncError::timed_out(phase, self.phase_timeout.as_secs()),
            committed,
        })
    }
}

/// A failed store write, and whether it reached the store regardless.
struct WriteFailure {
    error: SyncError,
    committed: bool,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
