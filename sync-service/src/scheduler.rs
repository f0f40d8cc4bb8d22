//! Periodic reconciliation.
//!
//! The first tick fires one full interval after startup. A tick that
//! finds a run already in flight is logged and skipped; the next attempt
//! is the following tick.

use std::sync::Arc;
use std::time::Duration;

use normas_core::SyncError;
use normas_core::model::SyncTrigger;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::service::SyncService;

/// Run the schedule until `shutdown` flips to `true`.
pub async fn run_schedule(
    service: Arc<SyncService>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_secs = period.as_secs(), "Sync schedule armed");

    loop {
        service.set_next_scheduled_run(next_run_at(period)).await;

        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match service.run_sync(SyncTrigger::Scheduled).await {
            Ok(outcome) => {
                tracing::info!(updated = outcome.updated, "Scheduled sync finished");
            }
            Err(SyncError::ConcurrentSyncInProgress) => {
                tracing::warn!("Scheduled sync skipped: a run is already in flight");
            }
            Err(e) => {
                // Already logged by the reconciler; the next tick retries.
                tracing::debug!("Scheduled sync failed: {e}");
            }
        }
    }

    service.set_next_scheduled_run(None).await;
    tracing::info!("Sync schedule stopped");
}

fn next_run_at(period: Duration) -> Option<chrono::DateTime<chrono::Utc>> {
    let period = chrono::Duration::from_std(period).ok()?;
    chrono::Utc::now().checked_add_signed(period)
}
