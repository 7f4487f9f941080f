//! Expiry sweeper.
//!
//! A hold's timeout is data (`reserved_until`), not a timer. The sweeper turns
//! lapsed holds back into available tickets, either lazily for one competition
//! on the reservation path or periodically for all competitions from a
//! background task.

use crate::metrics;
use moby_comps_core::environment::Clock;
use moby_comps_core::error::StoreError;
use moby_comps_core::store::Storage;
use moby_comps_core::types::{CompetitionId, Timestamp};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Returns expired reservations to available.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl ExpirySweeper {
    /// Create a sweeper over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Reclaim every reservation with `reserved_until <= now`.
    ///
    /// Idempotent; returns the number of tickets reclaimed by this call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: Timestamp) -> Result<u64, StoreError> {
        let started = Instant::now();
        let swept = self.store.sweep_expired(None, now).await?;
        metrics::record_sweep(swept, started.elapsed());
        if swept > 0 {
            tracing::info!(swept, "Expired holds reclaimed");
        }
        Ok(swept)
    }

    /// Reclaim expired reservations of one competition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    #[tracing::instrument(skip(self), fields(competition_id = %competition_id))]
    pub async fn sweep_competition(
        &self,
        competition_id: CompetitionId,
        now: Timestamp,
    ) -> Result<u64, StoreError> {
        let started = Instant::now();
        let swept = self.store.sweep_expired(Some(competition_id), now).await?;
        metrics::record_sweep(swept, started.elapsed());
        if swept > 0 {
            tracing::debug!(swept, "Lazily reclaimed expired holds");
        }
        Ok(swept)
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` turns true.
    ///
    /// Failures are logged and the loop keeps going.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = interval.as_secs(), "Expiry sweeper started");

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(self.clock.now()).await {
                            tracing::error!(error = %e, "Expiry sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Expiry sweeper stopped");
        })
    }
}
