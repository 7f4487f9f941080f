//! Prometheus metrics for the reservation core.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `moby_reservations_total{outcome}` - Reservation attempts by outcome
//!   (`reserved`, `conflict`, `rejected`, `error`)
//! - `moby_tickets_released_total` - Tickets released by their holder
//! - `moby_tickets_swept_total` - Expired holds returned to available
//! - `moby_settlements_total{outcome}` - Settlements by outcome
//!   (`completed`, `partial`, `replayed`, `unconfirmed`, `in_flight`)
//! - `moby_tickets_purchased_total` - Tickets converted to entries
//! - `moby_settlement_failed_tickets_total` - Tickets that lapsed before settlement
//!
//! ## Histograms
//! - `moby_sweep_duration_seconds` - Time taken by one sweep
//!
//! # Example
//!
//! ```rust,no_run
//! use moby_comps_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//! let body = recorder.render();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders its scrape output.
///
/// The HTTP server serves the rendered text on `/metrics`.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Recorder that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (tests) is tolerated with a warning.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Empty when the recorder was never installed.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

fn register_metrics() {
    describe_counter!(
        "moby_reservations_total",
        "Reservation attempts by outcome (reserved, conflict, rejected, error)"
    );
    describe_counter!(
        "moby_tickets_released_total",
        "Tickets released early by their holder"
    );
    describe_counter!(
        "moby_tickets_swept_total",
        "Expired holds returned to available"
    );
    describe_counter!(
        "moby_settlements_total",
        "Settlements by outcome (completed, partial, replayed, unconfirmed, in_flight)"
    );
    describe_counter!(
        "moby_tickets_purchased_total",
        "Tickets converted into entries"
    );
    describe_counter!(
        "moby_settlement_failed_tickets_total",
        "Tickets that lapsed before settlement"
    );
    describe_histogram!(
        "moby_sweep_duration_seconds",
        "Time taken by one expiry sweep"
    );
}

/// Outcome label for `moby_reservations_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Every requested number was reserved
    Reserved,
    /// At least one number was held by someone else
    Conflict,
    /// Validation or lifecycle rejection
    Rejected,
    /// Storage failure
    Error,
}

impl ReservationOutcome {
    const fn label(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Conflict => "conflict",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

/// Record a reservation attempt.
pub fn record_reservation(outcome: ReservationOutcome) {
    counter!("moby_reservations_total", "outcome" => outcome.label()).increment(1);
}

/// Record tickets released by their holder.
pub fn record_released(count: usize) {
    counter!("moby_tickets_released_total").increment(count as u64);
}

/// Record one sweep.
pub fn record_sweep(swept: u64, elapsed: Duration) {
    counter!("moby_tickets_swept_total").increment(swept);
    histogram!("moby_sweep_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record a settlement attempt by outcome label.
pub fn record_settlement(outcome: &'static str) {
    counter!("moby_settlements_total", "outcome" => outcome).increment(1);
}

/// Record the ticket counts of a completed settlement.
pub fn record_settled_tickets(purchased: usize, failed: usize) {
    counter!("moby_tickets_purchased_total").increment(purchased as u64);
    counter!("moby_settlement_failed_tickets_total").increment(failed as u64);
}
