//! Application state for the storefront HTTP server.

use crate::config::Config;
use axum::extract::FromRef;
use moby_comps_core::store::Storage;
use moby_comps_runtime::Services;
use moby_comps_runtime::metrics::MetricsRecorder;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Reservation, cart, checkout and catalog services
    pub services: Services,

    /// Store behind the services, for readiness checks
    pub store: Arc<dyn Storage>,

    /// Loaded configuration
    pub config: Arc<Config>,

    /// Prometheus recorder rendered by `/metrics`
    pub metrics: Arc<MetricsRecorder>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(
        services: Services,
        store: Arc<dyn Storage>,
        config: Arc<Config>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            services,
            store,
            config,
            metrics,
        }
    }
}

// Lets the shared readiness handler extract the store directly.
impl FromRef<AppState> for Arc<dyn Storage> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.store)
    }
}
