//! Operational endpoints: liveness, readiness and Prometheus metrics.

use super::state::AppState;
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};

pub use moby_comps_web::handlers::{health_check, readiness};

/// Prometheus scrape endpoint.
///
/// ```bash
/// curl http://localhost:8080/metrics
/// # moby_reservations_total{outcome="reserved"} 12
/// ```
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
