//! Health check endpoints.
//!
//! Liveness never touches dependencies. Readiness pings the store, so a load
//! balancer stops routing shoppers to an instance that cannot reach Postgres.

use axum::{Json, extract::State, http::StatusCode};
use moby_comps_core::store::Storage;
use serde::Serialize;
use std::sync::Arc;

/// Readiness of one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Component checked
    pub component: &'static str,
    /// `ok` or `unavailable`
    pub status: &'static str,
    /// Failure detail, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Liveness probe.
///
/// ```text
/// GET /health  →  200 "ok"
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness probe: 200 when the store answers, 503 otherwise.
///
/// ```text
/// GET /ready  →  {"component": "store", "status": "ok"}
/// ```
pub async fn readiness(
    State(store): State<Arc<dyn Storage>>,
) -> (StatusCode, Json<HealthReport>) {
    match store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthReport {
                component: "store",
                status: "ok",
                message: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport {
                    component: "store",
                    status: "unavailable",
                    message: Some("store unreachable".to_string()),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moby_comps_testing::InMemoryStore;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_readiness_with_reachable_store() {
        let store: Arc<dyn Storage> = Arc::new(InMemoryStore::new());

        let (status, Json(report)) = readiness(State(store)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, "ok");
    }
}
