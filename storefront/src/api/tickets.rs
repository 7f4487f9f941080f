//! Ticket hold endpoints.
//!
//! - POST /tickets/:id/reserve - Hold a batch of numbers, all or nothing
//! - POST /tickets/:id/release - Give held numbers back early

use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use moby_comps_core::types::{CompetitionId, Timestamp};
use moby_comps_web::{ApiJson, AppError, SessionHolder};
use serde::{Deserialize, Serialize};

/// Body of reserve and release requests.
#[derive(Debug, Deserialize)]
pub struct NumbersRequest {
    /// Ticket numbers
    pub numbers: Vec<u32>,
}

/// A successful hold.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    /// Held numbers, ascending
    pub reserved: Vec<u32>,
    /// Hold deadline
    pub expires_at: Timestamp,
}

/// Reserve numbers for the session.
///
/// ```bash
/// curl -X POST http://localhost:8080/tickets/$COMPETITION/reserve \
///   -H "X-Session-Id: $SESSION" -d '{"numbers":[1,2]}'
/// # {"reserved":[1,2],"expiresAt":"2025-01-01T00:15:00Z"}
/// ```
///
/// # Errors
///
/// 409 with `unavailable` when any number is taken; 400 for a bad selection;
/// 404 for an unknown competition; 409 when it is not live.
pub async fn reserve(
    State(state): State<AppState>,
    Path(competition_id): Path<CompetitionId>,
    SessionHolder(holder): SessionHolder,
    ApiJson(body): ApiJson<NumbersRequest>,
) -> Result<Json<ReserveResponse>, AppError> {
    let reservation = state
        .services
        .reservations
        .reserve(competition_id, body.numbers, holder)
        .await?;

    Ok(Json(ReserveResponse {
        reserved: reservation.numbers.iter().map(|n| n.get()).collect(),
        expires_at: reservation.expires_at,
    }))
}

/// Release numbers the session holds. Numbers it does not hold are ignored.
///
/// # Errors
///
/// Store failures only.
pub async fn release(
    State(state): State<AppState>,
    Path(competition_id): Path<CompetitionId>,
    SessionHolder(holder): SessionHolder,
    ApiJson(body): ApiJson<NumbersRequest>,
) -> Result<StatusCode, AppError> {
    state
        .services
        .reservations
        .release(competition_id, body.numbers, holder)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
