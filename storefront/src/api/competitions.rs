//! Public catalog endpoints.
//!
//! - GET /competitions - Live competitions
//! - GET /competitions/:id - One competition
//! - GET /competitions/:id/availability - Taken numbers, for the ticket picker

use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use moby_comps_core::types::{Competition, CompetitionId, CompetitionStatus};
use moby_comps_runtime::Availability;
use moby_comps_web::AppError;

/// List live competitions.
///
/// # Errors
///
/// Store failures only.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Competition>>, AppError> {
    let competitions = state
        .services
        .competitions
        .list(Some(CompetitionStatus::Live))
        .await?;
    Ok(Json(competitions))
}

/// Load one competition.
///
/// # Errors
///
/// 404 for an unknown id.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<CompetitionId>,
) -> Result<Json<Competition>, AppError> {
    Ok(Json(state.services.competitions.get(id).await?))
}

/// Reserved and purchased numbers, after sweeping lapsed holds.
///
/// Holders are never exposed.
///
/// # Errors
///
/// 404 for an unknown id.
pub async fn availability(
    State(state): State<AppState>,
    Path(id): Path<CompetitionId>,
) -> Result<Json<Availability>, AppError> {
    Ok(Json(state.services.reservations.availability(id).await?))
}
