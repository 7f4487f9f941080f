//! Admin endpoints for the competition lifecycle.
//!
//! - POST /admin/competitions - Create a draft
//! - POST /admin/competitions/:id/status - Move through the lifecycle
//!
//! Every request must carry `X-Admin-Token` matching `ADMIN_TOKEN`. With no
//! token configured the admin API refuses everything.

use crate::server::state::AppState;
use axum::{
    Json, async_trait,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
};
use moby_comps_core::types::{Competition, CompetitionId, CompetitionStatus};
use moby_comps_runtime::NewCompetition;
use moby_comps_web::{ApiJson, AppError};
use serde::Deserialize;

/// Header carrying the admin token.
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Proof that the request carried the configured admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin.token.as_deref() else {
            return Err(AppError::forbidden("Admin API is disabled"));
        };

        let presented = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized(format!("Missing {ADMIN_TOKEN_HEADER} header")))?;

        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(Self)
        } else {
            tracing::warn!("Rejected admin request with wrong token");
            Err(AppError::unauthorized("Invalid admin token"))
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Body of the status transition request.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    /// Target status
    pub status: CompetitionStatus,
}

/// Create a draft competition.
///
/// # Errors
///
/// 400 for a blank title or zero tickets.
pub async fn create_competition(
    _admin: AdminAuth,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewCompetition>,
) -> Result<(StatusCode, Json<Competition>), AppError> {
    let competition = state.services.competitions.create(body).await?;
    Ok((StatusCode::CREATED, Json(competition)))
}

/// Move a competition to a new status.
///
/// # Errors
///
/// 404 for an unknown id, 409 when the lifecycle forbids the move.
pub async fn transition(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<CompetitionId>,
    ApiJson(body): ApiJson<StatusRequest>,
) -> Result<Json<Competition>, AppError> {
    let competition = state
        .services
        .competitions
        .transition(id, body.status)
        .await?;
    Ok(Json(competition))
}
