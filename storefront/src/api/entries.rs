//! Entries of the session.

use crate::server::state::AppState;
use axum::{Json, extract::State};
use moby_comps_core::types::Entry;
use moby_comps_web::{AppError, SessionHolder};

/// GET /entries - newest first.
///
/// # Errors
///
/// Store failures only.
pub async fn list(
    State(state): State<AppState>,
    SessionHolder(holder): SessionHolder,
) -> Result<Json<Vec<Entry>>, AppError> {
    Ok(Json(state.services.checkout.entries(holder).await?))
}
