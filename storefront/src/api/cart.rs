//! Cart endpoints.
//!
//! The cart is re-derived from live holds on every read; clients only cache it.

use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use moby_comps_core::types::{CartItem, CartItemId, CompetitionId};
use moby_comps_runtime::CartView;
use moby_comps_web::{ApiJson, AppError, SessionHolder};
use serde::Deserialize;

/// Body of `POST /cart/items`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    /// Competition to reserve in
    pub competition_id: CompetitionId,
    /// Numbers to reserve
    pub numbers: Vec<u32>,
}

/// GET /cart
///
/// # Errors
///
/// Store failures only.
pub async fn view(
    State(state): State<AppState>,
    SessionHolder(holder): SessionHolder,
) -> Result<Json<CartView>, AppError> {
    Ok(Json(state.services.cart.view(holder).await?))
}

/// POST /cart/items - reserve and add to the cart in one step.
///
/// # Errors
///
/// Same as reserving the numbers directly.
pub async fn add_item(
    State(state): State<AppState>,
    SessionHolder(holder): SessionHolder,
    ApiJson(body): ApiJson<AddItemRequest>,
) -> Result<(StatusCode, Json<CartItem>), AppError> {
    let item = state
        .services
        .cart
        .add_item(holder, body.competition_id, body.numbers)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// DELETE /cart/items/:id
///
/// # Errors
///
/// 404 for an unknown item, 403 for another session's item.
pub async fn remove_item(
    State(state): State<AppState>,
    Path(item_id): Path<CartItemId>,
    SessionHolder(holder): SessionHolder,
) -> Result<StatusCode, AppError> {
    state.services.cart.remove_item(holder, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /cart
///
/// # Errors
///
/// Store failures only.
pub async fn clear(
    State(state): State<AppState>,
    SessionHolder(holder): SessionHolder,
) -> Result<StatusCode, AppError> {
    state.services.cart.clear(holder).await?;
    Ok(StatusCode::NO_CONTENT)
}
