//! Settlement endpoint.

use crate::server::state::AppState;
use axum::{Json, extract::State};
use moby_comps_core::types::{PaymentRef, Settlement};
use moby_comps_web::{ApiJson, AppError, SessionHolder};
use serde::Deserialize;

/// Body of `POST /checkout/settle`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// Processor reference of the confirmed payment
    pub payment_ref: String,
}

/// Convert the session's holds into entries once the payment is confirmed.
///
/// Settling the same reference again returns the stored outcome.
///
/// ```json
/// {"purchased":[{"competitionId":"…","numbers":[2]}],"failed":[{"competitionId":"…","numbers":[1]}]}
/// ```
///
/// # Errors
///
/// 400 for a blank reference, 402 when the payment is not confirmed, 409 while
/// another request settles it, 403 when another session settled it.
pub async fn settle(
    State(state): State<AppState>,
    SessionHolder(holder): SessionHolder,
    ApiJson(body): ApiJson<SettleRequest>,
) -> Result<Json<Settlement>, AppError> {
    let payment_ref = PaymentRef::parse(body.payment_ref)?;
    let settlement = state.services.checkout.settle(holder, payment_ref).await?;
    Ok(Json(settlement))
}
