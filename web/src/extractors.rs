//! Custom Axum extractors.
//!
//! - `SessionHolder`: the shopper's session from `X-Session-Id` (401 if absent)
//! - `CorrelationId`: the request's correlation id
//! - `ApiJson`: a JSON body whose rejections become [`AppError`]s
//!
//! # Examples
//!
//! ```ignore
//! use moby_comps_web::extractors::{ApiJson, CorrelationId, SessionHolder};
//!
//! async fn handler(
//!     State(state): State<AppState>,
//!     correlation_id: CorrelationId,
//!     SessionHolder(holder): SessionHolder,
//!     ApiJson(body): ApiJson<SettleRequest>,
//! ) -> Result<Json<Settlement>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, %holder, "Settling");
//!     Ok(Json(settlement))
//! }
//! ```

use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts},
    http::request::Parts,
};
use moby_comps_core::types::HolderId;
use uuid::Uuid;

/// Header carrying the shopper's session id.
pub const SESSION_HEADER: &str = "X-Session-Id";

/// The session that owns holds, cart rows and entries.
///
/// The session/auth provider hands the browser a UUID which it sends back in
/// `X-Session-Id`. A missing or malformed header is a 401, so no ticket or
/// cart route ever runs without an owner.
#[derive(Debug, Clone, Copy)]
pub struct SessionHolder(pub HolderId);

#[async_trait]
impl<S> FromRequestParts<S> for SessionHolder
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(|id| Self(HolderId::from_uuid(id)))
            .ok_or_else(|| AppError::unauthorized(format!("Missing or invalid {SESSION_HEADER} header")))
    }
}

/// Correlation ID for request tracing.
///
/// Taken from the correlation middleware if installed, else from the
/// `X-Correlation-ID` header, else a fresh UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(crate::middleware::CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// JSON body extractor that rejects with a 400 [`AppError`].
#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);
