//! Axum integration for the Moby Comps reservation core.
//!
//! The services in `moby-comps-runtime` know nothing about HTTP. This crate is
//! the thin shell between them and Axum:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         HTTP shell (Axum)               │  ← session header, JSON bodies
//! │  - extractors, error mapping            │  ← correlation ids, tracing spans
//! ├─────────────────────────────────────────┤
//! │         Reservation services            │
//! │  - reserve / release / cart / settle    │  ← conditional updates in storage
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. The correlation layer opens a span and tags the request
//! 2. [`SessionHolder`] turns `X-Session-Id` into a `HolderId` (401 otherwise)
//! 3. [`ApiJson`] parses the body (400 otherwise)
//! 4. The handler calls a service
//! 5. A `ReservationError` becomes an [`AppError`] with the right status
//!
//! # Example
//!
//! ```ignore
//! use moby_comps_web::{ApiJson, AppError, SessionHolder};
//!
//! async fn release(
//!     State(state): State<AppState>,
//!     Path(id): Path<CompetitionId>,
//!     SessionHolder(holder): SessionHolder,
//!     ApiJson(body): ApiJson<NumbersRequest>,
//! ) -> Result<StatusCode, AppError> {
//!     state.services.reservations.release(id, body.numbers, holder).await?;
//!     Ok(StatusCode::NO_CONTENT)
//! }
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{ApiJson, CorrelationId, SESSION_HEADER, SessionHolder};
pub use middleware::{CORRELATION_ID_HEADER, CorrelationIdExt, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
