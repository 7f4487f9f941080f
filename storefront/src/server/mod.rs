//! HTTP server for the storefront.
//!
//! - Application state shared by handlers
//! - Operational endpoints (liveness, readiness, metrics)
//! - Router configuration

pub mod health;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
