//! # Moby Comps Storefront
//!
//! HTTP service over the ticket reservation core. Shoppers hold ticket numbers
//! for a limited time, collect holds in a cart and settle them against a
//! confirmed external payment.
//!
//! ```text
//!   HTTP (axum) ──► Services (moby-comps-runtime) ──► Storage (Postgres)
//!                          │
//!                          └──► ExpirySweeper (background task)
//! ```
//!
//! Several instances can run against the same database: every mutual
//! exclusion is a conditional update in Postgres.

pub mod api;
pub mod config;
pub mod payment;
pub mod server;

pub use config::Config;
pub use server::{AppState, build_router};
