//! HTTP API for the storefront.
//!
//! Shopper routes identify the session through `X-Session-Id`; admin routes
//! through `X-Admin-Token`. Handlers are thin: extract, call one service,
//! map the result.

pub mod admin;
pub mod cart;
pub mod checkout;
pub mod competitions;
pub mod entries;
pub mod tickets;
