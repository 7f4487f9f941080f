//! Router configuration for the storefront.

use super::health::{health_check, metrics, readiness};
use super::state::AppState;
use crate::api::{admin, cart, checkout, competitions, entries, tickets};
use axum::{
    Router,
    routing::{delete, get, post},
};
use moby_comps_web::correlation_id_layer;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - Operational: `/health`, `/ready`, `/metrics`
/// - Catalog: `/competitions`
/// - Shopper (`X-Session-Id`): `/tickets`, `/cart`, `/checkout`, `/entries`
/// - Admin (`X-Admin-Token`): `/admin/competitions`
pub fn build_router(state: AppState) -> Router {
    let shopper_routes = Router::new()
        .route("/tickets/:id/reserve", post(tickets::reserve))
        .route("/tickets/:id/release", post(tickets::release))
        .route("/cart", get(cart::view).delete(cart::clear))
        .route("/cart/items", post(cart::add_item))
        .route("/cart/items/:id", delete(cart::remove_item))
        .route("/checkout/settle", post(checkout::settle))
        .route("/entries", get(entries::list));

    let catalog_routes = Router::new()
        .route("/competitions", get(competitions::list))
        .route("/competitions/:id", get(competitions::get))
        .route("/competitions/:id/availability", get(competitions::availability));

    let admin_routes = Router::new()
        .route("/admin/competitions", post(admin::create_competition))
        .route("/admin/competitions/:id/status", post(admin::transition));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .route("/metrics", get(metrics))
        .merge(shopper_routes)
        .merge(catalog_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
