//! # Moby Comps Runtime
//!
//! The services of the ticket reservation core, wired over injected storage,
//! clock and payment verification.
//!
//! ## Core Components
//!
//! - **[`ReservationService`]**: all-or-nothing batch holds, early release,
//!   availability
//! - **[`ExpirySweeper`]**: returns lapsed holds to available, lazily and on a
//!   background interval
//! - **[`CartService`]**: the session's cart, re-derived from live holds
//! - **[`CheckoutService`]**: idempotent settlement of a confirmed payment
//! - **[`CompetitionService`]**: catalog and lifecycle
//!
//! Every service is stateless apart from its injected handles, so any number
//! of instances can share one store.
//!
//! ## Example
//!
//! ```ignore
//! use moby_comps_runtime::{Services, Settings};
//!
//! let services = Services::new(store, clock, verifier, Settings::default());
//! let reservation = services.reservations.reserve(competition_id, vec![1, 2], holder).await?;
//! ```

use moby_comps_core::environment::Clock;
use moby_comps_core::payment::PaymentVerifier;
use moby_comps_core::store::Storage;
use std::sync::Arc;

pub mod cart;
pub mod checkout;
pub mod competitions;
pub mod metrics;
pub mod reservation;
pub mod retry;
pub mod sweeper;

pub use cart::{CartLine, CartService, CartView};
pub use checkout::CheckoutService;
pub use competitions::{CompetitionService, NewCompetition};
pub use reservation::{Availability, ReservationService};
pub use sweeper::ExpirySweeper;

/// Tunables shared by the services.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// How long a new hold lasts
    pub hold_duration: chrono::Duration,
    /// Period of the background sweep
    pub sweep_interval: std::time::Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hold_duration: chrono::Duration::minutes(reservation::DEFAULT_HOLD_MINUTES),
            sweep_interval: std::time::Duration::from_secs(30),
        }
    }
}

/// Every service, built over the same store, clock and verifier.
#[derive(Clone)]
pub struct Services {
    /// Batch holds and availability
    pub reservations: ReservationService,
    /// Cart aggregation
    pub cart: CartService,
    /// Settlement and entries
    pub checkout: CheckoutService,
    /// Catalog and lifecycle
    pub competitions: CompetitionService,
    /// Expiry sweeper
    pub sweeper: ExpirySweeper,
    /// Settings the services were built with
    pub settings: Settings,
}

impl Services {
    /// Wire every service.
    #[must_use]
    pub fn new(
        store: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn PaymentVerifier>,
        settings: Settings,
    ) -> Self {
        let reservations =
            ReservationService::new(Arc::clone(&store), Arc::clone(&clock), settings.hold_duration);
        Self {
            cart: CartService::new(Arc::clone(&store), Arc::clone(&clock), reservations.clone()),
            checkout: CheckoutService::new(Arc::clone(&store), Arc::clone(&clock), verifier),
            competitions: CompetitionService::new(Arc::clone(&store), Arc::clone(&clock)),
            sweeper: ExpirySweeper::new(store, clock),
            reservations,
            settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_hold_for_fifteen_minutes() {
        let settings = Settings::default();
        assert_eq!(settings.hold_duration, chrono::Duration::minutes(15));
        assert_eq!(settings.sweep_interval, std::time::Duration::from_secs(30));
    }
}
