//! # Moby Comps Core
//!
//! Domain types, storage contracts and the error taxonomy for the ticket
//! reservation core of the Moby Comps storefront.
//!
//! ## Core Concepts
//!
//! - **Ticket**: one number of one competition; `available`, `reserved` (a hold
//!   with a deadline) or `purchased`
//! - **Hold**: a time-bounded claim on a ticket number, expressed purely as data
//!   (`reserved_until`), never as an in-process timer
//! - **Cart**: a per-session view over the session's holds, re-derived from ticket
//!   state on every read
//! - **Settlement**: converting held tickets into purchased tickets once an
//!   external payment is confirmed, keyed by the payment reference
//!
//! ## Architecture Principles
//!
//! - The ticket store is the single source of truth
//! - Mutual exclusion is a conditional (compare-and-set) update in storage,
//!   never an application mutex held across I/O
//! - Dependencies (clock, storage, payment verification) are injected via traits
//!
//! ## Example
//!
//! ```
//! use moby_comps_core::types::{TicketSelection, TicketNumber};
//!
//! let selection = TicketSelection::new(vec![3, 1, 2], 10).unwrap();
//! assert_eq!(
//!     selection.numbers(),
//!     &[TicketNumber::new(1), TicketNumber::new(2), TicketNumber::new(3)]
//! );
//! ```

pub mod error;
pub mod payment;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{ReservationError, StoreError};
pub use store::{CartStore, CompetitionStore, SettlementStore, Storage, StoreFuture, TicketStore};

/// Environment module - injected dependencies that are not storage.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Every expiry decision in the reservation core reads time through this
    /// trait, so tests can move time forward past a hold deadline.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
