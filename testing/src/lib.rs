//! # Moby Comps Testing
//!
//! Testing utilities for the Moby Comps reservation core.
//!
//! This crate provides:
//! - [`InMemoryStore`]: a `Storage` implementation with the same conditional
//!   update semantics as the Postgres store
//! - [`FaultyStore`]: an `InMemoryStore` that fails on demand
//! - [`FixedClock`] and [`ManualClock`]: deterministic time
//! - [`MockPaymentVerifier`]: scripted payment confirmations
//! - [`fixtures`]: ready-made competitions
//!
//! ## Example
//!
//! ```ignore
//! use moby_comps_testing::{fixtures, InMemoryStore, ManualClock};
//!
//! #[tokio::test]
//! async fn test_hold_expires() {
//!     let clock = ManualClock::new(fixtures::t0());
//!     let store = InMemoryStore::new();
//!     let competition = fixtures::seed_live(&store, 10, 250).await;
//!     // ... reserve, then clock.advance(Duration::minutes(16)) ...
//! }
//! ```

mod faults;
mod memory_store;

pub use faults::FaultyStore;
pub use memory_store::InMemoryStore;

use chrono::{DateTime, Duration, Utc};
use moby_comps_core::environment::Clock;
use std::sync::{Arc, Mutex};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Arc, Clock, DateTime, Duration, Mutex, Utc};
    use moby_comps_core::payment::{
        PaymentStatus, PaymentVerifier, PaymentVerifierError, VerifyFuture,
    };
    use moby_comps_core::types::{HolderId, Money, PaymentRef};
    use std::collections::HashMap;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give the
    /// other to the services.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move time forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Payment verifier answering from a scripted table.
    ///
    /// Unknown references report [`PaymentStatus::Pending`]. A confirmation is
    /// only reported to the holder it was scripted for.
    #[derive(Debug, Clone, Default)]
    pub struct MockPaymentVerifier {
        payments: Arc<Mutex<HashMap<String, (HolderId, PaymentStatus)>>>,
        unreachable: Arc<Mutex<bool>>,
    }

    impl MockPaymentVerifier {
        /// Empty verifier.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Script `payment_ref` as confirmed for `holder`.
        pub fn confirm(&self, payment_ref: &str, holder: HolderId, amount: Money) {
            self.script(payment_ref, holder, PaymentStatus::Confirmed { amount });
        }

        /// Script `payment_ref` as declined for `holder`.
        pub fn decline(&self, payment_ref: &str, holder: HolderId, reason: &str) {
            self.script(
                payment_ref,
                holder,
                PaymentStatus::Failed {
                    reason: reason.to_string(),
                },
            );
        }

        /// Make every verification fail with a timeout.
        pub fn set_unreachable(&self, unreachable: bool) {
            *self
                .unreachable
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = unreachable;
        }

        fn script(&self, payment_ref: &str, holder: HolderId, status: PaymentStatus) {
            self.payments
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(payment_ref.to_string(), (holder, status));
        }
    }

    impl PaymentVerifier for MockPaymentVerifier {
        fn verify<'a>(&'a self, payment_ref: &'a PaymentRef, holder: HolderId) -> VerifyFuture<'a> {
            let unreachable = *self
                .unreachable
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let scripted = self
                .payments
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(payment_ref.as_str())
                .cloned();
            Box::pin(async move {
                if unreachable {
                    return Err(PaymentVerifierError::Timeout);
                }
                Ok(match scripted {
                    Some((owner, status)) if owner == holder => status,
                    Some(_) => PaymentStatus::Failed {
                        reason: "paid by another customer".to_string(),
                    },
                    None => PaymentStatus::Pending,
                })
            })
        }
    }
}

/// Ready-made competitions and timestamps.
pub mod fixtures {
    use super::{DateTime, Duration, Utc};
    use crate::InMemoryStore;
    use moby_comps_core::store::CompetitionStore;
    use moby_comps_core::types::{Competition, CompetitionStatus, Money};

    /// 2025-01-01 00:00:00 UTC, the start of every test timeline.
    #[must_use]
    pub fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// A live competition with `max_tickets` numbers at `price_pence` each.
    #[must_use]
    pub fn live_competition(max_tickets: u32, price_pence: u64) -> Competition {
        let mut competition = Competition::draft(
            "Win a Porsche 911",
            max_tickets,
            Money::from_pence(price_pence),
            t0() + Duration::days(30),
            t0(),
        );
        competition.status = CompetitionStatus::Live;
        competition
    }

    /// Insert a live competition into `store` and return it.
    pub async fn seed_live(store: &InMemoryStore, max_tickets: u32, price_pence: u64) -> Competition {
        let competition = live_competition(max_tickets, price_pence);
        // In-memory inserts are infallible.
        let _ = store.insert_competition(competition.clone()).await;
        competition
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, MockPaymentVerifier};
