//! End-to-end scenarios over the wired services and the in-memory store.

#![allow(clippy::unwrap_used)]

use chrono::Duration;
use moby_comps_core::environment::Clock;
use moby_comps_core::error::ReservationError;
use moby_comps_core::store::{CompetitionStore, Storage, TicketStore};
use moby_comps_core::types::{HolderId, Money, PaymentRef, TicketNumber, TicketStatus};
use moby_comps_runtime::{Services, Settings};
use moby_comps_testing::{InMemoryStore, ManualClock, MockPaymentVerifier, fixtures};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

struct World {
    store: InMemoryStore,
    clock: ManualClock,
    payments: MockPaymentVerifier,
    services: Services,
}

fn world() -> World {
    let store = InMemoryStore::new();
    let clock = ManualClock::new(fixtures::t0());
    let payments = MockPaymentVerifier::new();
    let services = Services::new(
        Arc::new(store.clone()) as Arc<dyn Storage>,
        Arc::new(clock.clone()) as Arc<dyn Clock>,
        Arc::new(payments.clone()),
        Settings::default(),
    );
    World {
        store,
        clock,
        payments,
        services,
    }
}

#[tokio::test]
async fn two_shoppers_overlapping_batches() {
    let w = world();
    let competition = fixtures::seed_live(&w.store, 10, 250).await;
    let (a, b) = (HolderId::new(), HolderId::new());

    let held = w.services.reservations.reserve(competition.id, vec![1, 2], a).await.unwrap();
    assert_eq!(held.expires_at, w.clock.now() + Duration::minutes(15));

    let conflict = w.services.reservations.reserve(competition.id, vec![2, 3], b).await;
    assert_eq!(conflict, Err(ReservationError::AlreadyHeld { unavailable: vec![2] }));

    let view = w.services.reservations.availability(competition.id).await.unwrap();
    assert_eq!(view.reserved, vec![1, 2]);
}

#[tokio::test]
async fn full_purchase_flow() {
    let w = world();
    let competition = fixtures::seed_live(&w.store, 100, 199).await;
    let holder = HolderId::new();

    w.services.cart.add_item(holder, competition.id, vec![7, 8, 9]).await.unwrap();
    let cart = w.services.cart.view(holder).await.unwrap();
    assert_eq!(cart.total, Money::from_pence(597));

    w.payments.confirm("pi_flow", holder, cart.total);
    let settlement = w
        .services
        .checkout
        .settle(holder, PaymentRef::parse("pi_flow").unwrap())
        .await
        .unwrap();

    assert_eq!(settlement.purchased_count(), 3);
    let view = w.services.reservations.availability(competition.id).await.unwrap();
    assert_eq!(view.purchased, vec![7, 8, 9]);
    assert!(view.reserved.is_empty());
    let stored = w.store.competition(competition.id).await.unwrap().unwrap();
    assert_eq!(stored.tickets_sold, 3);
}

#[tokio::test]
async fn settlement_races_the_sweeper() {
    let w = world();
    let competition = fixtures::seed_live(&w.store, 10, 250).await;
    let holder = HolderId::new();
    w.services.cart.add_item(holder, competition.id, vec![1]).await.unwrap();
    w.clock.advance(Duration::minutes(10));
    w.services.cart.add_item(holder, competition.id, vec![2]).await.unwrap();
    w.payments.confirm("pi_race", holder, Money::from_pence(500));

    // Ticket 1 lapses and is swept; ticket 2 is still held.
    w.clock.advance(Duration::minutes(6));
    w.services.sweeper.sweep(w.clock.now()).await.unwrap();

    let settlement = w
        .services
        .checkout
        .settle(holder, PaymentRef::parse("pi_race").unwrap())
        .await
        .unwrap();

    assert_eq!(settlement.purchased[0].numbers, vec![TicketNumber::new(2)]);
    assert_eq!(settlement.failed[0].numbers, vec![TicketNumber::new(1)]);
    assert!(settlement.is_partial());
}

#[tokio::test]
async fn many_concurrent_shoppers_never_double_sell() {
    let w = world();
    let competition = fixtures::seed_live(&w.store, 5, 100).await;

    let attempts = (0..20u32).map(|i| {
        let reservations = w.services.reservations.clone();
        let id = competition.id;
        tokio::spawn(async move {
            reservations
                .reserve(id, vec![i % 5 + 1, (i + 1) % 5 + 1], HolderId::new())
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let mut claimed = BTreeSet::new();
    for reservation in results.into_iter().map(|r| r.unwrap()).filter_map(Result::ok) {
        for number in reservation.numbers {
            assert!(claimed.insert(number), "ticket {number:?} sold twice");
        }
    }
    let reserved = w.store.unavailable(competition.id).await.unwrap();
    assert_eq!(reserved.len(), claimed.len());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn batch_is_all_or_nothing(
        rival in proptest::collection::btree_set(1u32..=20, 0..6),
        request in proptest::collection::btree_set(1u32..=20, 1..6),
    ) {
        tokio_test::block_on(async {
            let w = world();
            let competition = fixtures::seed_live(&w.store, 20, 100).await;
            if !rival.is_empty() {
                w.services
                    .reservations
                    .reserve(competition.id, rival.iter().copied().collect(), HolderId::new())
                    .await
                    .unwrap();
            }

            let holder = HolderId::new();
            let result = w
                .services
                .reservations
                .reserve(competition.id, request.iter().copied().collect(), holder)
                .await;
            let overlap: Vec<u32> = request.intersection(&rival).copied().collect();

            if overlap.is_empty() {
                prop_assert!(result.is_ok());
            } else {
                prop_assert_eq!(result, Err(ReservationError::AlreadyHeld { unavailable: overlap }));
                for number in request.difference(&rival) {
                    let ticket = w.store.ticket(competition.id, TicketNumber::new(*number)).await.unwrap();
                    prop_assert_eq!(ticket.status, TicketStatus::Available);
                }
            }
            Ok(())
        })?;
    }
}
