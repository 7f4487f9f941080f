//! Checkout: settling a confirmed payment into purchased tickets.
//!
//! # Idempotence
//!
//! Settlement is keyed by the payment reference. The first request claims the
//! reference with an insert-if-absent; a retry of a completed settlement gets
//! the stored outcome back, so entries and `tickets_sold` are only ever
//! written once per payment.
//!
//! # Partial settlement
//!
//! Holds are re-read from the ticket store and each one is converted with its
//! own conditional update. Holds that lapsed before the payment landed end up
//! in `failed` next to the ones that made it; the caller reports both.
//!
//! # Recovery
//!
//! Any failure after the claim drops it again, so the reference can be
//! settled later. Every step is safe to repeat: tickets already bought with
//! the reference are picked up again, and an entry (with its `tickets_sold`
//! increment) is recorded at most once per reference and competition.

use crate::metrics;
use crate::retry::retry_read;
use crate::sweeper::ExpirySweeper;
use moby_comps_core::environment::Clock;
use moby_comps_core::error::ReservationError;
use moby_comps_core::payment::{PaymentStatus, PaymentVerifier};
use moby_comps_core::store::Storage;
use moby_comps_core::types::{
    CompetitionId, Entry, EntryId, EntryStatus, HolderId, PaymentRef, Settlement,
    SettlementClaim, TicketNumber, Timestamp,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Converts held tickets into entries once a payment is confirmed.
#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn PaymentVerifier>,
    sweeper: ExpirySweeper,
}

impl CheckoutService {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn PaymentVerifier>,
    ) -> Self {
        let sweeper = ExpirySweeper::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            clock,
            verifier,
            sweeper,
        }
    }

    /// Settle `payment_ref` for `holder`.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::NotHolder`] when the reference was claimed by
    ///   another session
    /// - [`ReservationError::DuplicateSettlement`] while the first settlement
    ///   of the reference is still running
    /// - [`ReservationError::PaymentNotConfirmed`] unless the processor confirms
    ///   the payment for this holder; the reference can be settled again later
    /// - store errors; the claim is released so a retry resumes the settlement
    #[tracing::instrument(skip(self), fields(holder = %holder, payment_ref = %payment_ref))]
    pub async fn settle(
        &self,
        holder: HolderId,
        payment_ref: PaymentRef,
    ) -> Result<Settlement, ReservationError> {
        let now = self.clock.now();

        match self
            .store
            .claim_settlement(payment_ref.clone(), holder, now)
            .await?
        {
            SettlementClaim::Claimed => {}
            SettlementClaim::InFlight { holder: owner } => {
                metrics::record_settlement("in_flight");
                return Err(if owner == holder {
                    ReservationError::DuplicateSettlement(payment_ref.to_string())
                } else {
                    ReservationError::NotHolder
                });
            }
            SettlementClaim::Completed {
                holder: owner,
                settlement,
            } => {
                if owner != holder {
                    return Err(ReservationError::NotHolder);
                }
                tracing::info!("Settlement already completed, replaying outcome");
                metrics::record_settlement("replayed");
                return Ok(settlement);
            }
        }

        match self.settle_claimed(holder, &payment_ref, now).await {
            Ok(settlement) => Ok(settlement),
            Err(e) => {
                if !matches!(e, ReservationError::PaymentNotConfirmed(_)) {
                    metrics::record_settlement("error");
                    tracing::warn!(error = %e, "Settlement failed, releasing claim");
                }
                if let Err(release) = self.store.abandon_settlement(payment_ref).await {
                    tracing::error!(error = %release, "Failed to release settlement claim");
                }
                Err(e)
            }
        }
    }

    async fn settle_claimed(
        &self,
        holder: HolderId,
        payment_ref: &PaymentRef,
        now: Timestamp,
    ) -> Result<Settlement, ReservationError> {
        if let Err(e) = self.verify_payment(payment_ref, holder).await {
            metrics::record_settlement("unconfirmed");
            return Err(e);
        }

        let settlement = self.convert_holds(holder, payment_ref, now).await?;

        for group in &settlement.purchased {
            let recorded = self
                .store
                .insert_entry(Entry {
                    id: EntryId::new(),
                    holder,
                    competition_id: group.competition_id,
                    numbers: group.numbers.clone(),
                    payment_ref: payment_ref.clone(),
                    status: EntryStatus::Active,
                    created_at: now,
                })
                .await?;
            if !recorded {
                tracing::debug!(competition_id = %group.competition_id, "Entry already recorded");
            }
        }

        self.store.clear_cart(holder).await?;
        self.store
            .complete_settlement(payment_ref.clone(), settlement.clone())
            .await?;

        let (purchased, failed) = (settlement.purchased_count(), settlement.failed_count());
        metrics::record_settled_tickets(purchased, failed);
        if failed > 0 {
            metrics::record_settlement("partial");
            tracing::warn!(purchased, failed, "Settlement completed with lapsed tickets");
        } else {
            metrics::record_settlement("completed");
            tracing::info!(purchased, "Settlement completed");
        }
        Ok(settlement)
    }

    async fn verify_payment(
        &self,
        payment_ref: &PaymentRef,
        holder: HolderId,
    ) -> Result<(), ReservationError> {
        let not_confirmed = || ReservationError::PaymentNotConfirmed(payment_ref.to_string());
        match self.verifier.verify(payment_ref, holder).await {
            Ok(PaymentStatus::Confirmed { amount }) => {
                tracing::debug!(%amount, "Payment confirmed");
                Ok(())
            }
            Ok(PaymentStatus::Pending) => {
                tracing::info!("Payment still pending");
                Err(not_confirmed())
            }
            Ok(PaymentStatus::Failed { reason }) => {
                tracing::info!(%reason, "Payment declined");
                Err(not_confirmed())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Payment verification failed");
                Err(not_confirmed())
            }
        }
    }

    /// Purchase every live hold of `holder` and classify the rest as failed.
    async fn convert_holds(
        &self,
        holder: HolderId,
        payment_ref: &PaymentRef,
        now: Timestamp,
    ) -> Result<Settlement, ReservationError> {
        let mut held = retry_read(|| self.store.held_by(holder)).await?;
        held.sort_by_key(|t| (t.competition_id, t.number));
        let cart = retry_read(|| self.store.cart_items(holder)).await?;
        // Bought by an earlier attempt with this reference that did not finish.
        let bought = retry_read(|| self.store.purchased_with(holder, payment_ref.clone())).await?;

        let known: HashSet<(CompetitionId, TicketNumber)> = held
            .iter()
            .chain(bought.iter())
            .map(|t| (t.competition_id, t.number))
            .collect();
        let mut purchased: Vec<(CompetitionId, TicketNumber)> =
            bought.iter().map(|t| (t.competition_id, t.number)).collect();
        let mut failed = Vec::new();

        for ticket in held {
            let key = (ticket.competition_id, ticket.number);
            if self
                .store
                .purchase(ticket.competition_id, ticket.number, holder, payment_ref.clone(), now)
                .await?
            {
                purchased.push(key);
            } else {
                failed.push(key);
            }
        }

        // Cart numbers that are no longer held lapsed before settlement.
        for item in &cart {
            for number in &item.numbers {
                let key = (item.competition_id, *number);
                if !known.contains(&key) {
                    failed.push(key);
                }
            }
        }

        let lapsed: BTreeSet<CompetitionId> = failed.iter().map(|(id, _)| *id).collect();
        for competition_id in lapsed {
            self.sweeper.sweep_competition(competition_id, now).await?;
        }

        Ok(Settlement::from_tickets(purchased, failed))
    }

    /// Entries of `holder`, newest first.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    #[tracing::instrument(skip(self), fields(holder = %holder))]
    pub async fn entries(&self, holder: HolderId) -> Result<Vec<Entry>, ReservationError> {
        Ok(retry_read(|| self.store.entries(holder)).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cart::CartService;
    use crate::reservation::ReservationService;
    use chrono::Duration;
    use moby_comps_core::store::{CompetitionStore, SettlementStore, TicketStore};
    use moby_comps_core::types::{Money, TicketStatus};
    use moby_comps_testing::{
        FaultyStore, InMemoryStore, ManualClock, MockPaymentVerifier, fixtures,
    };

    struct Harness {
        store: InMemoryStore,
        clock: ManualClock,
        payments: MockPaymentVerifier,
        reservations: ReservationService,
        cart: CartService,
        checkout: CheckoutService,
    }

    fn harness() -> Harness {
        let store = InMemoryStore::new();
        let clock = ManualClock::new(fixtures::t0());
        let payments = MockPaymentVerifier::new();
        let shared: Arc<dyn Storage> = Arc::new(store.clone());
        let time: Arc<dyn Clock> = Arc::new(clock.clone());
        let reservations =
            ReservationService::new(Arc::clone(&shared), Arc::clone(&time), Duration::minutes(15));
        let cart = CartService::new(Arc::clone(&shared), Arc::clone(&time), reservations.clone());
        let checkout = CheckoutService::new(shared, time, Arc::new(payments.clone()));
        Harness {
            store,
            clock,
            payments,
            reservations,
            cart,
            checkout,
        }
    }

    fn pi(value: &str) -> PaymentRef {
        PaymentRef::parse(value).unwrap()
    }

    #[tokio::test]
    async fn settle_purchases_holds_and_creates_entries() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();
        h.cart.add_item(holder, competition.id, vec![1, 2]).await.unwrap();
        h.payments.confirm("pi_1", holder, Money::from_pence(500));

        let settlement = h.checkout.settle(holder, pi("pi_1")).await.unwrap();

        assert_eq!(settlement.purchased_count(), 2);
        assert!(settlement.failed.is_empty());
        let entries = h.checkout.entries(holder).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].numbers, vec![TicketNumber::new(1), TicketNumber::new(2)]);
        assert!(matches!(
            h.store.ticket(competition.id, TicketNumber::new(1)).await.unwrap().status,
            TicketStatus::Purchased { .. }
        ));
        assert_eq!(h.cart.view(holder).await.unwrap().items.len(), 0);
    }

    #[tokio::test]
    async fn expired_hold_is_reported_failed_and_freed() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();
        h.reservations.reserve(competition.id, vec![1], holder).await.unwrap();
        h.payments.confirm("pi_late", holder, Money::from_pence(250));

        h.clock.advance(Duration::minutes(16));
        let settlement = h.checkout.settle(holder, pi("pi_late")).await.unwrap();

        assert!(settlement.purchased.is_empty());
        assert_eq!(settlement.failed.len(), 1);
        assert_eq!(settlement.failed[0].competition_id, competition.id);
        assert_eq!(settlement.failed[0].numbers, vec![TicketNumber::new(1)]);
        assert_eq!(
            h.store.ticket(competition.id, TicketNumber::new(1)).await.unwrap().status,
            TicketStatus::Available
        );
    }

    #[tokio::test]
    async fn swept_cart_numbers_are_reported_failed() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();
        h.cart.add_item(holder, competition.id, vec![3]).await.unwrap();
        h.clock.advance(Duration::minutes(20));
        h.store.sweep_expired(None, h.clock.now()).await.unwrap();
        h.payments.confirm("pi_2", holder, Money::from_pence(250));

        let settlement = h.checkout.settle(holder, pi("pi_2")).await.unwrap();

        assert_eq!(settlement.failed[0].numbers, vec![TicketNumber::new(3)]);
    }

    #[tokio::test]
    async fn settling_twice_replays_the_outcome() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();
        h.cart.add_item(holder, competition.id, vec![4, 5]).await.unwrap();
        h.payments.confirm("pi_twice", holder, Money::from_pence(500));

        let first = h.checkout.settle(holder, pi("pi_twice")).await.unwrap();
        let second = h.checkout.settle(holder, pi("pi_twice")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.checkout.entries(holder).await.unwrap().len(), 1);
        let stored = h.store.competition(competition.id).await.unwrap().unwrap();
        assert_eq!(stored.tickets_sold, 2);
    }

    #[tokio::test]
    async fn unconfirmed_payment_can_be_retried() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();
        h.cart.add_item(holder, competition.id, vec![1]).await.unwrap();

        let pending = h.checkout.settle(holder, pi("pi_wait")).await;
        assert_eq!(pending, Err(ReservationError::PaymentNotConfirmed("pi_wait".into())));
        assert_eq!(h.store.settlement_count(), 0);

        h.payments.confirm("pi_wait", holder, Money::from_pence(250));
        let settled = h.checkout.settle(holder, pi("pi_wait")).await.unwrap();
        assert_eq!(settled.purchased_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_processor_is_not_confirmed() {
        let h = harness();
        let holder = HolderId::new();
        h.payments.set_unreachable(true);

        let result = h.checkout.settle(holder, pi("pi_down")).await;
        assert!(matches!(result, Err(ReservationError::PaymentNotConfirmed(_))));
    }

    #[tokio::test]
    async fn another_holders_reference_is_rejected() {
        let h = harness();
        let owner = HolderId::new();
        h.payments.confirm("pi_mine", owner, Money::ZERO);
        h.checkout.settle(owner, pi("pi_mine")).await.unwrap();

        let result = h.checkout.settle(HolderId::new(), pi("pi_mine")).await;
        assert_eq!(result, Err(ReservationError::NotHolder));
    }

    #[tokio::test]
    async fn in_flight_reference_is_a_duplicate() {
        let h = harness();
        let holder = HolderId::new();
        h.store
            .claim_settlement(pi("pi_busy"), holder, fixtures::t0())
            .await
            .unwrap();

        let result = h.checkout.settle(holder, pi("pi_busy")).await;
        assert_eq!(result, Err(ReservationError::DuplicateSettlement("pi_busy".into())));
    }

    #[tokio::test]
    async fn empty_cart_settles_to_empty_outcome() {
        let h = harness();
        let holder = HolderId::new();
        h.payments.confirm("pi_empty", holder, Money::ZERO);

        let settlement = h.checkout.settle(holder, pi("pi_empty")).await.unwrap();
        assert_eq!(settlement, Settlement::default());
        assert_eq!(h.store.settlement_count(), 1);
    }

    #[tokio::test]
    async fn hold_swept_before_settlement_is_reported_failed() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();
        h.reservations.reserve(competition.id, vec![1], holder).await.unwrap();
        h.payments.confirm("pi_swept", holder, Money::from_pence(250));

        h.clock.advance(Duration::minutes(16));
        let sweeper = ExpirySweeper::new(Arc::new(h.store.clone()), Arc::new(h.clock.clone()));
        assert_eq!(sweeper.sweep(h.clock.now()).await.unwrap(), 1);

        let settlement = h.checkout.settle(holder, pi("pi_swept")).await.unwrap();

        assert!(settlement.purchased.is_empty());
        assert_eq!(settlement.failed.len(), 1);
        assert_eq!(settlement.failed[0].competition_id, competition.id);
        assert_eq!(settlement.failed[0].numbers, vec![TicketNumber::new(1)]);
    }

    #[tokio::test]
    async fn cart_total_matches_what_settlement_buys() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();
        h.reservations.reserve(competition.id, vec![1, 2], holder).await.unwrap();

        let view = h.cart.view(holder).await.unwrap();
        assert_eq!(view.total, Money::from_pence(500));

        h.payments.confirm("pi_total", holder, view.total);
        let settlement = h.checkout.settle(holder, pi("pi_total")).await.unwrap();
        let bought = competition
            .ticket_price
            .saturating_mul(settlement.purchased_count() as u64);
        assert_eq!(bought, view.total);
    }

    struct FaultyHarness {
        store: FaultyStore,
        payments: MockPaymentVerifier,
        reservations: ReservationService,
        checkout: CheckoutService,
    }

    fn faulty_harness() -> FaultyHarness {
        let store = FaultyStore::new(InMemoryStore::new());
        let payments = MockPaymentVerifier::new();
        let shared: Arc<dyn Storage> = Arc::new(store.clone());
        let time: Arc<dyn Clock> = Arc::new(ManualClock::new(fixtures::t0()));
        let reservations =
            ReservationService::new(Arc::clone(&shared), Arc::clone(&time), Duration::minutes(15));
        let checkout = CheckoutService::new(shared, time, Arc::new(payments.clone()));
        FaultyHarness {
            store,
            payments,
            reservations,
            checkout,
        }
    }

    #[tokio::test]
    async fn failed_read_releases_the_claim() {
        let h = faulty_harness();
        let competition = fixtures::seed_live(h.store.inner(), 10, 250).await;
        let holder = HolderId::new();
        h.reservations.reserve(competition.id, vec![1], holder).await.unwrap();
        h.payments.confirm("pi_flaky", holder, Money::from_pence(250));
        // Reads get one retry, so both attempts must fail.
        h.store.fail("held_by", 2);

        let first = h.checkout.settle(holder, pi("pi_flaky")).await;
        assert!(matches!(first, Err(ReservationError::Store(_))));
        assert_eq!(h.store.inner().settlement_count(), 0);

        let retried = h.checkout.settle(holder, pi("pi_flaky")).await.unwrap();
        assert_eq!(retried.purchased_count(), 1);
    }

    #[tokio::test]
    async fn interrupted_settlement_resumes_without_double_counting() {
        let h = faulty_harness();
        let competition = fixtures::seed_live(h.store.inner(), 10, 250).await;
        let holder = HolderId::new();
        h.reservations.reserve(competition.id, vec![1, 2], holder).await.unwrap();
        h.payments.confirm("pi_resume", holder, Money::from_pence(500));
        h.store.fail("complete_settlement", 1);

        let first = h.checkout.settle(holder, pi("pi_resume")).await;
        assert!(matches!(first, Err(ReservationError::Store(_))));
        assert!(matches!(
            h.store.inner().ticket(competition.id, TicketNumber::new(1)).await.unwrap().status,
            TicketStatus::Purchased { .. }
        ));

        let resumed = h.checkout.settle(holder, pi("pi_resume")).await.unwrap();
        assert_eq!(resumed.purchased_count(), 2);
        assert!(resumed.failed.is_empty());
        assert_eq!(h.checkout.entries(holder).await.unwrap().len(), 1);
        let stored = h.store.inner().competition(competition.id).await.unwrap().unwrap();
        assert_eq!(stored.tickets_sold, 2);

        let replay = h.checkout.settle(holder, pi("pi_resume")).await.unwrap();
        assert_eq!(replay, resumed);
    }
}
