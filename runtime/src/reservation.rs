//! Reservation service: batch holds, early release and availability.
//!
//! # Batch semantics
//!
//! A batch is all-or-nothing. Every requested number is claimed with its own
//! conditional update, in ascending order, and every number is attempted so a
//! failure can report all unavailable numbers at once. When anything fails,
//! the numbers this batch did take are handed back with a holder-scoped
//! release, so a partial batch never stays visible for longer than the
//! compensation takes.

use crate::competitions::load_competition;
use crate::metrics::{self, ReservationOutcome};
use crate::sweeper::ExpirySweeper;
use chrono::Duration;
use moby_comps_core::environment::Clock;
use moby_comps_core::error::ReservationError;
use moby_comps_core::store::Storage;
use moby_comps_core::types::{
    CartItem, CartItemId, Competition, CompetitionId, HolderId, Reservation, TicketNumber,
    TicketSelection, TicketStatus,
};
use serde::Serialize;
use std::sync::Arc;

/// Default hold length.
pub const DEFAULT_HOLD_MINUTES: i64 = 15;

/// What the ticket picker needs to render a competition.
///
/// Never includes who holds a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    /// The competition
    pub competition: Competition,
    /// Numbers currently on hold, ascending
    pub reserved: Vec<u32>,
    /// Numbers sold, ascending
    pub purchased: Vec<u32>,
    /// `max_tickets` minus reserved and purchased
    pub available_count: u32,
}

/// Places and releases holds on ticket numbers.
#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    sweeper: ExpirySweeper,
    hold_duration: Duration,
}

impl ReservationService {
    /// Create the service with the given hold length.
    #[must_use]
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>, hold_duration: Duration) -> Self {
        let sweeper = ExpirySweeper::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            clock,
            sweeper,
            hold_duration,
        }
    }

    /// How long a new hold lasts.
    #[must_use]
    pub const fn hold_duration(&self) -> Duration {
        self.hold_duration
    }

    /// Reserve `numbers` of a competition for `holder`.
    ///
    /// The hold is recorded in the holder's cart item for the competition,
    /// so every hold shows up in the cart and in settlement.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::CompetitionNotFound`] for an unknown competition
    /// - `EmptySelection`, `DuplicateNumbers` or `InvalidRange` for a bad
    ///   selection; no ticket is touched
    /// - [`ReservationError::CompetitionNotLive`] unless the competition is live
    /// - [`ReservationError::AlreadyHeld`] listing every unavailable number;
    ///   nothing stays reserved
    pub async fn reserve(
        &self,
        competition_id: CompetitionId,
        numbers: Vec<u32>,
        holder: HolderId,
    ) -> Result<Reservation, ReservationError> {
        self.reserve_into_cart(competition_id, numbers, holder)
            .await
            .map(|(reservation, _)| reservation)
    }

    /// [`reserve`](Self::reserve), also returning the merged cart item.
    ///
    /// # Errors
    ///
    /// As [`reserve`](Self::reserve); a failed cart write releases the batch
    /// and returns the store error.
    #[tracing::instrument(skip(self, numbers), fields(competition_id = %competition_id, holder = %holder))]
    pub async fn reserve_into_cart(
        &self,
        competition_id: CompetitionId,
        numbers: Vec<u32>,
        holder: HolderId,
    ) -> Result<(Reservation, CartItem), ReservationError> {
        let result = self.reserve_batch(competition_id, numbers, holder).await;
        let outcome = match &result {
            Ok(_) => ReservationOutcome::Reserved,
            Err(ReservationError::AlreadyHeld { .. }) => ReservationOutcome::Conflict,
            Err(ReservationError::Store(_)) => ReservationOutcome::Error,
            Err(_) => ReservationOutcome::Rejected,
        };
        metrics::record_reservation(outcome);
        result
    }

    async fn reserve_batch(
        &self,
        competition_id: CompetitionId,
        numbers: Vec<u32>,
        holder: HolderId,
    ) -> Result<(Reservation, CartItem), ReservationError> {
        let competition = load_competition(self.store.as_ref(), competition_id).await?;
        let selection = TicketSelection::new(numbers, competition.max_tickets)?;
        if !competition.is_live() {
            return Err(ReservationError::CompetitionNotLive {
                id: competition_id.to_string(),
                status: competition.status.to_string(),
            });
        }

        let now = self.clock.now();
        self.sweeper.sweep_competition(competition_id, now).await?;

        let reserved_until = now + self.hold_duration;
        let mut taken = Vec::with_capacity(selection.len());
        let mut unavailable = Vec::new();

        for &number in selection.numbers() {
            match self
                .store
                .try_reserve(competition_id, number, holder, now, reserved_until)
                .await
            {
                Ok(true) => taken.push(number),
                Ok(false) => unavailable.push(number.get()),
                Err(e) => {
                    self.compensate(competition_id, taken, holder).await;
                    return Err(e.into());
                }
            }
        }

        if !unavailable.is_empty() {
            tracing::debug!(?unavailable, "Batch lost to another holder");
            self.compensate(competition_id, taken, holder).await;
            return Err(ReservationError::AlreadyHeld { unavailable });
        }

        let item = CartItem {
            id: CartItemId::new(),
            holder,
            competition_id,
            numbers: taken.clone(),
            expires_at: reserved_until,
            created_at: now,
        };
        let item = match self.store.merge_cart_item(item).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(error = %e, "Cart write failed, releasing new holds");
                self.compensate(competition_id, taken, holder).await;
                return Err(e.into());
            }
        };

        tracing::info!(count = taken.len(), %reserved_until, "Tickets reserved");
        Ok((
            Reservation {
                competition_id,
                numbers: taken,
                expires_at: reserved_until,
            },
            item,
        ))
    }

    /// Hand back the numbers a failed batch took. Errors are logged only.
    async fn compensate(&self, competition_id: CompetitionId, taken: Vec<TicketNumber>, holder: HolderId) {
        if taken.is_empty() {
            return;
        }
        match self.store.release(competition_id, taken, holder).await {
            Ok(released) => tracing::debug!(count = released.len(), "Partial batch released"),
            Err(e) => tracing::error!(error = %e, "Failed to release partial batch; holds will expire"),
        }
    }

    /// Release `numbers` held by `holder`.
    ///
    /// Numbers the holder does not hold are ignored. The holder's cart item
    /// for the competition loses the released numbers and is deleted once
    /// empty. Returns the numbers actually released.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    #[tracing::instrument(skip(self, numbers), fields(competition_id = %competition_id, holder = %holder))]
    pub async fn release(
        &self,
        competition_id: CompetitionId,
        numbers: Vec<u32>,
        holder: HolderId,
    ) -> Result<Vec<TicketNumber>, ReservationError> {
        let numbers: Vec<TicketNumber> = numbers.into_iter().map(TicketNumber::new).collect();
        if numbers.is_empty() {
            return Ok(Vec::new());
        }

        let released = self.store.release(competition_id, numbers, holder).await?;
        metrics::record_released(released.len());
        tracing::info!(count = released.len(), "Tickets released");

        let items = self.store.cart_items(holder).await?;
        if let Some(mut item) = items.into_iter().find(|i| i.competition_id == competition_id) {
            item.numbers.retain(|n| !released.contains(n));
            if item.numbers.is_empty() {
                self.store.delete_cart_item(item.id).await?;
            } else {
                self.store.replace_cart_item(item).await?;
            }
        }

        Ok(released)
    }

    /// Reserved and purchased numbers of a competition, after a lazy sweep.
    ///
    /// # Errors
    ///
    /// [`ReservationError::CompetitionNotFound`] for an unknown competition;
    /// store errors otherwise.
    #[tracing::instrument(skip(self), fields(competition_id = %competition_id))]
    pub async fn availability(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Availability, ReservationError> {
        let competition = load_competition(self.store.as_ref(), competition_id).await?;
        self.sweeper
            .sweep_competition(competition_id, self.clock.now())
            .await?;

        let mut reserved = Vec::new();
        let mut purchased = Vec::new();
        for ticket in self.store.unavailable(competition_id).await? {
            match ticket.status {
                TicketStatus::Reserved { .. } => reserved.push(ticket.number.get()),
                TicketStatus::Purchased { .. } => purchased.push(ticket.number.get()),
                TicketStatus::Available => {}
            }
        }
        reserved.sort_unstable();
        purchased.sort_unstable();

        let taken = u32::try_from(reserved.len() + purchased.len()).unwrap_or(u32::MAX);
        Ok(Availability {
            available_count: competition.max_tickets.saturating_sub(taken),
            competition,
            reserved,
            purchased,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use moby_comps_core::store::{CartStore, CompetitionStore, TicketStore};
    use moby_comps_core::types::CompetitionStatus;
    use moby_comps_testing::{FaultyStore, InMemoryStore, ManualClock, fixtures};

    struct Harness {
        store: InMemoryStore,
        clock: ManualClock,
        service: ReservationService,
    }

    fn harness() -> Harness {
        let store = InMemoryStore::new();
        let clock = ManualClock::new(fixtures::t0());
        let service = ReservationService::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Duration::minutes(DEFAULT_HOLD_MINUTES),
        );
        Harness { store, clock, service }
    }

    async fn status(store: &InMemoryStore, competition: CompetitionId, number: u32) -> TicketStatus {
        store
            .ticket(competition, TicketNumber::new(number))
            .await
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn reserve_then_conflicting_batch_reports_overlap() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let (a, b) = (HolderId::new(), HolderId::new());

        let reservation = h.service.reserve(competition.id, vec![2, 1], a).await.unwrap();
        assert_eq!(reservation.numbers, vec![TicketNumber::new(1), TicketNumber::new(2)]);
        assert_eq!(reservation.expires_at, fixtures::t0() + Duration::minutes(15));

        let conflict = h.service.reserve(competition.id, vec![2, 3], b).await;
        assert_eq!(conflict, Err(ReservationError::AlreadyHeld { unavailable: vec![2] }));
        assert_eq!(status(&h.store, competition.id, 3).await, TicketStatus::Available);
    }

    #[tokio::test]
    async fn failed_batch_leaves_nothing_reserved() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        h.service.reserve(competition.id, vec![4], HolderId::new()).await.unwrap();

        let result = h.service.reserve(competition.id, vec![3, 4, 5], HolderId::new()).await;

        assert_eq!(result, Err(ReservationError::AlreadyHeld { unavailable: vec![4] }));
        assert_eq!(status(&h.store, competition.id, 3).await, TicketStatus::Available);
        assert_eq!(status(&h.store, competition.id, 5).await, TicketStatus::Available);
    }

    #[tokio::test]
    async fn concurrent_reservations_of_same_number_have_one_winner() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;

        let first = h.service.clone();
        let second = h.service.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { first.reserve(competition.id, vec![7], HolderId::new()).await }),
            tokio::spawn(async move { second.reserve(competition.id, vec![7], HolderId::new()).await }),
        );
        let results = [r1.unwrap(), r2.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| *r == Err(ReservationError::AlreadyHeld { unavailable: vec![7] })));
    }

    #[tokio::test]
    async fn validation_runs_before_any_ticket_is_touched() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();

        assert_eq!(
            h.service.reserve(competition.id, vec![], holder).await,
            Err(ReservationError::EmptySelection)
        );
        assert_eq!(
            h.service.reserve(competition.id, vec![1, 1], holder).await,
            Err(ReservationError::DuplicateNumbers { numbers: vec![1] })
        );
        assert_eq!(
            h.service.reserve(competition.id, vec![0, 11], holder).await,
            Err(ReservationError::InvalidRange {
                numbers: vec![0, 11],
                max_tickets: 10
            })
        );
        assert_eq!(h.store.ticket_rows(), 0);
    }

    #[tokio::test]
    async fn only_live_competitions_accept_reservations() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        h.store
            .transition_competition(competition.id, CompetitionStatus::Live, CompetitionStatus::Completed)
            .await
            .unwrap();

        let result = h.service.reserve(competition.id, vec![1], HolderId::new()).await;
        assert!(matches!(result, Err(ReservationError::CompetitionNotLive { .. })));

        let unknown = h.service.reserve(CompetitionId::new(), vec![1], HolderId::new()).await;
        assert!(matches!(unknown, Err(ReservationError::CompetitionNotFound(_))));
    }

    #[tokio::test]
    async fn expired_hold_is_lazily_swept_on_reserve() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        h.service.reserve(competition.id, vec![1], HolderId::new()).await.unwrap();

        h.clock.advance(Duration::minutes(15));
        let taken = h.service.reserve(competition.id, vec![1], HolderId::new()).await;
        assert!(taken.is_ok());
    }

    #[tokio::test]
    async fn reserve_then_release_clears_hold() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();
        h.service.reserve(competition.id, vec![5], holder).await.unwrap();

        let released = h.service.release(competition.id, vec![5], holder).await.unwrap();

        assert_eq!(released, vec![TicketNumber::new(5)]);
        assert_eq!(status(&h.store, competition.id, 5).await, TicketStatus::Available);
    }

    #[tokio::test]
    async fn release_ignores_other_holders_tickets() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let owner = HolderId::new();
        h.service.reserve(competition.id, vec![5], owner).await.unwrap();

        let released = h
            .service
            .release(competition.id, vec![5], HolderId::new())
            .await
            .unwrap();

        assert!(released.is_empty());
        assert!(h
            .store
            .ticket(competition.id, TicketNumber::new(5))
            .await
            .unwrap()
            .is_reserved_by(owner));
    }

    #[tokio::test]
    async fn availability_hides_holders_and_skips_expired() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        h.service.reserve(competition.id, vec![3, 1], HolderId::new()).await.unwrap();

        let view = h.service.availability(competition.id).await.unwrap();
        assert_eq!(view.reserved, vec![1, 3]);
        assert!(view.purchased.is_empty());
        assert_eq!(view.available_count, 8);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("holder").is_none());

        h.clock.advance(Duration::minutes(16));
        let later = h.service.availability(competition.id).await.unwrap();
        assert!(later.reserved.is_empty());
        assert_eq!(later.available_count, 10);
    }

    #[tokio::test]
    async fn every_hold_is_recorded_in_the_cart() {
        let h = harness();
        let competition = fixtures::seed_live(&h.store, 10, 250).await;
        let holder = HolderId::new();
        h.service.reserve(competition.id, vec![3], holder).await.unwrap();
        h.clock.advance(Duration::minutes(1));

        let (_, item) = h
            .service
            .reserve_into_cart(competition.id, vec![1], holder)
            .await
            .unwrap();

        assert_eq!(item.numbers, vec![TicketNumber::new(1), TicketNumber::new(3)]);
        assert_eq!(item.expires_at, fixtures::t0() + Duration::minutes(15));
        assert_eq!(h.store.cart_items(holder).await.unwrap(), vec![item]);
    }

    #[tokio::test]
    async fn failed_cart_write_releases_the_batch() {
        let store = FaultyStore::new(InMemoryStore::new());
        let competition = fixtures::seed_live(store.inner(), 10, 250).await;
        let service = ReservationService::new(
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(fixtures::t0())),
            Duration::minutes(DEFAULT_HOLD_MINUTES),
        );
        store.fail("merge_cart_item", 1);

        let result = service.reserve(competition.id, vec![1, 2], HolderId::new()).await;

        assert!(matches!(result, Err(ReservationError::Store(_))));
        assert_eq!(status(store.inner(), competition.id, 1).await, TicketStatus::Available);
        assert_eq!(status(store.inner(), competition.id, 2).await, TicketStatus::Available);
    }
}
