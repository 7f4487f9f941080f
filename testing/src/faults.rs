//! Fault injection around [`InMemoryStore`].

#![allow(clippy::missing_panics_doc)] // Poisoned locks are recovered, never unwrapped

use crate::InMemoryStore;
use moby_comps_core::error::StoreError;
use moby_comps_core::store::{
    CartStore, CompetitionStore, SettlementStore, StoreFuture, TicketStore,
};
use moby_comps_core::types::{
    CartItem, CartItemId, Competition, CompetitionId, CompetitionStatus, Entry, HolderId,
    PaymentRef, Settlement, SettlementClaim, Ticket, TicketNumber, Timestamp,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// An [`InMemoryStore`] whose methods can be told to fail.
///
/// Faults are armed per method name (`"held_by"`, `"insert_entry"`, ...) with
/// a count; each call to an armed method consumes one fault and returns
/// [`StoreError::Database`] without touching the tables.
///
/// # Example
///
/// ```
/// use moby_comps_testing::{FaultyStore, InMemoryStore};
///
/// let store = FaultyStore::new(InMemoryStore::new());
/// store.fail("held_by", 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    faults: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl FaultyStore {
    /// Wrap a store. No faults are armed.
    #[must_use]
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    /// The wrapped store, for arranging and asserting state directly.
    #[must_use]
    pub const fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Make the next `times` calls to `method` fail.
    pub fn fail(&self, method: &'static str, times: usize) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method, times);
    }

    fn tripped(&self, method: &'static str) -> bool {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        match faults.get_mut(method) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    fn guard<'a, T: Send + 'a>(
        &self,
        method: &'static str,
        call: impl FnOnce() -> StoreFuture<'a, T>,
    ) -> StoreFuture<'a, T> {
        if self.tripped(method) {
            return Box::pin(std::future::ready(Err(StoreError::Database(format!(
                "injected fault in {method}"
            )))));
        }
        call()
    }
}

impl CompetitionStore for FaultyStore {
    fn insert_competition(&self, competition: Competition) -> StoreFuture<'_, ()> {
        self.guard("insert_competition", || self.inner.insert_competition(competition))
    }

    fn competition(&self, id: CompetitionId) -> StoreFuture<'_, Option<Competition>> {
        self.guard("competition", || self.inner.competition(id))
    }

    fn list_competitions(
        &self,
        status: Option<CompetitionStatus>,
    ) -> StoreFuture<'_, Vec<Competition>> {
        self.guard("list_competitions", || self.inner.list_competitions(status))
    }

    fn transition_competition(
        &self,
        id: CompetitionId,
        from: CompetitionStatus,
        to: CompetitionStatus,
    ) -> StoreFuture<'_, bool> {
        self.guard("transition_competition", || {
            self.inner.transition_competition(id, from, to)
        })
    }
}

impl TicketStore for FaultyStore {
    fn try_reserve(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: HolderId,
        reserved_at: Timestamp,
        reserved_until: Timestamp,
    ) -> StoreFuture<'_, bool> {
        self.guard("try_reserve", || {
            self.inner
                .try_reserve(competition_id, number, holder, reserved_at, reserved_until)
        })
    }

    fn release(
        &self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
        holder: HolderId,
    ) -> StoreFuture<'_, Vec<TicketNumber>> {
        self.guard("release", || self.inner.release(competition_id, numbers, holder))
    }

    fn release_all(&self, holder: HolderId) -> StoreFuture<'_, u64> {
        self.guard("release_all", || self.inner.release_all(holder))
    }

    fn purchase(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: HolderId,
        payment_ref: PaymentRef,
        now: Timestamp,
    ) -> StoreFuture<'_, bool> {
        self.guard("purchase", || {
            self.inner
                .purchase(competition_id, number, holder, payment_ref, now)
        })
    }

    fn sweep_expired(
        &self,
        competition_id: Option<CompetitionId>,
        now: Timestamp,
    ) -> StoreFuture<'_, u64> {
        self.guard("sweep_expired", || self.inner.sweep_expired(competition_id, now))
    }

    fn held_by(&self, holder: HolderId) -> StoreFuture<'_, Vec<Ticket>> {
        self.guard("held_by", || self.inner.held_by(holder))
    }

    fn purchased_with(
        &self,
        holder: HolderId,
        payment_ref: PaymentRef,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        self.guard("purchased_with", || self.inner.purchased_with(holder, payment_ref))
    }

    fn unavailable(&self, competition_id: CompetitionId) -> StoreFuture<'_, Vec<Ticket>> {
        self.guard("unavailable", || self.inner.unavailable(competition_id))
    }

    fn ticket(&self, competition_id: CompetitionId, number: TicketNumber) -> StoreFuture<'_, Ticket> {
        self.guard("ticket", || self.inner.ticket(competition_id, number))
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        self.guard("ping", || self.inner.ping())
    }
}

impl CartStore for FaultyStore {
    fn merge_cart_item(&self, item: CartItem) -> StoreFuture<'_, CartItem> {
        self.guard("merge_cart_item", || self.inner.merge_cart_item(item))
    }

    fn replace_cart_item(&self, item: CartItem) -> StoreFuture<'_, ()> {
        self.guard("replace_cart_item", || self.inner.replace_cart_item(item))
    }

    fn cart_item(&self, id: CartItemId) -> StoreFuture<'_, Option<CartItem>> {
        self.guard("cart_item", || self.inner.cart_item(id))
    }

    fn cart_items(&self, holder: HolderId) -> StoreFuture<'_, Vec<CartItem>> {
        self.guard("cart_items", || self.inner.cart_items(holder))
    }

    fn delete_cart_item(&self, id: CartItemId) -> StoreFuture<'_, bool> {
        self.guard("delete_cart_item", || self.inner.delete_cart_item(id))
    }

    fn clear_cart(&self, holder: HolderId) -> StoreFuture<'_, u64> {
        self.guard("clear_cart", || self.inner.clear_cart(holder))
    }
}

impl SettlementStore for FaultyStore {
    fn claim_settlement(
        &self,
        payment_ref: PaymentRef,
        holder: HolderId,
        now: Timestamp,
    ) -> StoreFuture<'_, SettlementClaim> {
        self.guard("claim_settlement", || {
            self.inner.claim_settlement(payment_ref, holder, now)
        })
    }

    fn complete_settlement(
        &self,
        payment_ref: PaymentRef,
        settlement: Settlement,
    ) -> StoreFuture<'_, ()> {
        self.guard("complete_settlement", || {
            self.inner.complete_settlement(payment_ref, settlement)
        })
    }

    fn abandon_settlement(&self, payment_ref: PaymentRef) -> StoreFuture<'_, ()> {
        self.guard("abandon_settlement", || self.inner.abandon_settlement(payment_ref))
    }

    fn insert_entry(&self, entry: Entry) -> StoreFuture<'_, bool> {
        self.guard("insert_entry", || self.inner.insert_entry(entry))
    }

    fn entries(&self, holder: HolderId) -> StoreFuture<'_, Vec<Entry>> {
        self.guard("entries", || self.inner.entries(holder))
    }
}
