//! In-memory implementation of every storage trait.
//!
//! One mutex guards all tables, so each method is a single atomic step, the
//! same guarantee the Postgres store gets from one conditional SQL statement.
//! The lock is never held across an `.await`.

#![allow(clippy::missing_panics_doc)] // Poisoned locks are recovered, never unwrapped

use moby_comps_core::error::StoreError;
use moby_comps_core::store::{
    CartStore, CompetitionStore, SettlementStore, StoreFuture, TicketStore,
};
use moby_comps_core::types::{
    CartItem, CartItemId, Competition, CompetitionId, CompetitionStatus, Entry, HolderId,
    PaymentRef, Settlement, SettlementClaim, Ticket, TicketNumber, TicketStatus, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
enum SettlementRecord {
    Pending(HolderId),
    Completed(HolderId, Settlement),
}

#[derive(Debug, Default)]
struct Tables {
    competitions: BTreeMap<CompetitionId, Competition>,
    competition_order: Vec<CompetitionId>,
    tickets: BTreeMap<(CompetitionId, TicketNumber), TicketStatus>,
    cart_items: HashMap<CartItemId, CartItem>,
    settlements: HashMap<PaymentRef, SettlementRecord>,
    entries: Vec<Entry>,
}

/// In-memory store for fast, deterministic testing.
///
/// Complements `PostgresStore`: same trait, same conditional semantics, no
/// database. Clones share the same tables.
///
/// # Example
///
/// ```
/// use moby_comps_testing::InMemoryStore;
/// use moby_comps_core::store::TicketStore;
/// use moby_comps_core::types::{CompetitionId, HolderId, TicketNumber};
/// use chrono::{Duration, Utc};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new();
/// let competition = CompetitionId::new();
/// let now = Utc::now();
///
/// let first = store
///     .try_reserve(competition, TicketNumber::new(1), HolderId::new(), now, now + Duration::minutes(15))
///     .await?;
/// let second = store
///     .try_reserve(competition, TicketNumber::new(1), HolderId::new(), now, now + Duration::minutes(15))
///     .await?;
/// assert!(first && !second);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of ticket rows (reserved or purchased, plus swept rows).
    ///
    /// Useful for assertions in tests.
    #[must_use]
    pub fn ticket_rows(&self) -> usize {
        self.lock().tickets.len()
    }

    /// Number of settlement records, pending or completed.
    #[must_use]
    pub fn settlement_count(&self) -> usize {
        self.lock().settlements.len()
    }

    /// Overwrite a ticket's status directly, bypassing the conditional rules.
    ///
    /// For arranging test scenarios only.
    pub fn force_ticket(&self, competition_id: CompetitionId, number: TicketNumber, status: TicketStatus) {
        self.lock().tickets.insert((competition_id, number), status);
    }
}

fn ready<T: Send + 'static>(value: T) -> StoreFuture<'static, T> {
    Box::pin(std::future::ready(Ok(value)))
}

impl CompetitionStore for InMemoryStore {
    fn insert_competition(&self, competition: Competition) -> StoreFuture<'_, ()> {
        let mut tables = self.lock();
        if tables.competitions.contains_key(&competition.id) {
            return Box::pin(std::future::ready(Err(StoreError::Database(format!(
                "duplicate competition {}",
                competition.id
            )))));
        }
        tables.competition_order.push(competition.id);
        tables.competitions.insert(competition.id, competition);
        ready(())
    }

    fn competition(&self, id: CompetitionId) -> StoreFuture<'_, Option<Competition>> {
        ready(self.lock().competitions.get(&id).cloned())
    }

    fn list_competitions(
        &self,
        status: Option<CompetitionStatus>,
    ) -> StoreFuture<'_, Vec<Competition>> {
        let tables = self.lock();
        let list = tables
            .competition_order
            .iter()
            .filter_map(|id| tables.competitions.get(id))
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        ready(list)
    }

    fn transition_competition(
        &self,
        id: CompetitionId,
        from: CompetitionStatus,
        to: CompetitionStatus,
    ) -> StoreFuture<'_, bool> {
        let mut tables = self.lock();
        let moved = match tables.competitions.get_mut(&id) {
            Some(competition) if competition.status == from => {
                competition.status = to;
                true
            }
            _ => false,
        };
        ready(moved)
    }
}

impl TicketStore for InMemoryStore {
    fn try_reserve(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: HolderId,
        reserved_at: Timestamp,
        reserved_until: Timestamp,
    ) -> StoreFuture<'_, bool> {
        let mut tables = self.lock();
        let slot = tables
            .tickets
            .entry((competition_id, number))
            .or_insert(TicketStatus::Available);
        let taken = if matches!(slot, TicketStatus::Available) {
            *slot = TicketStatus::Reserved {
                holder,
                reserved_at,
                reserved_until,
            };
            true
        } else {
            false
        };
        ready(taken)
    }

    fn release(
        &self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
        holder: HolderId,
    ) -> StoreFuture<'_, Vec<TicketNumber>> {
        let mut tables = self.lock();
        let mut released = Vec::new();
        for number in numbers {
            if let Some(slot) = tables.tickets.get_mut(&(competition_id, number)) {
                if matches!(slot, TicketStatus::Reserved { holder: h, .. } if *h == holder) {
                    *slot = TicketStatus::Available;
                    released.push(number);
                }
            }
        }
        released.sort_unstable();
        ready(released)
    }

    fn release_all(&self, holder: HolderId) -> StoreFuture<'_, u64> {
        let mut tables = self.lock();
        let mut count = 0;
        for slot in tables.tickets.values_mut() {
            if matches!(slot, TicketStatus::Reserved { holder: h, .. } if *h == holder) {
                *slot = TicketStatus::Available;
                count += 1;
            }
        }
        ready(count)
    }

    fn purchase(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: HolderId,
        payment_ref: PaymentRef,
        now: Timestamp,
    ) -> StoreFuture<'_, bool> {
        let mut tables = self.lock();
        let purchased = match tables.tickets.get_mut(&(competition_id, number)) {
            Some(slot)
                if matches!(
                    &*slot,
                    TicketStatus::Reserved { holder: h, reserved_until, .. }
                        if *h == holder && *reserved_until > now
                ) =>
            {
                *slot = TicketStatus::Purchased {
                    holder,
                    purchased_at: now,
                    payment_ref,
                };
                true
            }
            _ => false,
        };
        ready(purchased)
    }

    fn sweep_expired(
        &self,
        competition_id: Option<CompetitionId>,
        now: Timestamp,
    ) -> StoreFuture<'_, u64> {
        let mut tables = self.lock();
        let mut swept = 0;
        for ((competition, _), slot) in &mut tables.tickets {
            if competition_id.is_some_and(|id| id != *competition) {
                continue;
            }
            if matches!(slot, TicketStatus::Reserved { reserved_until, .. } if *reserved_until <= now) {
                *slot = TicketStatus::Available;
                swept += 1;
            }
        }
        ready(swept)
    }

    fn held_by(&self, holder: HolderId) -> StoreFuture<'_, Vec<Ticket>> {
        let tables = self.lock();
        let held = tables
            .tickets
            .iter()
            .filter(|(_, status)| matches!(status, TicketStatus::Reserved { holder: h, .. } if *h == holder))
            .map(|((competition_id, number), status)| Ticket {
                competition_id: *competition_id,
                number: *number,
                status: status.clone(),
            })
            .collect();
        ready(held)
    }

    fn purchased_with(
        &self,
        holder: HolderId,
        payment_ref: PaymentRef,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        let tables = self.lock();
        let bought = tables
            .tickets
            .iter()
            .filter(|(_, status)| {
                matches!(
                    status,
                    TicketStatus::Purchased { holder: h, payment_ref: r, .. }
                        if *h == holder && *r == payment_ref
                )
            })
            .map(|((competition_id, number), status)| Ticket {
                competition_id: *competition_id,
                number: *number,
                status: status.clone(),
            })
            .collect();
        ready(bought)
    }

    fn unavailable(&self, competition_id: CompetitionId) -> StoreFuture<'_, Vec<Ticket>> {
        let tables = self.lock();
        let taken = tables
            .tickets
            .range((competition_id, TicketNumber::new(0))..=(competition_id, TicketNumber::new(u32::MAX)))
            .filter(|(_, status)| !matches!(status, TicketStatus::Available))
            .map(|((competition_id, number), status)| Ticket {
                competition_id: *competition_id,
                number: *number,
                status: status.clone(),
            })
            .collect();
        ready(taken)
    }

    fn ticket(&self, competition_id: CompetitionId, number: TicketNumber) -> StoreFuture<'_, Ticket> {
        let status = self
            .lock()
            .tickets
            .get(&(competition_id, number))
            .cloned()
            .unwrap_or(TicketStatus::Available);
        ready(Ticket {
            competition_id,
            number,
            status,
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        ready(())
    }
}

impl CartStore for InMemoryStore {
    fn merge_cart_item(&self, item: CartItem) -> StoreFuture<'_, CartItem> {
        let mut tables = self.lock();
        let existing = tables
            .cart_items
            .values_mut()
            .find(|c| c.holder == item.holder && c.competition_id == item.competition_id);
        let stored = if let Some(existing) = existing {
            let numbers: BTreeSet<TicketNumber> = existing
                .numbers
                .iter()
                .chain(item.numbers.iter())
                .copied()
                .collect();
            existing.numbers = numbers.into_iter().collect();
            existing.expires_at = existing.expires_at.min(item.expires_at);
            existing.clone()
        } else {
            tables.cart_items.insert(item.id, item.clone());
            item
        };
        ready(stored)
    }

    fn replace_cart_item(&self, item: CartItem) -> StoreFuture<'_, ()> {
        let mut tables = self.lock();
        if let Some(existing) = tables.cart_items.get_mut(&item.id) {
            existing.numbers = item.numbers;
            existing.expires_at = item.expires_at;
        }
        ready(())
    }

    fn cart_item(&self, id: CartItemId) -> StoreFuture<'_, Option<CartItem>> {
        ready(self.lock().cart_items.get(&id).cloned())
    }

    fn cart_items(&self, holder: HolderId) -> StoreFuture<'_, Vec<CartItem>> {
        let mut items: Vec<CartItem> = self
            .lock()
            .cart_items
            .values()
            .filter(|c| c.holder == holder)
            .cloned()
            .collect();
        items.sort_by_key(|c| (c.created_at, c.id));
        ready(items)
    }

    fn delete_cart_item(&self, id: CartItemId) -> StoreFuture<'_, bool> {
        ready(self.lock().cart_items.remove(&id).is_some())
    }

    fn clear_cart(&self, holder: HolderId) -> StoreFuture<'_, u64> {
        let mut tables = self.lock();
        let before = tables.cart_items.len();
        tables.cart_items.retain(|_, c| c.holder != holder);
        ready((before - tables.cart_items.len()) as u64)
    }
}

impl SettlementStore for InMemoryStore {
    fn claim_settlement(
        &self,
        payment_ref: PaymentRef,
        holder: HolderId,
        _now: Timestamp,
    ) -> StoreFuture<'_, SettlementClaim> {
        let mut tables = self.lock();
        let claim = match tables.settlements.get(&payment_ref) {
            Some(SettlementRecord::Pending(owner)) => SettlementClaim::InFlight { holder: *owner },
            Some(SettlementRecord::Completed(owner, settlement)) => SettlementClaim::Completed {
                holder: *owner,
                settlement: settlement.clone(),
            },
            None => {
                tables
                    .settlements
                    .insert(payment_ref, SettlementRecord::Pending(holder));
                SettlementClaim::Claimed
            }
        };
        ready(claim)
    }

    fn complete_settlement(
        &self,
        payment_ref: PaymentRef,
        settlement: Settlement,
    ) -> StoreFuture<'_, ()> {
        let mut tables = self.lock();
        match tables.settlements.get(&payment_ref).cloned() {
            Some(SettlementRecord::Pending(holder)) => {
                tables
                    .settlements
                    .insert(payment_ref, SettlementRecord::Completed(holder, settlement));
                ready(())
            }
            Some(SettlementRecord::Completed(..)) => ready(()),
            None => Box::pin(std::future::ready(Err(StoreError::NotFound(format!(
                "settlement {payment_ref}"
            ))))),
        }
    }

    fn abandon_settlement(&self, payment_ref: PaymentRef) -> StoreFuture<'_, ()> {
        let mut tables = self.lock();
        if matches!(tables.settlements.get(&payment_ref), Some(SettlementRecord::Pending(_))) {
            tables.settlements.remove(&payment_ref);
        }
        ready(())
    }

    fn insert_entry(&self, entry: Entry) -> StoreFuture<'_, bool> {
        let mut tables = self.lock();
        let recorded = tables
            .entries
            .iter()
            .any(|e| e.payment_ref == entry.payment_ref && e.competition_id == entry.competition_id);
        if recorded {
            return ready(false);
        }
        let count = u32::try_from(entry.numbers.len()).unwrap_or(u32::MAX);
        let Some(competition) = tables.competitions.get_mut(&entry.competition_id) else {
            return Box::pin(std::future::ready(Err(StoreError::NotFound(format!(
                "competition {}",
                entry.competition_id
            )))));
        };
        competition.tickets_sold = competition.tickets_sold.saturating_add(count);
        tables.entries.push(entry);
        ready(true)
    }

    fn entries(&self, holder: HolderId) -> StoreFuture<'_, Vec<Entry>> {
        let entries = self
            .lock()
            .entries
            .iter()
            .rev()
            .filter(|e| e.holder == holder)
            .cloned()
            .collect();
        ready(entries)
    }
}
