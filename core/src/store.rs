//! Storage contracts for the reservation core.
//!
//! The ticket store is the single source of truth for reservation state. Every
//! state-changing method is specified as a **conditional update**: it only takes
//! effect when the row is in the expected state, and reports whether it did.
//! That is the whole concurrency story; there are no application-level locks,
//! so any number of stateless service instances can share one store.
//!
//! # Implementations
//!
//! - `PostgresStore` (in `moby-comps-postgres`): production, one SQL statement
//!   per conditional update
//! - `InMemoryStore` (in `moby-comps-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return [`StoreFuture`] (a boxed future) instead of `async fn` so the
//! services can hold `Arc<dyn Storage>`.

use crate::error::StoreError;
use crate::types::{
    CartItem, CartItemId, Competition, CompetitionId, CompetitionStatus, Entry, HolderId,
    PaymentRef, Settlement, SettlementClaim, Ticket, TicketNumber, Timestamp,
};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by every storage method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Competitions and their lifecycle.
pub trait CompetitionStore: Send + Sync {
    /// Insert a new competition.
    fn insert_competition(&self, competition: Competition) -> StoreFuture<'_, ()>;

    /// Load a competition by id.
    fn competition(&self, id: CompetitionId) -> StoreFuture<'_, Option<Competition>>;

    /// List competitions, optionally filtered by status, oldest first.
    fn list_competitions(
        &self,
        status: Option<CompetitionStatus>,
    ) -> StoreFuture<'_, Vec<Competition>>;

    /// Move a competition from `from` to `to`.
    ///
    /// Conditional on the current status being `from`; returns whether the
    /// transition happened.
    fn transition_competition(
        &self,
        id: CompetitionId,
        from: CompetitionStatus,
        to: CompetitionStatus,
    ) -> StoreFuture<'_, bool>;
}

/// Ticket reservation state.
///
/// Untouched ticket numbers have no row and are available.
pub trait TicketStore: Send + Sync {
    /// Reserve one ticket for `holder` until `reserved_until`.
    ///
    /// Conditional on the ticket being available (or having no row). Returns
    /// `true` when this call took the hold, `false` when someone else has the
    /// ticket reserved or purchased. Exactly one of any number of concurrent
    /// callers for the same ticket gets `true`.
    fn try_reserve(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: HolderId,
        reserved_at: Timestamp,
        reserved_until: Timestamp,
    ) -> StoreFuture<'_, bool>;

    /// Release tickets held by `holder` back to available.
    ///
    /// Conditional on each ticket being reserved by `holder`; tickets held by
    /// anyone else are untouched. Returns the numbers actually released.
    fn release(
        &self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
        holder: HolderId,
    ) -> StoreFuture<'_, Vec<TicketNumber>>;

    /// Release every ticket reserved by `holder`, across all competitions.
    fn release_all(&self, holder: HolderId) -> StoreFuture<'_, u64>;

    /// Convert one held ticket into a purchased ticket.
    ///
    /// Conditional on the ticket being reserved by `holder` with
    /// `reserved_until > now`. Returns whether the purchase happened.
    fn purchase(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: HolderId,
        payment_ref: PaymentRef,
        now: Timestamp,
    ) -> StoreFuture<'_, bool>;

    /// Return every reservation with `reserved_until <= now` to available.
    ///
    /// Optionally scoped to one competition. Idempotent: rows already swept
    /// are not matched again. Returns the number of tickets reclaimed.
    fn sweep_expired(
        &self,
        competition_id: Option<CompetitionId>,
        now: Timestamp,
    ) -> StoreFuture<'_, u64>;

    /// Tickets currently reserved by `holder`, whatever their expiry.
    fn held_by(&self, holder: HolderId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Tickets `holder` bought with `payment_ref`, ordered by competition and
    /// number.
    fn purchased_with(
        &self,
        holder: HolderId,
        payment_ref: PaymentRef,
    ) -> StoreFuture<'_, Vec<Ticket>>;

    /// Reserved and purchased tickets of a competition, ordered by number.
    fn unavailable(&self, competition_id: CompetitionId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Current state of one ticket; available when no row exists.
    fn ticket(&self, competition_id: CompetitionId, number: TicketNumber) -> StoreFuture<'_, Ticket>;

    /// Cheap connectivity check for readiness probes.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Cart rows. A cache of the holder's holds, healed on read.
pub trait CartStore: Send + Sync {
    /// Insert or merge the holder's item for `item.competition_id`.
    ///
    /// At most one row exists per `(holder, competition)`. When one exists the
    /// numbers are unioned and `expires_at` becomes the earlier of the two.
    /// Returns the stored row.
    fn merge_cart_item(&self, item: CartItem) -> StoreFuture<'_, CartItem>;

    /// Overwrite the numbers and expiry of an existing row.
    fn replace_cart_item(&self, item: CartItem) -> StoreFuture<'_, ()>;

    /// Load one cart item.
    fn cart_item(&self, id: CartItemId) -> StoreFuture<'_, Option<CartItem>>;

    /// All cart items of a holder, oldest first.
    fn cart_items(&self, holder: HolderId) -> StoreFuture<'_, Vec<CartItem>>;

    /// Delete a cart item; returns whether it existed.
    fn delete_cart_item(&self, id: CartItemId) -> StoreFuture<'_, bool>;

    /// Delete all cart items of a holder; returns how many were deleted.
    fn clear_cart(&self, holder: HolderId) -> StoreFuture<'_, u64>;
}

/// Settlement idempotency records and entries.
pub trait SettlementStore: Send + Sync {
    /// Claim `payment_ref` for settlement by `holder`.
    ///
    /// Insert-if-absent: the first caller gets [`SettlementClaim::Claimed`];
    /// later callers see the in-flight or completed record.
    fn claim_settlement(
        &self,
        payment_ref: PaymentRef,
        holder: HolderId,
        now: Timestamp,
    ) -> StoreFuture<'_, SettlementClaim>;

    /// Store the outcome of a claimed settlement and mark it completed.
    fn complete_settlement(
        &self,
        payment_ref: PaymentRef,
        settlement: Settlement,
    ) -> StoreFuture<'_, ()>;

    /// Drop a pending claim so the reference can be settled later.
    ///
    /// Completed records are never removed.
    fn abandon_settlement(&self, payment_ref: PaymentRef) -> StoreFuture<'_, ()>;

    /// Record an entry and add its numbers to the competition's
    /// `tickets_sold`, as one atomic step.
    ///
    /// At most one entry exists per `(payment_ref, competition)`. Returns
    /// `false`, changing nothing, when that entry is already recorded.
    fn insert_entry(&self, entry: Entry) -> StoreFuture<'_, bool>;

    /// Entries of a holder, newest first.
    fn entries(&self, holder: HolderId) -> StoreFuture<'_, Vec<Entry>>;
}

/// Everything the services need from storage.
pub trait Storage: CompetitionStore + TicketStore + CartStore + SettlementStore {}

impl<T> Storage for T where T: CompetitionStore + TicketStore + CartStore + SettlementStore {}
