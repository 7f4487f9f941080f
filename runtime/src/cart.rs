//! Cart aggregation.
//!
//! Cart rows cache which numbers a session holds per competition. They are
//! never trusted on their own: every view is re-derived from live ticket
//! state, and rows that drifted (swept, purchased or released numbers) are
//! rewritten or deleted on the way so storage converges.

use crate::competitions::load_competition;
use crate::metrics;
use crate::reservation::ReservationService;
use crate::retry::retry_read;
use moby_comps_core::environment::Clock;
use moby_comps_core::error::ReservationError;
use moby_comps_core::store::Storage;
use moby_comps_core::types::{
    CartItem, CartItemId, CompetitionId, HolderId, Money, TicketNumber, Timestamp,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One competition's line in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Cart item id
    pub id: CartItemId,
    /// Competition of the held numbers
    pub competition_id: CompetitionId,
    /// Competition title
    pub title: String,
    /// Held numbers, ascending
    pub numbers: Vec<TicketNumber>,
    /// Price of one ticket
    pub ticket_price: Money,
    /// `numbers × ticket_price`
    pub line_total: Money,
    /// Earliest hold deadline among the numbers
    pub expires_at: Timestamp,
}

/// A session's cart as derived from its current holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    /// Lines, oldest first
    pub items: Vec<CartLine>,
    /// Earliest expiry across all lines; `None` for an empty cart
    pub expires_at: Option<Timestamp>,
    /// Whole seconds until `expires_at`, for the countdown display
    pub seconds_remaining: Option<i64>,
    /// Sum of line totals
    pub total: Money,
}

/// Server-side cart over the reservation service.
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    reservations: ReservationService,
}

impl CartService {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        reservations: ReservationService,
    ) -> Self {
        Self {
            store,
            clock,
            reservations,
        }
    }

    /// Derive the holder's cart from live ticket state, healing stale rows.
    ///
    /// Lines come from the holder's unexpired holds; cart rows only supply
    /// ids and ordering. Rows whose holds are gone are deleted, rows that
    /// drifted are rewritten, and holds without a row get one.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    #[tracing::instrument(skip(self), fields(holder = %holder))]
    pub async fn view(&self, holder: HolderId) -> Result<CartView, ReservationError> {
        let now = self.clock.now();

        // A lapsed hold awaiting the sweeper is already gone from the cart's
        // point of view.
        let mut held: BTreeMap<CompetitionId, BTreeMap<TicketNumber, Timestamp>> = BTreeMap::new();
        for ticket in retry_read(|| self.store.held_by(holder)).await? {
            if let Some(until) = ticket.reserved_until().filter(|until| *until > now) {
                held.entry(ticket.competition_id)
                    .or_default()
                    .insert(ticket.number, until);
            }
        }
        let items = retry_read(|| self.store.cart_items(holder)).await?;
        if items.is_empty() && held.is_empty() {
            return Ok(empty_view());
        }

        let mut rows = Vec::with_capacity(held.len());
        for item in items {
            let Some((numbers, expires_at)) = held.remove(&item.competition_id).and_then(live_numbers)
            else {
                tracing::debug!(cart_item_id = %item.id, "Dropping cart item with no live holds");
                self.store.delete_cart_item(item.id).await?;
                continue;
            };

            let healed = CartItem {
                numbers,
                expires_at,
                ..item.clone()
            };
            if healed != item {
                tracing::debug!(cart_item_id = %item.id, "Healing stale cart item");
                self.store.replace_cart_item(healed.clone()).await?;
            }
            rows.push(healed);
        }

        for (competition_id, live) in held {
            let Some((numbers, expires_at)) = live_numbers(live) else {
                continue;
            };
            tracing::debug!(%competition_id, "Recording hold missing from the cart");
            let stored = self
                .store
                .merge_cart_item(CartItem {
                    id: CartItemId::new(),
                    holder,
                    competition_id,
                    numbers: numbers.clone(),
                    expires_at,
                    created_at: now,
                })
                .await?;
            rows.push(CartItem {
                numbers,
                expires_at,
                ..stored
            });
        }

        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let competition = load_competition(self.store.as_ref(), row.competition_id).await?;
            lines.push(CartLine {
                id: row.id,
                competition_id: row.competition_id,
                title: competition.title,
                line_total: line_total(competition.ticket_price, row.numbers.len()),
                ticket_price: competition.ticket_price,
                numbers: row.numbers,
                expires_at: row.expires_at,
            });
        }

        let expires_at = lines.iter().map(|l| l.expires_at).min();
        let total = lines
            .iter()
            .fold(Money::ZERO, |sum, l| sum.saturating_add(l.line_total));
        Ok(CartView {
            seconds_remaining: expires_at.map(|at| (at - now).num_seconds().max(0)),
            expires_at,
            items: lines,
            total,
        })
    }

    /// Reserve numbers and add them to the holder's cart.
    ///
    /// Merges into the existing item for the competition when there is one.
    ///
    /// # Errors
    ///
    /// Any [`ReservationService::reserve`] error, unchanged; store errors.
    #[tracing::instrument(skip(self, numbers), fields(holder = %holder, competition_id = %competition_id))]
    pub async fn add_item(
        &self,
        holder: HolderId,
        competition_id: CompetitionId,
        numbers: Vec<u32>,
    ) -> Result<CartItem, ReservationError> {
        let (_, item) = self
            .reservations
            .reserve_into_cart(competition_id, numbers, holder)
            .await?;
        Ok(item)
    }

    /// Remove one item, releasing its tickets.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::CartItemNotFound`] for an unknown item
    /// - [`ReservationError::NotHolder`] for another session's item
    #[tracing::instrument(skip(self), fields(holder = %holder, cart_item_id = %item_id))]
    pub async fn remove_item(&self, holder: HolderId, item_id: CartItemId) -> Result<(), ReservationError> {
        let item = retry_read(|| self.store.cart_item(item_id))
            .await?
            .ok_or_else(|| ReservationError::CartItemNotFound(item_id.to_string()))?;
        if item.holder != holder {
            return Err(ReservationError::NotHolder);
        }

        let released = self
            .store
            .release(item.competition_id, item.numbers, holder)
            .await?;
        metrics::record_released(released.len());
        self.store.delete_cart_item(item_id).await?;
        tracing::info!(released = released.len(), "Cart item removed");
        Ok(())
    }

    /// Release every hold of the holder and empty the cart.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    #[tracing::instrument(skip(self), fields(holder = %holder))]
    pub async fn clear(&self, holder: HolderId) -> Result<(), ReservationError> {
        let released = self.store.release_all(holder).await?;
        let deleted = self.store.clear_cart(holder).await?;
        metrics::record_released(usize::try_from(released).unwrap_or(usize::MAX));
        tracing::info!(released, deleted, "Cart cleared");
        Ok(())
    }
}

const fn empty_view() -> CartView {
    CartView {
        items: Vec::new(),
        expires_at: None,
        seconds_remaining: None,
        total: Money::ZERO,
    }
}

fn line_total(price: Money, count: usize) -> Money {
    price.saturating_mul(u64::try_from(count).unwrap_or(u64::MAX))
}

/// Held numbers ascending, with the earliest deadline among them.
fn live_numbers(live: BTreeMap<TicketNumber, Timestamp>) -> Option<(Vec<TicketNumber>, Timestamp)> {
    let expires_at = live.values().min().copied()?;
    Some((live.into_keys().collect(), expires_at))
}
