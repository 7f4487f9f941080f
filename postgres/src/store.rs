//! Storage trait implementations.

use crate::PostgresStore;
use crate::rows::{self, db, number_from_sql, numbers_to_sql, to_i32, to_i64};
use chrono::Utc;
use moby_comps_core::error::StoreError;
use moby_comps_core::store::{
    CartStore, CompetitionStore, SettlementStore, StoreFuture, TicketStore,
};
use moby_comps_core::types::{
    CartItem, CartItemId, Competition, CompetitionId, CompetitionStatus, Entry, HolderId,
    PaymentRef, Settlement, SettlementClaim, Ticket, TicketNumber, TicketStatus, Timestamp,
};
use sqlx::Row;
use std::future::Future;
use tracing::{Instrument, Span, debug_span};
use uuid::Uuid;

const TICKET_COLUMNS: &str = "competition_id, number, status, holder, reserved_at, reserved_until, purchased_at, payment_ref";
const CART_COLUMNS: &str = "id, holder, competition_id, numbers, expires_at, created_at";
const COMPETITION_COLUMNS: &str =
    "id, title, max_tickets, ticket_price_pence, draw_date, status, tickets_sold, created_at";

/// Attempts at claiming a reference whose pending row vanished between the
/// insert and the read.
const CLAIM_ATTEMPTS: usize = 3;

fn traced<'a, T>(
    span: Span,
    query: impl Future<Output = Result<T, StoreError>> + Send + 'a,
) -> StoreFuture<'a, T> {
    Box::pin(query.instrument(span))
}

impl CompetitionStore for PostgresStore {
    fn insert_competition(&self, competition: Competition) -> StoreFuture<'_, ()> {
        let span = debug_span!("store.insert_competition", competition_id = %competition.id);
        traced(span, async move {
            sqlx::query(
                r"
                INSERT INTO competitions (
                    id, title, max_tickets, ticket_price_pence, draw_date,
                    status, tickets_sold, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(*competition.id.as_uuid())
            .bind(&competition.title)
            .bind(to_i32(competition.max_tickets)?)
            .bind(to_i64(competition.ticket_price)?)
            .bind(competition.draw_date)
            .bind(competition.status.as_str())
            .bind(to_i32(competition.tickets_sold)?)
            .bind(competition.created_at)
            .execute(&self.pool)
            .await
            .map_err(db)?;
            Ok(())
        })
    }

    fn competition(&self, id: CompetitionId) -> StoreFuture<'_, Option<Competition>> {
        let span = debug_span!("store.competition", competition_id = %id);
        traced(span, async move {
            let row = sqlx::query(&format!(
                "SELECT {COMPETITION_COLUMNS} FROM competitions WHERE id = $1"
            ))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
            row.as_ref().map(rows::competition).transpose()
        })
    }

    fn list_competitions(
        &self,
        status: Option<CompetitionStatus>,
    ) -> StoreFuture<'_, Vec<Competition>> {
        let span = debug_span!("store.list_competitions", status = ?status);
        traced(span, async move {
            let found = sqlx::query(&format!(
                "SELECT {COMPETITION_COLUMNS} FROM competitions
                 WHERE $1::text IS NULL OR status = $1
                 ORDER BY created_at, id"
            ))
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
            found.iter().map(rows::competition).collect()
        })
    }

    fn transition_competition(
        &self,
        id: CompetitionId,
        from: CompetitionStatus,
        to: CompetitionStatus,
    ) -> StoreFuture<'_, bool> {
        let span = debug_span!("store.transition_competition", competition_id = %id, %from, %to);
        traced(span, async move {
            let result = sqlx::query("UPDATE competitions SET status = $3 WHERE id = $1 AND status = $2")
                .bind(*id.as_uuid())
                .bind(from.as_str())
                .bind(to.as_str())
                .execute(&self.pool)
                .await
                .map_err(db)?;
            Ok(result.rows_affected() == 1)
        })
    }
}

impl TicketStore for PostgresStore {
    fn try_reserve(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: HolderId,
        reserved_at: Timestamp,
        reserved_until: Timestamp,
    ) -> StoreFuture<'_, bool> {
        let span = debug_span!("store.try_reserve", %competition_id, %number, %holder);
        traced(span, async move {
            // A missing row is an available ticket. Concurrent inserts of the
            // same number serialize on the primary key; the loser re-checks
            // the WHERE clause and gets no row back.
            let taken = sqlx::query(
                r"
                INSERT INTO tickets (competition_id, number, status, holder, reserved_at, reserved_until)
                VALUES ($1, $2, 'reserved', $3, $4, $5)
                ON CONFLICT (competition_id, number) DO UPDATE
                SET status = 'reserved',
                    holder = EXCLUDED.holder,
                    reserved_at = EXCLUDED.reserved_at,
                    reserved_until = EXCLUDED.reserved_until,
                    purchased_at = NULL,
                    payment_ref = NULL
                WHERE tickets.status = 'available'
                RETURNING number
                ",
            )
            .bind(*competition_id.as_uuid())
            .bind(to_i32(number.get())?)
            .bind(*holder.as_uuid())
            .bind(reserved_at)
            .bind(reserved_until)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
            Ok(taken.is_some())
        })
    }

    fn release(
        &self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
        holder: HolderId,
    ) -> StoreFuture<'_, Vec<TicketNumber>> {
        let span = debug_span!("store.release", %competition_id, %holder);
        traced(span, async move {
            let released: Vec<(i32,)> = sqlx::query_as(
                r"
                UPDATE tickets
                SET status = 'available', holder = NULL, reserved_at = NULL, reserved_until = NULL
                WHERE competition_id = $1
                  AND number = ANY($2)
                  AND status = 'reserved'
                  AND holder = $3
                RETURNING number
                ",
            )
            .bind(*competition_id.as_uuid())
            .bind(numbers_to_sql(&numbers)?)
            .bind(*holder.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

            let mut released = released
                .into_iter()
                .map(|(n,)| number_from_sql(n))
                .collect::<Result<Vec<_>, _>>()?;
            released.sort_unstable();
            Ok(released)
        })
    }

    fn release_all(&self, holder: HolderId) -> StoreFuture<'_, u64> {
        let span = debug_span!("store.release_all", %holder);
        traced(span, async move {
            let result = sqlx::query(
                r"
                UPDATE tickets
                SET status = 'available', holder = NULL, reserved_at = NULL, reserved_until = NULL
                WHERE status = 'reserved' AND holder = $1
                ",
            )
            .bind(*holder.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db)?;
            Ok(result.rows_affected())
        })
    }

    fn purchase(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: HolderId,
        payment_ref: PaymentRef,
        now: Timestamp,
    ) -> StoreFuture<'_, bool> {
        let span = debug_span!("store.purchase", %competition_id, %number, %holder);
        traced(span, async move {
            let result = sqlx::query(
                r"
                UPDATE tickets
                SET status = 'purchased', purchased_at = $5, payment_ref = $4,
                    reserved_at = NULL, reserved_until = NULL
                WHERE competition_id = $1
                  AND number = $2
                  AND status = 'reserved'
                  AND holder = $3
                  AND reserved_until > $5
                ",
            )
            .bind(*competition_id.as_uuid())
            .bind(to_i32(number.get())?)
            .bind(*holder.as_uuid())
            .bind(payment_ref.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db)?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn sweep_expired(
        &self,
        competition_id: Option<CompetitionId>,
        now: Timestamp,
    ) -> StoreFuture<'_, u64> {
        let span = debug_span!("store.sweep_expired", competition_id = ?competition_id);
        traced(span, async move {
            let result = sqlx::query(
                r"
                UPDATE tickets
                SET status = 'available', holder = NULL, reserved_at = NULL, reserved_until = NULL
                WHERE status = 'reserved'
                  AND reserved_until <= $1
                  AND ($2::uuid IS NULL OR competition_id = $2)
                ",
            )
            .bind(now)
            .bind(competition_id.map(|id| *id.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(db)?;
            Ok(result.rows_affected())
        })
    }

    fn held_by(&self, holder: HolderId) -> StoreFuture<'_, Vec<Ticket>> {
        let span = debug_span!("store.held_by", %holder);
        traced(span, async move {
            let found = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE status = 'reserved' AND holder = $1
                 ORDER BY competition_id, number"
            ))
            .bind(*holder.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
            found.iter().map(rows::ticket).collect()
        })
    }

    fn purchased_with(
        &self,
        holder: HolderId,
        payment_ref: PaymentRef,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        let span = debug_span!("store.purchased_with", %holder, %payment_ref);
        traced(span, async move {
            let found = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE status = 'purchased' AND holder = $1 AND payment_ref = $2
                 ORDER BY competition_id, number"
            ))
            .bind(*holder.as_uuid())
            .bind(payment_ref.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
            found.iter().map(rows::ticket).collect()
        })
    }

    fn unavailable(&self, competition_id: CompetitionId) -> StoreFuture<'_, Vec<Ticket>> {
        let span = debug_span!("store.unavailable", %competition_id);
        traced(span, async move {
            let found = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE competition_id = $1 AND status <> 'available'
                 ORDER BY number"
            ))
            .bind(*competition_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
            found.iter().map(rows::ticket).collect()
        })
    }

    fn ticket(&self, competition_id: CompetitionId, number: TicketNumber) -> StoreFuture<'_, Ticket> {
        let span = debug_span!("store.ticket", %competition_id, %number);
        traced(span, async move {
            let row = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE competition_id = $1 AND number = $2"
            ))
            .bind(*competition_id.as_uuid())
            .bind(to_i32(number.get())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
            match row {
                Some(row) => rows::ticket(&row),
                None => Ok(Ticket {
                    competition_id,
                    number,
                    status: TicketStatus::Available,
                }),
            }
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        let span = debug_span!("store.ping");
        traced(span, async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(db)?;
            Ok(())
        })
    }
}

impl CartStore for PostgresStore {
    fn merge_cart_item(&self, item: CartItem) -> StoreFuture<'_, CartItem> {
        let span = debug_span!(
            "store.merge_cart_item",
            holder = %item.holder,
            competition_id = %item.competition_id
        );
        traced(span, async move {
            let row = sqlx::query(&format!(
                r"
                INSERT INTO cart_items (id, holder, competition_id, numbers, expires_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (holder, competition_id) DO UPDATE
                SET numbers = ARRAY(
                        SELECT DISTINCT n
                        FROM unnest(cart_items.numbers || EXCLUDED.numbers) AS n
                        ORDER BY n
                    ),
                    expires_at = LEAST(cart_items.expires_at, EXCLUDED.expires_at)
                RETURNING {CART_COLUMNS}
                "
            ))
            .bind(*item.id.as_uuid())
            .bind(*item.holder.as_uuid())
            .bind(*item.competition_id.as_uuid())
            .bind(numbers_to_sql(&item.numbers)?)
            .bind(item.expires_at)
            .bind(item.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
            rows::cart_item(&row)
        })
    }

    fn replace_cart_item(&self, item: CartItem) -> StoreFuture<'_, ()> {
        let span = debug_span!("store.replace_cart_item", cart_item_id = %item.id);
        traced(span, async move {
            sqlx::query("UPDATE cart_items SET numbers = $2, expires_at = $3 WHERE id = $1")
                .bind(*item.id.as_uuid())
                .bind(numbers_to_sql(&item.numbers)?)
                .bind(item.expires_at)
                .execute(&self.pool)
                .await
                .map_err(db)?;
            Ok(())
        })
    }

    fn cart_item(&self, id: CartItemId) -> StoreFuture<'_, Option<CartItem>> {
        let span = debug_span!("store.cart_item", cart_item_id = %id);
        traced(span, async move {
            let row = sqlx::query(&format!("SELECT {CART_COLUMNS} FROM cart_items WHERE id = $1"))
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;
            row.as_ref().map(rows::cart_item).transpose()
        })
    }

    fn cart_items(&self, holder: HolderId) -> StoreFuture<'_, Vec<CartItem>> {
        let span = debug_span!("store.cart_items", %holder);
        traced(span, async move {
            let found = sqlx::query(&format!(
                "SELECT {CART_COLUMNS} FROM cart_items WHERE holder = $1 ORDER BY created_at, id"
            ))
            .bind(*holder.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
            found.iter().map(rows::cart_item).collect()
        })
    }

    fn delete_cart_item(&self, id: CartItemId) -> StoreFuture<'_, bool> {
        let span = debug_span!("store.delete_cart_item", cart_item_id = %id);
        traced(span, async move {
            let result = sqlx::query("DELETE FROM cart_items WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db)?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn clear_cart(&self, holder: HolderId) -> StoreFuture<'_, u64> {
        let span = debug_span!("store.clear_cart", %holder);
        traced(span, async move {
            let result = sqlx::query("DELETE FROM cart_items WHERE holder = $1")
                .bind(*holder.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db)?;
            Ok(result.rows_affected())
        })
    }
}

impl SettlementStore for PostgresStore {
    fn claim_settlement(
        &self,
        payment_ref: PaymentRef,
        holder: HolderId,
        now: Timestamp,
    ) -> StoreFuture<'_, SettlementClaim> {
        let span = debug_span!("store.claim_settlement", %payment_ref, %holder);
        traced(span, async move {
            for _ in 0..CLAIM_ATTEMPTS {
                let inserted = sqlx::query(
                    r"
                    INSERT INTO settlements (payment_ref, holder, state, created_at)
                    VALUES ($1, $2, 'pending', $3)
                    ON CONFLICT (payment_ref) DO NOTHING
                    RETURNING payment_ref
                    ",
                )
                .bind(payment_ref.as_str())
                .bind(*holder.as_uuid())
                .bind(now)
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;
                if inserted.is_some() {
                    return Ok(SettlementClaim::Claimed);
                }

                let existing = sqlx::query(
                    "SELECT holder, state, outcome FROM settlements WHERE payment_ref = $1",
                )
                .bind(payment_ref.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;
                let Some(row) = existing else {
                    // Abandoned between our insert and read; try again.
                    continue;
                };

                let owner: Uuid = row.try_get("holder").map_err(db)?;
                let state: String = row.try_get("state").map_err(db)?;
                let owner = HolderId::from_uuid(owner);
                if state == "pending" {
                    return Ok(SettlementClaim::InFlight { holder: owner });
                }
                let outcome: Option<serde_json::Value> = row.try_get("outcome").map_err(db)?;
                let settlement: Settlement = serde_json::from_value(outcome.unwrap_or_default())
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                return Ok(SettlementClaim::Completed {
                    holder: owner,
                    settlement,
                });
            }
            Err(StoreError::Database(format!(
                "settlement claim for {payment_ref} kept changing"
            )))
        })
    }

    fn complete_settlement(
        &self,
        payment_ref: PaymentRef,
        settlement: Settlement,
    ) -> StoreFuture<'_, ()> {
        let span = debug_span!("store.complete_settlement", %payment_ref);
        traced(span, async move {
            let outcome = serde_json::to_value(&settlement)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let result = sqlx::query(
                r"
                UPDATE settlements
                SET state = 'completed', outcome = $2, completed_at = $3
                WHERE payment_ref = $1 AND state = 'pending'
                ",
            )
            .bind(payment_ref.as_str())
            .bind(outcome)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(db)?;
            if result.rows_affected() == 1 {
                return Ok(());
            }

            // Already completed is fine; a missing claim is not.
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT state FROM settlements WHERE payment_ref = $1")
                    .bind(payment_ref.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db)?;
            match exists {
                Some(_) => Ok(()),
                None => Err(StoreError::NotFound(format!("settlement {payment_ref}"))),
            }
        })
    }

    fn abandon_settlement(&self, payment_ref: PaymentRef) -> StoreFuture<'_, ()> {
        let span = debug_span!("store.abandon_settlement", %payment_ref);
        traced(span, async move {
            sqlx::query("DELETE FROM settlements WHERE payment_ref = $1 AND state = 'pending'")
                .bind(payment_ref.as_str())
                .execute(&self.pool)
                .await
                .map_err(db)?;
            Ok(())
        })
    }

    fn insert_entry(&self, entry: Entry) -> StoreFuture<'_, bool> {
        let span = debug_span!(
            "store.insert_entry",
            payment_ref = %entry.payment_ref,
            competition_id = %entry.competition_id
        );
        traced(span, async move {
            // One statement, so the entry and the counter move together.
            let result = sqlx::query(
                r"
                WITH inserted AS (
                    INSERT INTO entries (id, holder, competition_id, numbers, payment_ref, status, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (payment_ref, competition_id) DO NOTHING
                    RETURNING competition_id, cardinality(numbers) AS sold
                )
                UPDATE competitions
                SET tickets_sold = competitions.tickets_sold + inserted.sold
                FROM inserted
                WHERE competitions.id = inserted.competition_id
                ",
            )
            .bind(*entry.id.as_uuid())
            .bind(*entry.holder.as_uuid())
            .bind(*entry.competition_id.as_uuid())
            .bind(numbers_to_sql(&entry.numbers)?)
            .bind(entry.payment_ref.as_str())
            .bind(entry.status.as_str())
            .bind(entry.created_at)
            .execute(&self.pool)
            .await
            .map_err(db)?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn entries(&self, holder: HolderId) -> StoreFuture<'_, Vec<Entry>> {
        let span = debug_span!("store.entries", %holder);
        traced(span, async move {
            let found = sqlx::query(
                r"
                SELECT id, holder, competition_id, numbers, payment_ref, status, created_at
                FROM entries
                WHERE holder = $1
                ORDER BY created_at DESC, id
                ",
            )
            .bind(*holder.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
            found.iter().map(rows::entry).collect()
        })
    }
}
