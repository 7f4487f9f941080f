//! Row decoding and integer conversions.

use chrono::{DateTime, Utc};
use moby_comps_core::error::StoreError;
use moby_comps_core::types::{
    CartItem, CartItemId, Competition, CompetitionId, CompetitionStatus, Entry, EntryId,
    EntryStatus, HolderId, Money, PaymentRef, Ticket, TicketNumber, TicketStatus,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub(crate) fn db(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn decode(e: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(e.to_string())
}

pub(crate) fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Serialization(format!("{value} exceeds INTEGER")))
}

pub(crate) fn to_i64(money: Money) -> Result<i64, StoreError> {
    i64::try_from(money.pence())
        .map_err(|_| StoreError::Serialization(format!("{money} exceeds BIGINT")))
}

fn to_u32(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Serialization(format!("negative value {value}")))
}

pub(crate) fn numbers_to_sql(numbers: &[TicketNumber]) -> Result<Vec<i32>, StoreError> {
    numbers.iter().map(|n| to_i32(n.get())).collect()
}

fn numbers_from_sql(numbers: Vec<i32>) -> Result<Vec<TicketNumber>, StoreError> {
    numbers
        .into_iter()
        .map(|n| to_u32(n).map(TicketNumber::new))
        .collect()
}

pub(crate) fn number_from_sql(number: i32) -> Result<TicketNumber, StoreError> {
    to_u32(number).map(TicketNumber::new)
}

pub(crate) fn competition(row: &PgRow) -> Result<Competition, StoreError> {
    let status: String = row.try_get("status").map_err(decode)?;
    let price: i64 = row.try_get("ticket_price_pence").map_err(decode)?;
    Ok(Competition {
        id: CompetitionId::from_uuid(row.try_get("id").map_err(decode)?),
        title: row.try_get("title").map_err(decode)?,
        max_tickets: to_u32(row.try_get("max_tickets").map_err(decode)?)?,
        ticket_price: Money::from_pence(u64::try_from(price).map_err(decode)?),
        draw_date: row.try_get("draw_date").map_err(decode)?,
        status: CompetitionStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown competition status {status}")))?,
        tickets_sold: to_u32(row.try_get("tickets_sold").map_err(decode)?)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

pub(crate) fn ticket(row: &PgRow) -> Result<Ticket, StoreError> {
    let status: String = row.try_get("status").map_err(decode)?;
    let holder: Option<Uuid> = row.try_get("holder").map_err(decode)?;
    let missing = |column: &str| StoreError::Serialization(format!("{status} ticket without {column}"));

    let status = match status.as_str() {
        "available" => TicketStatus::Available,
        "reserved" => {
            let reserved_until: Option<DateTime<Utc>> =
                row.try_get("reserved_until").map_err(decode)?;
            let reserved_at: Option<DateTime<Utc>> = row.try_get("reserved_at").map_err(decode)?;
            let reserved_until = reserved_until.ok_or_else(|| missing("reserved_until"))?;
            TicketStatus::Reserved {
                holder: HolderId::from_uuid(holder.ok_or_else(|| missing("holder"))?),
                reserved_at: reserved_at.unwrap_or(reserved_until),
                reserved_until,
            }
        }
        "purchased" => {
            let payment_ref: Option<String> = row.try_get("payment_ref").map_err(decode)?;
            let purchased_at: Option<DateTime<Utc>> =
                row.try_get("purchased_at").map_err(decode)?;
            TicketStatus::Purchased {
                holder: HolderId::from_uuid(holder.ok_or_else(|| missing("holder"))?),
                purchased_at: purchased_at.ok_or_else(|| missing("purchased_at"))?,
                payment_ref: PaymentRef::parse(payment_ref.ok_or_else(|| missing("payment_ref"))?)
                    .map_err(decode)?,
            }
        }
        other => {
            return Err(StoreError::Serialization(format!("unknown ticket status {other}")));
        }
    };

    Ok(Ticket {
        competition_id: CompetitionId::from_uuid(row.try_get("competition_id").map_err(decode)?),
        number: number_from_sql(row.try_get("number").map_err(decode)?)?,
        status,
    })
}

pub(crate) fn cart_item(row: &PgRow) -> Result<CartItem, StoreError> {
    Ok(CartItem {
        id: CartItemId::from_uuid(row.try_get("id").map_err(decode)?),
        holder: HolderId::from_uuid(row.try_get("holder").map_err(decode)?),
        competition_id: CompetitionId::from_uuid(row.try_get("competition_id").map_err(decode)?),
        numbers: numbers_from_sql(row.try_get("numbers").map_err(decode)?)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

pub(crate) fn entry(row: &PgRow) -> Result<Entry, StoreError> {
    let status: String = row.try_get("status").map_err(decode)?;
    let payment_ref: String = row.try_get("payment_ref").map_err(decode)?;
    Ok(Entry {
        id: EntryId::from_uuid(row.try_get("id").map_err(decode)?),
        holder: HolderId::from_uuid(row.try_get("holder").map_err(decode)?),
        competition_id: CompetitionId::from_uuid(row.try_get("competition_id").map_err(decode)?),
        numbers: numbers_from_sql(row.try_get("numbers").map_err(decode)?)?,
        payment_ref: PaymentRef::parse(payment_ref).map_err(decode)?,
        status: EntryStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown entry status {status}")))?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_conversions_reject_overflow() {
        assert_eq!(to_i32(7).ok(), Some(7));
        assert!(to_i32(u32::MAX).is_err());
        assert!(to_u32(-1).is_err());
        assert!(to_i64(Money::from_pence(u64::MAX)).is_err());
    }

    #[test]
    fn numbers_round_trip_through_sql_arrays() {
        let numbers = vec![TicketNumber::new(1), TicketNumber::new(9)];
        let sql = numbers_to_sql(&numbers).ok();
        assert_eq!(sql, Some(vec![1, 9]));
        assert_eq!(numbers_from_sql(vec![1, 9]).ok(), Some(numbers));
    }
}
