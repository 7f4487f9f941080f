//! Domain types for the Moby Comps reservation core.
//!
//! Value objects (ids, [`Money`], [`TicketNumber`], [`PaymentRef`]) are validated
//! at construction so that the services and stores never see malformed input.
//! Entities mirror the persisted data contract: [`Competition`], [`Ticket`],
//! [`CartItem`], [`Entry`] and the settlement outcome.

use crate::error::ReservationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// A UTC instant. Serialized as RFC 3339.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a competition
    CompetitionId
);
uuid_id!(
    /// Identity of the shopper holding tickets (session or user id)
    HolderId
);
uuid_id!(
    /// Unique identifier for a cart item
    CartItemId
);
uuid_id!(
    /// Unique identifier for an entry
    EntryId
);

/// Reference of a confirmed payment at the external processor.
///
/// Settlement is idempotent per reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentRef(String);

impl PaymentRef {
    /// Longest accepted reference.
    pub const MAX_LEN: usize = 255;

    /// Validate and wrap a payment reference.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidPaymentRef`] if the reference is blank or
    /// longer than [`PaymentRef::MAX_LEN`].
    pub fn parse(value: impl Into<String>) -> Result<Self, ReservationError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > Self::MAX_LEN {
            return Err(ReservationError::InvalidPaymentRef);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// Money in integer minor units (pence).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero pence.
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from pence
    #[must_use]
    pub const fn from_pence(pence: u64) -> Self {
        Self(pence)
    }

    /// Returns the amount in pence
    #[must_use]
    pub const fn pence(&self) -> u64 {
        self.0
    }

    /// Adds two amounts, clamping at the largest representable amount
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Multiplies by a ticket count, clamping at the largest representable amount
    #[must_use]
    pub const fn saturating_mul(self, count: u64) -> Self {
        Self(self.0.saturating_mul(count))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "£{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Ticket numbers and selections
// ============================================================================

/// A ticket number within a competition, 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// Wrap a raw number. Range checks happen in [`TicketSelection::new`].
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// The raw number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated, non-empty, duplicate-free, in-range set of ticket numbers,
/// kept in ascending order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketSelection(Vec<TicketNumber>);

impl TicketSelection {
    /// Validate a raw selection against a competition's `max_tickets`.
    ///
    /// Checks run in order: emptiness, duplicates, then range.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::EmptySelection`] for an empty request
    /// - [`ReservationError::DuplicateNumbers`] listing each repeated number once
    /// - [`ReservationError::InvalidRange`] listing every number outside `[1, max_tickets]`
    pub fn new(numbers: Vec<u32>, max_tickets: u32) -> Result<Self, ReservationError> {
        if numbers.is_empty() {
            return Err(ReservationError::EmptySelection);
        }

        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for number in &numbers {
            if !seen.insert(*number) {
                duplicates.insert(*number);
            }
        }
        if !duplicates.is_empty() {
            return Err(ReservationError::DuplicateNumbers {
                numbers: duplicates.into_iter().collect(),
            });
        }

        let out_of_range: Vec<u32> = seen
            .iter()
            .copied()
            .filter(|n| *n == 0 || *n > max_tickets)
            .collect();
        if !out_of_range.is_empty() {
            return Err(ReservationError::InvalidRange {
                numbers: out_of_range,
                max_tickets,
            });
        }

        Ok(Self(seen.into_iter().map(TicketNumber).collect()))
    }

    /// Numbers in ascending order.
    #[must_use]
    pub fn numbers(&self) -> &[TicketNumber] {
        &self.0
    }

    /// Number of tickets selected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the ordered numbers.
    #[must_use]
    pub fn into_numbers(self) -> Vec<TicketNumber> {
        self.0
    }
}

// ============================================================================
// Competition
// ============================================================================

/// Lifecycle status of a competition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionStatus {
    /// Created by an admin, not yet on sale
    Draft,
    /// On sale; the only status that accepts reservations
    Live,
    /// Drawn
    Completed,
    /// Withdrawn
    Cancelled,
}

impl CompetitionStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Live => "live",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from its database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "live" => Some(Self::Live),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `draft → live → completed`, and `draft | live → cancelled`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Live)
                | (Self::Live, Self::Completed)
                | (Self::Draft | Self::Live, Self::Cancelled)
        )
    }
}

impl fmt::Display for CompetitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prize competition selling numbered tickets `1..=max_tickets`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Competition {
    /// Competition id
    pub id: CompetitionId,
    /// Display title
    pub title: String,
    /// Highest valid ticket number
    pub max_tickets: u32,
    /// Price of one ticket
    pub ticket_price: Money,
    /// When the draw takes place
    pub draw_date: Timestamp,
    /// Lifecycle status
    pub status: CompetitionStatus,
    /// Denormalized count of purchased tickets
    pub tickets_sold: u32,
    /// Creation time
    pub created_at: Timestamp,
}

impl Competition {
    /// A new draft competition.
    #[must_use]
    pub fn draft(
        title: impl Into<String>,
        max_tickets: u32,
        ticket_price: Money,
        draw_date: Timestamp,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: CompetitionId::new(),
            title: title.into(),
            max_tickets,
            ticket_price,
            draw_date,
            status: CompetitionStatus::Draft,
            tickets_sold: 0,
            created_at,
        }
    }

    /// Whether reservations are currently accepted.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.status, CompetitionStatus::Live)
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Status of a single ticket number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TicketStatus {
    /// Free to reserve
    Available,
    /// Held by `holder` until `reserved_until`
    Reserved {
        /// Session holding the ticket
        holder: HolderId,
        /// When the hold was taken
        reserved_at: Timestamp,
        /// Hold deadline
        reserved_until: Timestamp,
    },
    /// Sold
    Purchased {
        /// Owner of the ticket
        holder: HolderId,
        /// When the purchase settled
        purchased_at: Timestamp,
        /// Payment that paid for the ticket
        payment_ref: PaymentRef,
    },
}

impl TicketStatus {
    /// Database string for the status discriminant.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved { .. } => "reserved",
            Self::Purchased { .. } => "purchased",
        }
    }
}

/// One ticket number of one competition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Owning competition
    pub competition_id: CompetitionId,
    /// Ticket number
    pub number: TicketNumber,
    /// Current status
    #[serde(flatten)]
    pub status: TicketStatus,
}

impl Ticket {
    /// Whether the ticket is reserved by `holder`, regardless of expiry.
    #[must_use]
    pub fn is_reserved_by(&self, holder: HolderId) -> bool {
        matches!(self.status, TicketStatus::Reserved { holder: h, .. } if h == holder)
    }

    /// Hold deadline, if reserved.
    #[must_use]
    pub const fn reserved_until(&self) -> Option<Timestamp> {
        match &self.status {
            TicketStatus::Reserved { reserved_until, .. } => Some(*reserved_until),
            _ => None,
        }
    }
}

// ============================================================================
// Reservation, cart, entries, settlement
// ============================================================================

/// Successful outcome of a batch reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// Competition reserved in
    pub competition_id: CompetitionId,
    /// Reserved numbers, ascending
    pub numbers: Vec<TicketNumber>,
    /// Hold deadline shared by every number in the batch
    pub expires_at: Timestamp,
}

/// A shopper's hold on some numbers of one competition.
///
/// A view over reserved tickets, never the source of truth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Cart item id
    pub id: CartItemId,
    /// Owning session
    pub holder: HolderId,
    /// Competition of the held numbers
    pub competition_id: CompetitionId,
    /// Held numbers, ascending
    pub numbers: Vec<TicketNumber>,
    /// Minimum `reserved_until` of the held tickets
    pub expires_at: Timestamp,
    /// Creation time
    pub created_at: Timestamp,
}

/// Status of an entry; set by the draw process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Awaiting the draw
    Active,
    /// Winning entry
    Won,
    /// Losing entry
    Lost,
}

impl EntryStatus {
    /// Database string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    /// Parse from the database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }
}

/// Record of purchased tickets in one competition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Entry id
    pub id: EntryId,
    /// Ticket owner
    pub holder: HolderId,
    /// Competition entered
    pub competition_id: CompetitionId,
    /// Purchased numbers, ascending
    pub numbers: Vec<TicketNumber>,
    /// Payment that paid for the entry
    pub payment_ref: PaymentRef,
    /// Draw status
    pub status: EntryStatus,
    /// Creation time
    pub created_at: Timestamp,
}

/// Numbers of one competition in a settlement outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementGroup {
    /// Competition of the numbers
    pub competition_id: CompetitionId,
    /// Numbers, ascending
    pub numbers: Vec<TicketNumber>,
}

/// Outcome of settling a payment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Numbers converted to purchased
    pub purchased: Vec<SettlementGroup>,
    /// Numbers whose hold lapsed before settlement
    pub failed: Vec<SettlementGroup>,
}

impl Settlement {
    /// Build an outcome from flat `(competition, number)` lists, grouping by
    /// competition with numbers ascending.
    #[must_use]
    pub fn from_tickets(
        purchased: impl IntoIterator<Item = (CompetitionId, TicketNumber)>,
        failed: impl IntoIterator<Item = (CompetitionId, TicketNumber)>,
    ) -> Self {
        Self {
            purchased: group(purchased),
            failed: group(failed),
        }
    }

    /// Total purchased tickets.
    #[must_use]
    pub fn purchased_count(&self) -> usize {
        self.purchased.iter().map(|g| g.numbers.len()).sum()
    }

    /// Total failed tickets.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.iter().map(|g| g.numbers.len()).sum()
    }

    /// Whether some tickets settled and some did not.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.purchased.is_empty() && !self.failed.is_empty()
    }
}

fn group(tickets: impl IntoIterator<Item = (CompetitionId, TicketNumber)>) -> Vec<SettlementGroup> {
    let mut grouped: BTreeMap<CompetitionId, BTreeSet<TicketNumber>> = BTreeMap::new();
    for (competition_id, number) in tickets {
        grouped.entry(competition_id).or_default().insert(number);
    }
    grouped
        .into_iter()
        .map(|(competition_id, numbers)| SettlementGroup {
            competition_id,
            numbers: numbers.into_iter().collect(),
        })
        .collect()
}

/// Result of claiming a payment reference for settlement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettlementClaim {
    /// The caller owns the reference and must settle it
    Claimed,
    /// Another call is settling the reference right now
    InFlight {
        /// Holder that claimed the reference
        holder: HolderId,
    },
    /// The reference was settled before
    Completed {
        /// Holder that settled the reference
        holder: HolderId,
        /// Stored outcome
        settlement: Settlement,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn selection_is_sorted() {
        let selection = TicketSelection::new(vec![5, 3, 4], 10).unwrap();
        assert_eq!(
            selection.numbers(),
            &[TicketNumber(3), TicketNumber(4), TicketNumber(5)]
        );
    }

    #[test]
    fn empty_selection_rejected() {
        assert_eq!(
            TicketSelection::new(vec![], 10),
            Err(ReservationError::EmptySelection)
        );
    }

    #[test]
    fn duplicates_reported_once() {
        assert_eq!(
            TicketSelection::new(vec![2, 2, 3, 2, 3], 10),
            Err(ReservationError::DuplicateNumbers { numbers: vec![2, 3] })
        );
    }

    #[test]
    fn zero_and_above_max_are_out_of_range() {
        assert_eq!(
            TicketSelection::new(vec![0, 1, 11], 10),
            Err(ReservationError::InvalidRange {
                numbers: vec![0, 11],
                max_tickets: 10
            })
        );
    }

    #[test]
    fn competition_lifecycle() {
        use CompetitionStatus::{Cancelled, Completed, Draft, Live};
        assert!(Draft.can_transition_to(Live));
        assert!(Live.can_transition_to(Completed));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(Live.can_transition_to(Cancelled));
        assert!(!Live.can_transition_to(Draft));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Live));
        assert!(!Draft.can_transition_to(Completed));
    }

    #[test]
    fn settlement_groups_by_competition() {
        let a = CompetitionId::new();
        let b = CompetitionId::new();
        let settlement = Settlement::from_tickets(
            vec![(a, TicketNumber(2)), (b, TicketNumber(9)), (a, TicketNumber(1))],
            vec![(b, TicketNumber(4))],
        );
        assert_eq!(settlement.purchased_count(), 3);
        assert_eq!(settlement.failed_count(), 1);
        assert!(settlement.is_partial());
        let group_a = settlement
            .purchased
            .iter()
            .find(|g| g.competition_id == a)
            .unwrap();
        assert_eq!(group_a.numbers, vec![TicketNumber(1), TicketNumber(2)]);
    }

    #[test]
    fn settlement_serializes_camel_case() {
        let id = CompetitionId::new();
        let settlement = Settlement::from_tickets(vec![(id, TicketNumber(7))], vec![]);
        let json = serde_json::to_value(&settlement).unwrap();
        assert_eq!(json["purchased"][0]["competitionId"], id.to_string());
        assert_eq!(json["purchased"][0]["numbers"][0], 7);
        assert!(json["failed"].as_array().unwrap().is_empty());
    }

    #[test]
    fn payment_ref_trims_and_rejects_blank() {
        assert_eq!(PaymentRef::parse("  pi_123 ").unwrap().as_str(), "pi_123");
        assert!(PaymentRef::parse("   ").is_err());
        assert!(PaymentRef::parse("x".repeat(256)).is_err());
    }

    #[test]
    fn money_display_in_pounds() {
        assert_eq!(Money::from_pence(1999).to_string(), "£19.99");
        assert_eq!(Money::from_pence(5).to_string(), "£0.05");
    }

    #[test]
    fn money_arithmetic_saturates() {
        let max = Money::from_pence(u64::MAX);
        assert_eq!(max.saturating_add(Money::from_pence(1)), max);
        assert_eq!(Money::from_pence(250).saturating_mul(3), Money::from_pence(750));
        assert_eq!(Money::from_pence(2).saturating_mul(u64::MAX), max);
    }

    proptest! {
        #[test]
        fn valid_selections_are_sorted_unique_and_in_range(
            raw in proptest::collection::btree_set(1u32..=500, 1..50)
        ) {
            let mut numbers: Vec<u32> = raw.iter().copied().collect();
            numbers.reverse();
            let selection = TicketSelection::new(numbers, 500).unwrap();
            let got: Vec<u32> = selection.numbers().iter().map(|n| n.get()).collect();
            let expected: Vec<u32> = raw.into_iter().collect();
            prop_assert_eq!(got, expected);
        }

        #[test]
        fn any_number_above_max_is_rejected(extra in 11u32..10_000) {
            let result = TicketSelection::new(vec![1, extra], 10);
            let is_invalid_range = matches!(result, Err(ReservationError::InvalidRange { .. }));
            prop_assert!(is_invalid_range);
        }
    }
}
