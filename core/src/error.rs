//! Error taxonomy for the reservation core.
//!
//! [`ReservationError`] is what services return and what the HTTP layer maps to
//! status codes. Contention (`AlreadyHeld`) is a routine outcome, not a fault,
//! and carries the numbers the client has to drop from its selection.

use thiserror::Error;

/// Errors raised by storage implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A persisted row could not be decoded into a domain type.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A row that must exist was missing.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Whether a read hitting this error may be attempted once more.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Errors returned by the reservation, cart and checkout services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// One or more numbers lie outside `[1, max_tickets]`.
    #[error("Ticket numbers {numbers:?} are outside 1..={max_tickets}")]
    InvalidRange {
        /// Offending numbers, ascending
        numbers: Vec<u32>,
        /// Highest valid number
        max_tickets: u32,
    },

    /// The request selected no tickets.
    #[error("No ticket numbers selected")]
    EmptySelection,

    /// The request listed a number more than once.
    #[error("Ticket numbers {numbers:?} were selected more than once")]
    DuplicateNumbers {
        /// Repeated numbers, ascending
        numbers: Vec<u32>,
    },

    /// One or more numbers are reserved or purchased by someone.
    #[error("Ticket numbers {unavailable:?} are not available")]
    AlreadyHeld {
        /// Unavailable numbers, ascending
        unavailable: Vec<u32>,
    },

    /// No competition with that id.
    #[error("Competition {0} not found")]
    CompetitionNotFound(String),

    /// Reservations are only accepted while the competition is live.
    #[error("Competition {id} is {status}, not live")]
    CompetitionNotLive {
        /// Competition id
        id: String,
        /// Current status
        status: String,
    },

    /// The requested lifecycle transition is not allowed.
    #[error("Competition cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// No cart item with that id.
    #[error("Cart item {0} not found")]
    CartItemNotFound(String),

    /// The caller does not hold the resource it tried to act on.
    #[error("Not the holder of this resource")]
    NotHolder,

    /// Settlement was attempted on holds that have all lapsed.
    #[error("Reservation expired before settlement")]
    Expired,

    /// The external processor has not confirmed the payment.
    #[error("Payment {0} is not confirmed")]
    PaymentNotConfirmed(String),

    /// The payment reference is being settled by another request.
    #[error("Payment {0} is already being settled")]
    DuplicateSettlement(String),

    /// The payment reference is blank or too long.
    #[error("Invalid payment reference")]
    InvalidPaymentRef,

    /// A new competition's details were rejected.
    #[error("Invalid competition: {0}")]
    InvalidCompetition(String),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReservationError {
    /// Whether the error is a rejected input, raised before storage is touched.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. }
                | Self::EmptySelection
                | Self::DuplicateNumbers { .. }
                | Self::InvalidPaymentRef
                | Self::InvalidCompetition(_)
        )
    }

    /// Short machine-readable code, used in HTTP bodies and metric labels.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. } => "INVALID_RANGE",
            Self::EmptySelection => "EMPTY_SELECTION",
            Self::DuplicateNumbers { .. } => "DUPLICATE_NUMBERS",
            Self::AlreadyHeld { .. } => "ALREADY_HELD",
            Self::CompetitionNotFound(_) => "COMPETITION_NOT_FOUND",
            Self::CompetitionNotLive { .. } => "COMPETITION_NOT_LIVE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::CartItemNotFound(_) => "CART_ITEM_NOT_FOUND",
            Self::NotHolder => "NOT_HOLDER",
            Self::Expired => "EXPIRED",
            Self::PaymentNotConfirmed(_) => "PAYMENT_NOT_CONFIRMED",
            Self::DuplicateSettlement(_) => "DUPLICATE_SETTLEMENT",
            Self::InvalidPaymentRef => "INVALID_PAYMENT_REF",
            Self::InvalidCompetition(_) => "INVALID_COMPETITION",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_flagged() {
        assert!(ReservationError::EmptySelection.is_validation());
        assert!(!ReservationError::AlreadyHeld { unavailable: vec![2] }.is_validation());
        assert!(!ReservationError::Store(StoreError::Database("down".into())).is_validation());
    }

    #[test]
    fn already_held_message_lists_numbers() {
        let err = ReservationError::AlreadyHeld {
            unavailable: vec![2, 7],
        };
        assert_eq!(err.to_string(), "Ticket numbers [2, 7] are not available");
        assert_eq!(err.code(), "ALREADY_HELD");
    }

    #[test]
    fn only_database_errors_are_transient() {
        assert!(StoreError::Database("timeout".into()).is_transient());
        assert!(!StoreError::Serialization("bad".into()).is_transient());
    }
}
