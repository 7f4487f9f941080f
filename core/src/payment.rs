//! Payment verification contract.
//!
//! The payment processor is an external collaborator. Checkout only needs to
//! ask whether a payment reference is confirmed for a given shopper; how the
//! processor is reached (client-secret handshake, webhooks) lives behind this
//! trait.

use crate::types::{HolderId, Money, PaymentRef};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Status of a payment at the processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    /// Funds captured
    Confirmed {
        /// Amount captured
        amount: Money,
    },
    /// Not yet captured
    Pending,
    /// Declined or cancelled
    Failed {
        /// Processor's reason
        reason: String,
    },
}

/// Errors talking to the processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentVerifierError {
    /// The processor did not answer in time.
    #[error("Payment processor timeout")]
    Timeout,
    /// Any other processor failure.
    #[error("Payment processor error: {0}")]
    Other(String),
}

/// Future returned by [`PaymentVerifier::verify`].
pub type VerifyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<PaymentStatus, PaymentVerifierError>> + Send + 'a>>;

/// Looks up a payment at the external processor.
///
/// # Dyn Compatibility
///
/// Returns a boxed future so services can hold `Arc<dyn PaymentVerifier>`.
pub trait PaymentVerifier: Send + Sync {
    /// Verify that `payment_ref` was paid by `holder`.
    ///
    /// A reference paid by a different shopper must not report `Confirmed`.
    fn verify<'a>(&'a self, payment_ref: &'a PaymentRef, holder: HolderId) -> VerifyFuture<'a>;
}
