//! Development payment verifiers.
//!
//! A real processor client implements [`PaymentVerifier`] the same way; these
//! two stand in for it where no processor is reachable.

use crate::config::PaymentsMode;
use moby_comps_core::payment::{PaymentStatus, PaymentVerifier, VerifyFuture};
use moby_comps_core::types::{HolderId, Money, PaymentRef};
use std::sync::Arc;

/// Confirms every payment reference.
///
/// # Security Warning
///
/// Anyone can settle their cart for free with this verifier. Never enable it
/// outside development.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllVerifier;

impl PaymentVerifier for AcceptAllVerifier {
    fn verify<'a>(&'a self, payment_ref: &'a PaymentRef, holder: HolderId) -> VerifyFuture<'a> {
        Box::pin(async move {
            tracing::debug!(%payment_ref, %holder, "Accepting payment without verification");
            Ok(PaymentStatus::Confirmed { amount: Money::ZERO })
        })
    }
}

/// Confirms nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAllVerifier;

impl PaymentVerifier for RejectAllVerifier {
    fn verify<'a>(&'a self, _payment_ref: &'a PaymentRef, _holder: HolderId) -> VerifyFuture<'a> {
        Box::pin(async {
            Ok(PaymentStatus::Failed {
                reason: "payments are disabled".to_string(),
            })
        })
    }
}

/// The verifier for a configured mode.
#[must_use]
pub fn verifier_for(mode: PaymentsMode) -> Arc<dyn PaymentVerifier> {
    match mode {
        PaymentsMode::AcceptAll => {
            tracing::warn!("PAYMENTS_MODE=accept-all: every payment reference will be confirmed");
            Arc::new(AcceptAllVerifier)
        }
        PaymentsMode::RejectAll => Arc::new(RejectAllVerifier),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn modes_pick_their_verifier() {
        let payment_ref = PaymentRef::parse("pi_dev").unwrap();
        let holder = HolderId::new();

        let accepted = verifier_for(PaymentsMode::AcceptAll)
            .verify(&payment_ref, holder)
            .await
            .unwrap();
        assert!(matches!(accepted, PaymentStatus::Confirmed { .. }));

        let rejected = verifier_for(PaymentsMode::RejectAll)
            .verify(&payment_ref, holder)
            .await
            .unwrap();
        assert!(matches!(rejected, PaymentStatus::Failed { .. }));
    }
}
