//! Collaborators wired by the server binary.
//!
//! - [`SignedCheckoutGateway`]: opens local checkout orders, verifies the
//!   HMAC-SHA256 signature the hosted checkout returns and records the order
//!   paid once it does
//! - [`ManualPayoutGateway`]: acknowledges payouts that an operator settles by
//!   hand after approval
//! - [`LogNotifier`]: writes notifications to the log

use slotbook_core::gateway::{
    GatewayError, GatewayFuture, Notification, Notifier, OrderStatus, PaymentGateway,
    PaymentOrder, PayoutGateway, PayoutReceipt, PayoutRequest,
};
use slotbook_core::signature::verify_checkout;
use slotbook_core::types::Money;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Checkout gateway backed by a shared signing secret.
///
/// Orders are kept in process memory, so a restart forgets orders that were
/// opened but never confirmed.
#[derive(Clone)]
pub struct SignedCheckoutGateway {
    secret: String,
    orders: Arc<Mutex<HashMap<String, PaymentOrder>>>,
}

impl SignedCheckoutGateway {
    /// Creates a gateway verifying with `secret`
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            orders: Arc::default(),
        }
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared(secret: impl Into<String>) -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new(secret))
    }
}

impl std::fmt::Debug for SignedCheckoutGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedCheckoutGateway").finish_non_exhaustive()
    }
}

impl PaymentGateway for SignedCheckoutGateway {
    fn create_order(&self, amount: Money, currency: String, receipt: String) -> GatewayFuture<'_, PaymentOrder> {
        Box::pin(async move {
            if amount.is_zero() {
                return Err(GatewayError::Rejected {
                    reason: "order amount must be positive".into(),
                });
            }

            let order_ref = format!("order_{:016x}", rand::random::<u64>());
            tracing::info!(order_ref = %order_ref, %amount, %currency, %receipt, "Checkout order opened");

            let order = PaymentOrder {
                order_ref,
                amount,
                currency,
                receipt,
                status: OrderStatus::Created,
            };
            self.orders
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(order.order_ref.clone(), order.clone());
            Ok(order)
        })
    }

    fn verify_signature(
        &self,
        order_ref: String,
        payment_ref: String,
        signature: String,
    ) -> GatewayFuture<'_, bool> {
        Box::pin(async move {
            let valid = verify_checkout(&self.secret, &order_ref, &payment_ref, &signature);
            if valid {
                // A valid signature is the checkout's proof of capture.
                if let Some(order) = self
                    .orders
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_mut(&order_ref)
                {
                    order.status = OrderStatus::Paid;
                }
            }
            Ok(valid)
        })
    }

    fn fetch_order(&self, order_ref: String) -> GatewayFuture<'_, Option<PaymentOrder>> {
        Box::pin(async move {
            Ok(self
                .orders
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&order_ref)
                .cloned())
        })
    }
}

/// Payout gateway for manually settled transfers.
///
/// Returns a receipt keyed by the hold reference, so resubmitting a reference
/// yields the same payout id.
#[derive(Clone, Debug, Default)]
pub struct ManualPayoutGateway;

impl PayoutGateway for ManualPayoutGateway {
    fn submit_payout(&self, request: PayoutRequest) -> GatewayFuture<'_, PayoutReceipt> {
        Box::pin(async move {
            tracing::info!(
                reference = %request.reference,
                upi_id = %request.beneficiary.upi_id,
                amount = %request.amount,
                "Payout queued for manual transfer"
            );
            Ok(PayoutReceipt {
                payout_id: format!("manual:{}", request.reference),
                reference: request.reference,
            })
        })
    }
}

/// Notifier that logs every notification.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) -> GatewayFuture<'_, ()> {
        Box::pin(async move {
            tracing::info!(?notification, "Notification");
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use slotbook_core::ledger::PayoutDetails;
    use slotbook_core::signature::sign_checkout;

    #[tokio::test]
    async fn checkout_signature_is_verified() {
        let gateway = SignedCheckoutGateway::new("secret");
        let order = gateway
            .create_order(Money::from_major(100), "INR".into(), "deposit:u1".into())
            .await
            .unwrap();
        assert!(order.order_ref.starts_with("order_"));

        let good = sign_checkout("secret", &order.order_ref, "pay_1").unwrap();
        assert!(gateway
            .verify_signature(order.order_ref.clone(), "pay_1".into(), good)
            .await
            .unwrap());

        let forged = sign_checkout("other", &order.order_ref, "pay_1").unwrap();
        assert!(!gateway
            .verify_signature(order.order_ref, "pay_1".into(), forged)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn order_is_paid_only_after_a_valid_signature() {
        let gateway = SignedCheckoutGateway::new("secret");
        let order = gateway
            .create_order(Money::from_major(10), "INR".into(), "deposit:u1:1".into())
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Created);

        let forged = sign_checkout("other", &order.order_ref, "pay_1").unwrap();
        gateway
            .verify_signature(order.order_ref.clone(), "pay_1".into(), forged)
            .await
            .unwrap();
        let stored = gateway.fetch_order(order.order_ref.clone()).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Created);

        let good = sign_checkout("secret", &order.order_ref, "pay_1").unwrap();
        gateway
            .verify_signature(order.order_ref.clone(), "pay_1".into(), good)
            .await
            .unwrap();
        let stored = gateway.fetch_order(order.order_ref).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.amount, Money::from_major(10));

        assert_eq!(gateway.fetch_order("order_unknown".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn manual_payouts_are_keyed_by_reference() {
        let request = PayoutRequest {
            reference: "withdraw:u:k".into(),
            beneficiary: PayoutDetails {
                upi_id: "user@upi".into(),
                account_holder: "User".into(),
                bank_name: None,
            },
            amount: Money::from_major(30),
        };
        let first = ManualPayoutGateway.submit_payout(request.clone()).await.unwrap();
        let second = ManualPayoutGateway.submit_payout(request).await.unwrap();
        assert_eq!(first, second);
    }
}
