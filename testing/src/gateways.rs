//! Mock payment, payout and notification collaborators.

use slotbook_core::gateway::{
    GatewayError, GatewayFuture, Notification, Notifier, OrderStatus, PaymentGateway,
    PaymentOrder, PayoutGateway, PayoutReceipt, PayoutRequest,
};
use slotbook_core::signature::{sign_checkout, verify_checkout};
use slotbook_core::types::Money;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Mock checkout gateway that signs and verifies with a shared secret.
///
/// Orders start [`OrderStatus::Created`]; [`MockPaymentGateway::complete_checkout`]
/// plays the customer paying and returns the signature the hosted checkout
/// would hand back.
///
/// # Example
///
/// ```
/// use slotbook_testing::MockPaymentGateway;
///
/// let gateway = MockPaymentGateway::new("test_secret");
/// let signature = gateway.sign("order_1", "pay_1");
/// assert_eq!(signature.len(), 64);
/// ```
#[derive(Debug)]
pub struct MockPaymentGateway {
    secret: String,
    next_order: AtomicU64,
    orders: Mutex<HashMap<String, PaymentOrder>>,
}

impl MockPaymentGateway {
    /// Creates a new mock gateway keyed with `secret`
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            next_order: AtomicU64::new(1),
            orders: Mutex::default(),
        }
    }

    /// Signature a real checkout would hand the client.
    #[must_use]
    pub fn sign(&self, order_ref: &str, payment_ref: &str) -> String {
        sign_checkout(&self.secret, order_ref, payment_ref).unwrap_or_default()
    }

    /// Mark `order_ref` paid and return the checkout signature for
    /// `payment_ref`.
    #[must_use]
    pub fn complete_checkout(&self, order_ref: &str, payment_ref: &str) -> String {
        if let Some(order) = self
            .orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(order_ref)
        {
            order.status = OrderStatus::Paid;
        }
        self.sign(order_ref, payment_ref)
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_order(&self, amount: Money, currency: String, receipt: String) -> GatewayFuture<'_, PaymentOrder> {
        let order_ref = format!("order_{}", self.next_order.fetch_add(1, Ordering::SeqCst));
        Box::pin(async move {
            tracing::debug!(order_ref = %order_ref, amount = amount.minor(), "Mock checkout order created");
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
        Box::pin(async move { Ok(verify_checkout(&self.secret, &order_ref, &payment_ref, &signature)) })
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

#[derive(Debug, Default)]
struct PayoutLedger {
    paid: HashMap<String, PayoutReceipt>,
    requests: Vec<PayoutRequest>,
    rejection: Option<String>,
}

/// Mock payout provider.
///
/// Pays each reference at most once, can fail transiently a set number of
/// times, or refuse everything.
#[derive(Debug, Default)]
pub struct MockPayoutGateway {
    ledger: Mutex<PayoutLedger>,
    transient_failures: AtomicU32,
    attempts: AtomicU32,
}

impl MockPayoutGateway {
    /// Creates a gateway that accepts every payout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Time out on the next `count` submissions.
    pub fn fail_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Refuse every submission with `reason`.
    pub fn reject_all(&self, reason: impl Into<String>) {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rejection = Some(reason.into());
    }

    /// Payouts actually made, one per reference.
    #[must_use]
    pub fn payouts(&self) -> Vec<PayoutRequest> {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .clone()
    }

    /// Submission attempts, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PayoutGateway for MockPayoutGateway {
    fn submit_payout(&self, request: PayoutRequest) -> GatewayFuture<'_, PayoutReceipt> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);

            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(GatewayError::Timeout);
            }

            let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(reason) = &ledger.rejection {
                return Err(GatewayError::Rejected {
                    reason: reason.clone(),
                });
            }
            if let Some(receipt) = ledger.paid.get(&request.reference) {
                return Ok(receipt.clone());
            }

            let receipt = PayoutReceipt {
                payout_id: format!("pout_{}", ledger.paid.len() + 1),
                reference: request.reference.clone(),
            };
            ledger.paid.insert(request.reference.clone(), receipt.clone());
            ledger.requests.push(request);
            Ok(receipt)
        })
    }
}

/// Notifier that records what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: bool,
}

impl RecordingNotifier {
    /// Notifier that records and succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier that always fails delivery
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            failing: true,
        }
    }

    /// Notifications delivered so far
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) -> GatewayFuture<'_, ()> {
        Box::pin(async move {
            if self.failing {
                return Err(GatewayError::Unavailable {
                    message: "notifier offline".into(),
                });
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification);
            Ok(())
        })
    }
}
