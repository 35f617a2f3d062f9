//! External collaborators: payment checkout, payouts and notifications.
//!
//! The engine only talks to these traits. Production adapters (Razorpay-style
//! checkout, UPI payouts, email) live outside the core; mocks live in
//! `slotbook-testing`.

use crate::ledger::PayoutDetails;
use crate::types::{BookingId, Money, SlotId, UserId};
use std::future::Future;
use std::pin::Pin;

/// Gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed future returned by gateway methods.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send + 'a>>;

/// Gateway error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Gateway did not answer in time
    Timeout,
    /// Gateway temporarily unavailable
    Unavailable {
        /// Detail
        message: String,
    },
    /// Gateway refused the request
    Rejected {
        /// Refusal reason
        reason: String,
    },
    /// Gateway answered with something unparseable
    InvalidResponse {
        /// Detail
        message: String,
    },
}

impl GatewayError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable { .. })
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Gateway timeout"),
            Self::Unavailable { message } => write!(f, "Gateway unavailable: {message}"),
            Self::Rejected { reason } => write!(f, "Gateway rejected request: {reason}"),
            Self::InvalidResponse { message } => write!(f, "Invalid gateway response: {message}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Settlement state of a checkout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Opened, no payment captured yet
    Created,
    /// Payment captured for the full order amount
    Paid,
}

/// Checkout order opened with the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrder {
    /// Gateway order reference
    pub order_ref: String,
    /// Amount
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Our receipt reference
    pub receipt: String,
    /// Settlement state
    pub status: OrderStatus,
}

/// Payment gateway trait
///
/// Deposits are only credited after [`PaymentGateway::verify_signature`]
/// accepts the checkout and [`PaymentGateway::fetch_order`] reports the order
/// paid. The credited amount is the order's, never the client's.
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout order.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses or cannot be reached
    fn create_order(&self, amount: Money, currency: String, receipt: String) -> GatewayFuture<'_, PaymentOrder>;

    /// Check the signature the client received on checkout success.
    ///
    /// # Errors
    ///
    /// Returns error only if verification could not be performed
    fn verify_signature(
        &self,
        order_ref: String,
        payment_ref: String,
        signature: String,
    ) -> GatewayFuture<'_, bool>;

    /// Look up an order as the gateway records it. `None` for an unknown
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway cannot be reached
    fn fetch_order(&self, order_ref: String) -> GatewayFuture<'_, Option<PaymentOrder>>;
}

/// Payout submitted to the payout provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    /// Hold reference, used by the provider as idempotency key
    pub reference: String,
    /// Beneficiary
    pub beneficiary: PayoutDetails,
    /// Amount
    pub amount: Money,
}

/// Provider acknowledgement of a payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    /// Provider payout id
    pub payout_id: String,
    /// Reference echoed back
    pub reference: String,
}

/// Payout gateway trait
pub trait PayoutGateway: Send + Sync {
    /// Send money to the beneficiary. Submitting the same reference twice must
    /// not pay twice.
    ///
    /// # Errors
    ///
    /// Returns error if the payout fails
    fn submit_payout(&self, request: PayoutRequest) -> GatewayFuture<'_, PayoutReceipt>;
}

/// Something worth telling a user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Booking confirmed
    BookingConfirmed {
        /// Buyer
        user_id: UserId,
        /// Booking
        booking_id: BookingId,
        /// Slot
        slot_id: SlotId,
        /// Amount charged
        amount: Money,
    },
    /// Booking cancelled and refunded
    BookingCancelled {
        /// Buyer
        user_id: UserId,
        /// Booking
        booking_id: BookingId,
        /// Amount refunded
        refunded: Money,
    },
    /// Deposit credited
    DepositCredited {
        /// Wallet owner
        user_id: UserId,
        /// Amount
        amount: Money,
    },
    /// Withdrawal hold placed
    WithdrawalRequested {
        /// Wallet owner
        user_id: UserId,
        /// Hold reference
        reference: String,
        /// Amount
        amount: Money,
    },
    /// Withdrawal paid out
    WithdrawalApproved {
        /// Wallet owner
        user_id: UserId,
        /// Hold reference
        reference: String,
        /// Amount
        amount: Money,
    },
    /// Withdrawal refused, funds released
    WithdrawalRejected {
        /// Wallet owner
        user_id: UserId,
        /// Hold reference
        reference: String,
        /// Amount
        amount: Money,
        /// Admin's reason
        reason: String,
    },
    /// Prize credited
    WinningsCredited {
        /// Wallet owner
        user_id: UserId,
        /// Slot
        slot_id: SlotId,
        /// Amount
        amount: Money,
    },
}

/// Fire-and-forget notifications. Failures are logged by the caller and
/// never roll back state.
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails
    fn notify(&self, notification: Notification) -> GatewayFuture<'_, ()>;
}
