//! # Slotbook Runtime
//!
//! Workflows of the Slotbook reservation engine, composed over the store and
//! gateway traits of `slotbook-core`.
//!
//! ## Core Components
//!
//! - **Reservation Coordinator**: booking and cancellation with compensation
//! - **Wallet Service**: balances, ledger entries, deposits and winnings
//! - **Withdrawal Workflow**: hold, approve with payout, reject with release
//! - **Lifecycle Service / Match Scheduler**: slot status transitions, driven
//!   by admins and by a recurring timer
//! - **Slotbook**: facade exposing every operation
//!
//! ## Example
//!
//! ```ignore
//! use slotbook_runtime::{Slotbook, SlotbookEnvironment, EngineSettings};
//!
//! let env = SlotbookEnvironment::with_store(store, clock, payments, payouts, notifier);
//! let engine = Slotbook::new(env, EngineSettings::default());
//!
//! let booking = engine.create_booking(request).await?;
//! let occupancy = engine.get_slot_occupancy(booking.slot_id).await?;
//! ```

use crate::metrics::LedgerMetrics;
use slotbook_core::SlotbookError;
use slotbook_core::environment::Clock;
use slotbook_core::gateway::{Notification, Notifier, PaymentGateway, PayoutGateway};
use slotbook_core::ledger::{EntryRequest, LedgerEntry};
use slotbook_core::store::{BookingStore, LedgerStore, SlotInventory};
use std::sync::Arc;

/// Production collaborators for the server binary
pub mod adapters;

/// Environment configuration
pub mod config;

/// Booking and cancellation protocol
pub mod coordinator;

/// Facade over every operation
pub mod engine;

/// Admin and time-driven slot transitions
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Recurring match scheduler task
pub mod scheduler;

/// Process signal handling
pub mod shutdown;

/// Balances, ledger entries, deposits and winnings
pub mod wallet;

/// Two-phase withdrawals
pub mod withdrawal;

pub use config::{Config, ConfigError};
pub use coordinator::{ReservationCoordinator, SlotStatistics};
pub use engine::{EngineSettings, Slotbook};
pub use lifecycle::{LifecycleService, TickReport};
pub use scheduler::{MatchScheduler, SchedulerConfig};
pub use wallet::{DepositConfirmation, WalletPolicy, WalletService};
pub use withdrawal::{WithdrawalPolicy, WithdrawalWorkflow};

/// Injected dependencies shared by every workflow.
///
/// Cloning is cheap: every field is an `Arc`.
#[derive(Clone)]
pub struct SlotbookEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Slot inventory
    pub slots: Arc<dyn SlotInventory>,
    /// Wallet ledger
    pub ledger: Arc<dyn LedgerStore>,
    /// Booking records
    pub bookings: Arc<dyn BookingStore>,
    /// Checkout gateway
    pub payments: Arc<dyn PaymentGateway>,
    /// Payout gateway
    pub payouts: Arc<dyn PayoutGateway>,
    /// Notification sender
    pub notifier: Arc<dyn Notifier>,
}

impl SlotbookEnvironment {
    /// Build an environment where one store backs slots, ledger and bookings.
    #[must_use]
    pub fn with_store<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        payments: Arc<dyn PaymentGateway>,
        payouts: Arc<dyn PayoutGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self
    where
        S: SlotInventory + LedgerStore + BookingStore + 'static,
    {
        Self {
            clock,
            slots: store.clone(),
            ledger: store.clone(),
            bookings: store,
            payments,
            payouts,
            notifier,
        }
    }

    /// Append a ledger entry stamped with the current time.
    pub(crate) async fn apply_entry(&self, request: EntryRequest) -> Result<LedgerEntry, SlotbookError> {
        let kind = request.kind;
        let entry = self.ledger.apply_entry(request, self.clock.now()).await?;
        LedgerMetrics::record_entry(kind);
        Ok(entry)
    }

    /// Deliver a notification. Failures are logged and swallowed.
    pub(crate) async fn notify(&self, notification: Notification) {
        if let Err(error) = self.notifier.notify(notification.clone()).await {
            tracing::warn!(%error, ?notification, "Notification delivery failed");
        }
    }
}

impl std::fmt::Debug for SlotbookEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotbookEnvironment").finish_non_exhaustive()
    }
}
