//! The [`Slotbook`] facade: every exposed operation behind one handle.

use crate::SlotbookEnvironment;
use crate::config::Config;
use crate::coordinator::{ReservationCoordinator, SlotStatistics};
use crate::lifecycle::LifecycleService;
use crate::retry::RetryPolicy;
use crate::scheduler::{MatchScheduler, SchedulerConfig};
use crate::wallet::{DepositConfirmation, WalletPolicy, WalletService};
use crate::withdrawal::{WithdrawalPolicy, WithdrawalWorkflow};
use slotbook_core::SlotbookError;
use slotbook_core::booking::{Booking, BookingRequest, BookingStatus};
use slotbook_core::gateway::PaymentOrder;
use slotbook_core::ledger::{EntryRequest, HoldOutcome, LedgerEntry, PayoutDetails};
use slotbook_core::lifecycle::LifecycleWindows;
use slotbook_core::slot::{NewSlot, Slot, SlotOccupancy, SlotStatus};
use slotbook_core::types::{AdminId, BookingId, Money, Page, Paginated, SlotId, UserId};
use std::sync::Arc;

/// Policies for every workflow.
#[derive(Clone, Debug, Default)]
pub struct EngineSettings {
    /// Deposits
    pub wallet: WalletPolicy,
    /// Withdrawals
    pub withdrawals: WithdrawalPolicy,
    /// Automatic transition windows
    pub windows: LifecycleWindows,
}

impl EngineSettings {
    /// Settings from loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            wallet: WalletPolicy {
                min_deposit: config.wallet.min_deposit(),
                currency: config.wallet.currency.clone(),
            },
            withdrawals: WithdrawalPolicy {
                min_withdrawal: config.wallet.min_withdrawal(),
                payout_retry: RetryPolicy::builder()
                    .max_retries(config.payouts.max_retries)
                    .jitter(true)
                    .build(),
                claim_timeout: config.payouts.claim_timeout(),
            },
            windows: config.scheduler.windows(),
        }
    }
}

/// Slot reservation and wallet ledger engine.
#[derive(Clone, Debug)]
pub struct Slotbook {
    env: SlotbookEnvironment,
    coordinator: ReservationCoordinator,
    wallet: WalletService,
    withdrawals: WithdrawalWorkflow,
    lifecycle: Arc<LifecycleService>,
}

impl Slotbook {
    /// Wire every workflow over `env`.
    #[must_use]
    pub fn new(env: SlotbookEnvironment, settings: EngineSettings) -> Self {
        Self {
            coordinator: ReservationCoordinator::new(env.clone()),
            wallet: WalletService::new(env.clone(), settings.wallet),
            withdrawals: WithdrawalWorkflow::new(env.clone(), settings.withdrawals),
            lifecycle: Arc::new(LifecycleService::new(env.clone(), settings.windows)),
            env,
        }
    }

    /// A stopped scheduler driving this engine's slots.
    #[must_use]
    pub fn scheduler(&self, config: SchedulerConfig) -> MatchScheduler {
        MatchScheduler::new(Arc::clone(&self.lifecycle), Arc::clone(&self.env.clock), config)
    }

    // ========================================================================
    // Bookings
    // ========================================================================

    /// See [`ReservationCoordinator::create_booking`].
    ///
    /// # Errors
    ///
    /// Validation, conflict, state and insufficient-funds errors of the
    /// booking protocol.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, SlotbookError> {
        self.coordinator.create_booking(request).await
    }

    /// See [`ReservationCoordinator::cancel_booking`].
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::BookingNotFound`] or
    /// [`SlotbookError::BookingNotActive`].
    pub async fn cancel_booking(&self, booking_id: BookingId) -> Result<Booking, SlotbookError> {
        self.coordinator.cancel_booking(booking_id).await
    }

    /// Capacity view of a slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] for an unknown slot.
    pub async fn get_slot_occupancy(&self, slot_id: SlotId) -> Result<SlotOccupancy, SlotbookError> {
        self.coordinator.get_slot_occupancy(slot_id).await
    }

    /// Bookings of a slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn slot_bookings(
        &self,
        slot_id: SlotId,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, SlotbookError> {
        self.coordinator.slot_bookings(slot_id, status).await
    }

    /// A user's bookings, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn user_bookings(&self, user_id: UserId, page: Page) -> Result<Paginated<Booking>, SlotbookError> {
        self.coordinator.user_bookings(user_id, page).await
    }

    // ========================================================================
    // Slots
    // ========================================================================

    /// Create an upcoming slot.
    ///
    /// # Errors
    ///
    /// Validation errors from [`NewSlot::into_slot`].
    pub async fn create_slot(&self, new_slot: NewSlot) -> Result<Slot, SlotbookError> {
        self.coordinator.create_slot(new_slot).await
    }

    /// Slots by start time.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn list_slots(&self, status: Option<SlotStatus>) -> Result<Vec<Slot>, SlotbookError> {
        self.coordinator.list_slots(status).await
    }

    /// Booking figures for a slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] for an unknown slot.
    pub async fn slot_statistics(&self, slot_id: SlotId) -> Result<SlotStatistics, SlotbookError> {
        self.coordinator.slot_statistics(slot_id).await
    }

    /// See [`LifecycleService::transition_match_status`].
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::InvalidTransition`] or
    /// [`SlotbookError::ConcurrentModification`].
    pub async fn transition_match_status(
        &self,
        slot_id: SlotId,
        target: SlotStatus,
    ) -> Result<Slot, SlotbookError> {
        self.lifecycle.transition_match_status(slot_id, target).await
    }

    /// See [`LifecycleService::remove_slot`].
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] for an unknown slot, or the
    /// first error of the cancellation cascade.
    pub async fn remove_slot(&self, slot_id: SlotId) -> Result<Slot, SlotbookError> {
        self.lifecycle.remove_slot(slot_id).await
    }

    /// See [`LifecycleService::cleanup_orphaned_bookings`].
    ///
    /// # Errors
    ///
    /// Returns the first cancellation error.
    pub async fn cleanup_orphaned_bookings(&self) -> Result<usize, SlotbookError> {
        self.lifecycle.cleanup_orphaned_bookings().await
    }

    // ========================================================================
    // Wallet
    // ========================================================================

    /// Create a wallet if missing.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn open_wallet(&self, user_id: UserId) -> Result<Money, SlotbookError> {
        self.wallet.open_wallet(user_id).await
    }

    /// Current balance.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::UserNotFound`] without a wallet.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Money, SlotbookError> {
        self.wallet.balance(user_id).await
    }

    /// Statement page, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::UserNotFound`] without a wallet.
    pub async fn list_transactions(
        &self,
        user_id: UserId,
        page: Page,
    ) -> Result<Paginated<LedgerEntry>, SlotbookError> {
        self.wallet.list_transactions(user_id, page).await
    }

    /// See [`WalletService::apply_ledger_entry`].
    ///
    /// # Errors
    ///
    /// Ledger errors and [`SlotbookError::InvalidInput`] for withdrawal kinds.
    pub async fn apply_ledger_entry(&self, request: EntryRequest) -> Result<LedgerEntry, SlotbookError> {
        self.wallet.apply_ledger_entry(request).await
    }

    /// Open a deposit checkout.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::InvalidInput`] or [`SlotbookError::Upstream`].
    pub async fn create_deposit_order(&self, user_id: UserId, amount: Money) -> Result<PaymentOrder, SlotbookError> {
        self.wallet.create_deposit_order(user_id, amount).await
    }

    /// Credit a verified deposit.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::InvalidInput`] for a bad signature.
    pub async fn confirm_deposit(&self, confirmation: DepositConfirmation) -> Result<LedgerEntry, SlotbookError> {
        self.wallet.confirm_deposit(confirmation).await
    }

    /// Credit winnings for a completed slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotCompleted`] unless the slot is completed.
    pub async fn award_winnings(
        &self,
        slot_id: SlotId,
        user_id: UserId,
        amount: Money,
    ) -> Result<LedgerEntry, SlotbookError> {
        self.wallet.award_winnings(slot_id, user_id, amount).await
    }

    // ========================================================================
    // Withdrawals
    // ========================================================================

    /// See [`WithdrawalWorkflow::request_withdrawal`].
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::InsufficientFunds`] or a validation error.
    pub async fn request_withdrawal(
        &self,
        user_id: UserId,
        amount: Money,
        details: PayoutDetails,
        idempotency_key: &str,
    ) -> Result<LedgerEntry, SlotbookError> {
        self.withdrawals
            .request_withdrawal(user_id, amount, details, idempotency_key)
            .await
    }

    /// See [`WithdrawalWorkflow::approve_withdrawal`].
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::AlreadyResolved`] or [`SlotbookError::Upstream`].
    pub async fn approve_withdrawal(
        &self,
        reference: &str,
        admin: AdminId,
        note: Option<String>,
    ) -> Result<HoldOutcome, SlotbookError> {
        self.withdrawals.approve_withdrawal(reference, admin, note).await
    }

    /// See [`WithdrawalWorkflow::reject_withdrawal`].
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::AlreadyResolved`] or a validation error.
    pub async fn reject_withdrawal(
        &self,
        reference: &str,
        admin: AdminId,
        reason: &str,
    ) -> Result<HoldOutcome, SlotbookError> {
        self.withdrawals.reject_withdrawal(reference, admin, reason).await
    }

    /// Holds awaiting a decision, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn pending_withdrawals(&self, page: Page) -> Result<Paginated<LedgerEntry>, SlotbookError> {
        self.withdrawals.list_pending(page).await
    }
}
