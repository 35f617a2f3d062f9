//! Wallet service: balances, statements, direct ledger entries, checkout
//! deposits and winnings.

use crate::SlotbookEnvironment;
use slotbook_core::SlotbookError;
use slotbook_core::gateway::{Notification, OrderStatus, PaymentOrder};
use slotbook_core::ledger::{EntryKind, EntryRequest, LedgerEntry, MIN_DEPOSIT};
use slotbook_core::slot::SlotStatus;
use slotbook_core::types::{Money, Page, Paginated, SlotId, UserId};

/// Deposit limits and checkout currency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletPolicy {
    /// Smallest deposit accepted
    pub min_deposit: Money,
    /// ISO currency code for checkout orders
    pub currency: String,
}

impl Default for WalletPolicy {
    fn default() -> Self {
        Self {
            min_deposit: MIN_DEPOSIT,
            currency: "INR".to_string(),
        }
    }
}

/// Confirmation the client received from the hosted checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositConfirmation {
    /// Wallet owner
    pub user_id: UserId,
    /// Order opened by [`WalletService::create_deposit_order`]
    pub order_ref: String,
    /// Gateway payment reference
    pub payment_ref: String,
    /// Checkout signature
    pub signature: String,
    /// Amount the client believes it paid; must equal the order amount
    pub amount: Money,
}

/// Wallet operations.
#[derive(Clone, Debug)]
pub struct WalletService {
    env: SlotbookEnvironment,
    policy: WalletPolicy,
}

impl WalletService {
    /// Create a wallet service.
    #[must_use]
    pub const fn new(env: SlotbookEnvironment, policy: WalletPolicy) -> Self {
        Self { env, policy }
    }

    /// Create the user's wallet if missing. Returns the balance.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn open_wallet(&self, user_id: UserId) -> Result<Money, SlotbookError> {
        self.env.ledger.open_wallet(user_id, self.env.clock.now()).await
    }

    /// Current balance.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::UserNotFound`] without a wallet.
    pub async fn balance(&self, user_id: UserId) -> Result<Money, SlotbookError> {
        self.env.ledger.balance(user_id).await
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
        self.env.ledger.list_entries(user_id, page).await
    }

    /// Apply a settled ledger entry directly (admin adjustments, bookkeeping
    /// from trusted callers).
    ///
    /// Withdrawal kinds are refused: they only move through the withdrawal
    /// workflow.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::InvalidInput`] for a withdrawal kind or blank reference
    /// - ledger errors from [`slotbook_core::store::LedgerStore::apply_entry`]
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, kind = %request.kind, reference = %request.reference))]
    pub async fn apply_ledger_entry(&self, request: EntryRequest) -> Result<LedgerEntry, SlotbookError> {
        if matches!(
            request.kind,
            EntryKind::WithdrawHold | EntryKind::WithdrawFinal | EntryKind::WithdrawRelease
        ) {
            return Err(SlotbookError::InvalidInput(format!(
                "{} entries are managed by the withdrawal workflow",
                request.kind
            )));
        }
        if request.reference.trim().is_empty() {
            return Err(SlotbookError::InvalidInput("reference is required".into()));
        }

        let entry = self.env.apply_entry(request).await?;
        tracing::info!(amount = %entry.amount, balance_after = %entry.balance_after, "Ledger entry applied");
        Ok(entry)
    }

    /// Open a checkout order for a deposit.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::InvalidInput`] below the minimum deposit
    /// - [`SlotbookError::Upstream`] if the gateway fails
    #[tracing::instrument(skip(self))]
    pub async fn create_deposit_order(&self, user_id: UserId, amount: Money) -> Result<PaymentOrder, SlotbookError> {
        if amount < self.policy.min_deposit {
            return Err(SlotbookError::InvalidInput(format!(
                "minimum deposit is {}",
                self.policy.min_deposit
            )));
        }

        let receipt = format!("deposit:{user_id}:{}", self.env.clock.now().timestamp_millis());
        self.env
            .payments
            .create_order(amount, self.policy.currency.clone(), receipt)
            .await
            .map_err(|e| SlotbookError::Upstream(e.to_string()))
    }

    /// Credit a deposit once its checkout signature checks out and the
    /// gateway reports the order paid.
    ///
    /// The credited amount is the order's. Idempotent per payment reference.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::InvalidInput`] for a bad signature, an unknown or
    ///   unpaid order, an order opened for another wallet, an amount that
    ///   differs from the order, or an amount below the minimum
    /// - [`SlotbookError::Upstream`] if the gateway cannot be reached
    #[tracing::instrument(skip(self, confirmation), fields(user_id = %confirmation.user_id, payment_ref = %confirmation.payment_ref))]
    pub async fn confirm_deposit(&self, confirmation: DepositConfirmation) -> Result<LedgerEntry, SlotbookError> {
        let verified = self
            .env
            .payments
            .verify_signature(
                confirmation.order_ref.clone(),
                confirmation.payment_ref.clone(),
                confirmation.signature.clone(),
            )
            .await
            .map_err(|e| SlotbookError::Upstream(e.to_string()))?;
        if !verified {
            tracing::warn!("Checkout signature rejected");
            return Err(SlotbookError::InvalidInput(
                "payment signature verification failed".into(),
            ));
        }

        let order = self
            .env
            .payments
            .fetch_order(confirmation.order_ref.clone())
            .await
            .map_err(|e| SlotbookError::Upstream(e.to_string()))?
            .ok_or_else(|| {
                SlotbookError::InvalidInput(format!("unknown checkout order {}", confirmation.order_ref))
            })?;
        let amount = self.settled_amount(&confirmation, &order)?;

        let request = EntryRequest::new(
            confirmation.user_id,
            EntryKind::Credit,
            amount,
            format!("deposit:{}", confirmation.payment_ref),
        )
        .with_description("Wallet deposit")
        .with_metadata(serde_json::json!({
            "order_ref": confirmation.order_ref,
            "payment_ref": confirmation.payment_ref,
        }));
        let entry = self.env.apply_entry(request).await?;

        tracing::info!(amount = %entry.amount, "Deposit credited");
        self.env
            .notify(Notification::DepositCredited {
                user_id: entry.user_id,
                amount: entry.amount,
            })
            .await;
        Ok(entry)
    }

    /// Check a confirmation against the order the gateway holds and return
    /// the amount to credit.
    fn settled_amount(&self, confirmation: &DepositConfirmation, order: &PaymentOrder) -> Result<Money, SlotbookError> {
        let owner_prefix = format!("deposit:{}:", confirmation.user_id);
        if !order.receipt.starts_with(&owner_prefix) {
            tracing::warn!(order_ref = %order.order_ref, "Checkout order belongs to another wallet");
            return Err(SlotbookError::InvalidInput(format!(
                "order {} was not opened for this wallet",
                order.order_ref
            )));
        }
        if order.status != OrderStatus::Paid {
            tracing::warn!(order_ref = %order.order_ref, status = ?order.status, "Checkout order not paid");
            return Err(SlotbookError::InvalidInput(format!(
                "order {} is not paid",
                order.order_ref
            )));
        }
        if confirmation.amount != order.amount {
            tracing::warn!(
                order_ref = %order.order_ref,
                claimed = %confirmation.amount,
                ordered = %order.amount,
                "Deposit amount does not match the order"
            );
            return Err(SlotbookError::InvalidInput(format!(
                "amount {} does not match order amount {}",
                confirmation.amount, order.amount
            )));
        }
        if order.amount < self.policy.min_deposit {
            return Err(SlotbookError::InvalidInput(format!(
                "minimum deposit is {}",
                self.policy.min_deposit
            )));
        }
        Ok(order.amount)
    }

    /// Credit prize money for a completed match. One award per user and slot.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::SlotNotCompleted`] unless the slot is completed
    /// - [`SlotbookError::InvalidInput`] for a zero amount
    #[tracing::instrument(skip(self))]
    pub async fn award_winnings(
        &self,
        slot_id: SlotId,
        user_id: UserId,
        amount: Money,
    ) -> Result<LedgerEntry, SlotbookError> {
        let slot = self.env.slots.load_slot(slot_id).await?;
        if slot.status != SlotStatus::Completed {
            return Err(SlotbookError::SlotNotCompleted {
                slot_id,
                status: slot.status,
            });
        }

        let request = EntryRequest::new(user_id, EntryKind::Win, amount, format!("win:{slot_id}:{user_id}"))
            .with_description(format!("Winnings for {}", slot.title))
            .with_metadata(serde_json::json!({ "slot_id": slot_id.to_string() }));
        let entry = self.env.apply_entry(request).await?;

        tracing::info!(amount = %entry.amount, "Winnings credited");
        self.env
            .notify(Notification::WinningsCredited {
                user_id,
                slot_id,
                amount: entry.amount,
            })
            .await;
        Ok(entry)
    }
}
