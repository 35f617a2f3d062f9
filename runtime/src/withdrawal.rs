//! Two-phase withdrawals.
//!
//! ```text
//! request ─▶ WITHDRAW_HOLD (pending_admin_approval, balance reduced)
//!              │
//!              ├─ approve ─▶ claim (processing) ─▶ payout ─▶ hold approved + WITHDRAW_FINAL
//!              │                                     └─ fails ─▶ back to pending_admin_approval
//!              └─ reject  ─▶ hold rejected + WITHDRAW_RELEASE (balance restored)
//! ```
//!
//! Approval claims the hold before the payout goes out, and rejection only
//! touches a hold that is still pending, so a hold is paid out or released,
//! never both. A claim older than the policy's claim timeout can be taken
//! over by a new approval; the payout gateway is keyed on the hold reference,
//! so the takeover never pays twice.

use crate::SlotbookEnvironment;
use crate::metrics::{LedgerMetrics, WithdrawalMetrics, outcome_label};
use crate::retry::{RetryPolicy, retry_with_predicate};
use chrono::{DateTime, Utc};
use slotbook_core::SlotbookError;
use slotbook_core::gateway::{GatewayError, Notification, PayoutReceipt, PayoutRequest};
use slotbook_core::ledger::{
    EntryKind, EntryRequest, EntryStatus, HoldOutcome, HoldResolution, LedgerEntry, MIN_WITHDRAWAL,
    PayoutDetails, ensure_resolvable,
};
use slotbook_core::types::{AdminId, Money, Page, Paginated, UserId};
use std::time::Duration;

/// Withdrawal limits and payout retries.
#[derive(Clone, Debug)]
pub struct WithdrawalPolicy {
    /// Smallest withdrawal accepted
    pub min_withdrawal: Money,
    /// Retry policy for payout submission
    pub payout_retry: RetryPolicy,
    /// How long an approval's claim protects a hold before another approval
    /// may take it over
    pub claim_timeout: Duration,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            min_withdrawal: MIN_WITHDRAWAL,
            payout_retry: RetryPolicy::builder().jitter(true).build(),
            claim_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// Withdrawal request, hold resolution and the admin queue.
#[derive(Clone, Debug)]
pub struct WithdrawalWorkflow {
    env: SlotbookEnvironment,
    policy: WithdrawalPolicy,
}

impl WithdrawalWorkflow {
    /// Create the workflow.
    #[must_use]
    pub const fn new(env: SlotbookEnvironment, policy: WithdrawalPolicy) -> Self {
        Self { env, policy }
    }

    /// Hold `amount` for payout to `details`, pending admin approval.
    ///
    /// Idempotent per user and key: the reference is `withdraw:<user>:<key>`.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::InvalidInput`] below the minimum, for a blank key, or
    ///   without UPI id and account holder
    /// - [`SlotbookError::InsufficientFunds`] when the balance is short; no
    ///   hold is created
    #[tracing::instrument(skip(self, details))]
    pub async fn request_withdrawal(
        &self,
        user_id: UserId,
        amount: Money,
        details: PayoutDetails,
        idempotency_key: &str,
    ) -> Result<LedgerEntry, SlotbookError> {
        let result = self.hold(user_id, amount, details, idempotency_key).await;
        WithdrawalMetrics::record("requested", outcome_label(&result));

        match &result {
            Ok(hold) => {
                tracing::info!(reference = %hold.reference, balance_after = %hold.balance_after, "Withdrawal hold placed");
                self.env
                    .notify(Notification::WithdrawalRequested {
                        user_id,
                        reference: hold.reference.clone(),
                        amount: hold.amount,
                    })
                    .await;
            }
            Err(error) => tracing::warn!(%error, "Withdrawal request rejected"),
        }
        result
    }

    async fn hold(
        &self,
        user_id: UserId,
        amount: Money,
        details: PayoutDetails,
        idempotency_key: &str,
    ) -> Result<LedgerEntry, SlotbookError> {
        if amount < self.policy.min_withdrawal {
            return Err(SlotbookError::InvalidInput(format!(
                "minimum withdrawal is {}",
                self.policy.min_withdrawal
            )));
        }
        let key = idempotency_key.trim();
        if key.is_empty() {
            return Err(SlotbookError::InvalidInput(
                "idempotency key is required".into(),
            ));
        }
        let details = details.validated()?;

        let request = EntryRequest::new(
            user_id,
            EntryKind::WithdrawHold,
            amount,
            format!("withdraw:{user_id}:{key}"),
        )
        .with_description("Withdrawal request")
        .with_metadata(serde_json::json!({ "payout": details }));
        self.env.apply_entry(request).await
    }

    /// Claim a pending hold, pay it out and mark it approved.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::EntryNotFound`] for an unknown reference
    /// - [`SlotbookError::AlreadyResolved`] unless the hold is pending (or
    ///   processing under an expired claim)
    /// - [`SlotbookError::Upstream`] if the payout fails; the hold goes back
    ///   to pending
    #[tracing::instrument(skip(self, note))]
    pub async fn approve_withdrawal(
        &self,
        reference: &str,
        admin: AdminId,
        note: Option<String>,
    ) -> Result<HoldOutcome, SlotbookError> {
        let result = self.approve(reference, admin, note).await;
        WithdrawalMetrics::record("approved", outcome_label(&result));

        match &result {
            Ok(outcome) => {
                tracing::info!(amount = %outcome.hold.amount, "Withdrawal approved");
                self.env
                    .notify(Notification::WithdrawalApproved {
                        user_id: outcome.hold.user_id,
                        reference: outcome.hold.reference.clone(),
                        amount: outcome.hold.amount,
                    })
                    .await;
            }
            Err(error) => tracing::warn!(%error, "Withdrawal approval failed"),
        }
        result
    }

    async fn approve(
        &self,
        reference: &str,
        admin: AdminId,
        note: Option<String>,
    ) -> Result<HoldOutcome, SlotbookError> {
        let now = self.env.clock.now();
        let stale_before = chrono::Duration::from_std(self.policy.claim_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let hold = self
            .env
            .ledger
            .claim_hold(reference.to_string(), admin, now, stale_before)
            .await?;
        WithdrawalMetrics::record("claimed", "ok");

        let receipt = match self.pay_out(&hold).await {
            Ok(receipt) => receipt,
            Err(error) => {
                self.release_claim(reference).await;
                return Err(error);
            }
        };
        tracing::info!(payout_id = %receipt.payout_id, "Payout submitted");

        let follow_up = EntryRequest::new(
            hold.user_id,
            EntryKind::WithdrawFinal,
            hold.amount,
            format!("{reference}:final"),
        )
        .with_description("Withdrawal paid out")
        .with_metadata(serde_json::json!({ "payout_id": receipt.payout_id }));

        self.resolve(HoldResolution {
            reference: reference.to_string(),
            target: EntryStatus::Approved,
            admin,
            note,
            follow_up,
        })
        .await
    }

    async fn pay_out(&self, hold: &LedgerEntry) -> Result<PayoutReceipt, SlotbookError> {
        let beneficiary: PayoutDetails = serde_json::from_value(hold.metadata["payout"].clone())
            .map_err(|e| {
                SlotbookError::storage(format!("hold {} has no payout details: {e}", hold.reference))
            })?;

        let payout = PayoutRequest {
            reference: hold.reference.clone(),
            beneficiary,
            amount: hold.amount,
        };
        retry_with_predicate(
            self.policy.payout_retry.clone(),
            || self.env.payouts.submit_payout(payout.clone()),
            GatewayError::is_transient,
        )
        .await
        .map_err(|e| SlotbookError::Upstream(e.to_string()))
    }

    /// Put a claimed hold back in the queue. A failure here leaves the claim
    /// to expire after the claim timeout.
    async fn release_claim(&self, reference: &str) {
        match self
            .env
            .ledger
            .release_claim(reference.to_string(), self.env.clock.now())
            .await
        {
            Ok(_) => WithdrawalMetrics::record("released", "ok"),
            Err(error) => {
                WithdrawalMetrics::record("released", "error");
                tracing::error!(%error, reference, "Failed to release hold claim");
            }
        }
    }

    /// Refuse a pending hold and give the money back.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::InvalidInput`] without a reason
    /// - [`SlotbookError::EntryNotFound`] for an unknown reference
    /// - [`SlotbookError::AlreadyResolved`] unless the hold is pending; a
    ///   hold whose payout is in flight cannot be rejected
    #[tracing::instrument(skip(self))]
    pub async fn reject_withdrawal(
        &self,
        reference: &str,
        admin: AdminId,
        reason: &str,
    ) -> Result<HoldOutcome, SlotbookError> {
        let result = self.reject(reference, admin, reason).await;
        WithdrawalMetrics::record("rejected", outcome_label(&result));

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    amount = %outcome.hold.amount,
                    balance_after = %outcome.follow_up.balance_after,
                    "Withdrawal rejected, funds released"
                );
                self.env
                    .notify(Notification::WithdrawalRejected {
                        user_id: outcome.hold.user_id,
                        reference: outcome.hold.reference.clone(),
                        amount: outcome.hold.amount,
                        reason: reason.trim().to_string(),
                    })
                    .await;
            }
            Err(error) => tracing::warn!(%error, "Withdrawal rejection failed"),
        }
        result
    }

    async fn reject(&self, reference: &str, admin: AdminId, reason: &str) -> Result<HoldOutcome, SlotbookError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SlotbookError::InvalidInput(
                "a rejection reason is required".into(),
            ));
        }
        let hold = self.pending_hold(reference, EntryStatus::Rejected).await?;

        let follow_up = EntryRequest::new(
            hold.user_id,
            EntryKind::WithdrawRelease,
            hold.amount,
            format!("{reference}:release"),
        )
        .with_description("Withdrawal rejected")
        .with_metadata(serde_json::json!({ "reason": reason }));

        self.resolve(HoldResolution {
            reference: reference.to_string(),
            target: EntryStatus::Rejected,
            admin,
            note: Some(reason.to_string()),
            follow_up,
        })
        .await
    }

    async fn pending_hold(&self, reference: &str, target: EntryStatus) -> Result<LedgerEntry, SlotbookError> {
        let hold = self
            .env
            .ledger
            .find_entry(reference.to_string())
            .await?
            .ok_or_else(|| SlotbookError::EntryNotFound(reference.to_string()))?;
        ensure_resolvable(&hold, target)?;
        Ok(hold)
    }

    async fn resolve(&self, resolution: HoldResolution) -> Result<HoldOutcome, SlotbookError> {
        let kind = resolution.follow_up.kind;
        let outcome = self
            .env
            .ledger
            .resolve_hold(resolution, self.env.clock.now())
            .await?;
        LedgerMetrics::record_entry(kind);
        Ok(outcome)
    }

    /// Holds awaiting a decision, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn list_pending(&self, page: Page) -> Result<Paginated<LedgerEntry>, SlotbookError> {
        self.env.ledger.list_pending_holds(page).await
    }
}
