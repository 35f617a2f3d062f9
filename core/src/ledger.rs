//! Wallet ledger: immutable entries that explain every balance change.
//!
//! A wallet balance only moves through [`EntryKind::apply`]. Both store
//! backends call it inside their per-wallet critical section, so the
//! non-negative check and the `balance_after` snapshot are computed the same
//! way everywhere.

use crate::error::SlotbookError;
use crate::types::{AdminId, EntryId, Money, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum deposit (₹10).
pub const MIN_DEPOSIT: Money = Money::from_major(10);

/// Minimum withdrawal (₹10).
pub const MIN_WITHDRAWAL: Money = Money::from_major(10);

/// Direction in which an entry moves the balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceEffect {
    /// Adds the amount
    Increase,
    /// Subtracts the amount; rejected if the balance is too low
    Decrease,
    /// Audit marker only
    None,
}

/// Kind of ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Deposit
    Credit,
    /// Booking charge
    Debit,
    /// Prize payout
    Win,
    /// Manual loss adjustment
    Loss,
    /// Booking refund
    Refund,
    /// Funds reserved for a pending withdrawal
    WithdrawHold,
    /// Withdrawal paid out; the hold already moved the balance
    WithdrawFinal,
    /// Rejected withdrawal, funds returned
    WithdrawRelease,
}

impl EntryKind {
    /// Balance effect of this kind.
    #[must_use]
    pub const fn effect(&self) -> BalanceEffect {
        match self {
            Self::Credit | Self::Win | Self::Refund | Self::WithdrawRelease => {
                BalanceEffect::Increase
            }
            Self::Debit | Self::Loss | Self::WithdrawHold => BalanceEffect::Decrease,
            Self::WithdrawFinal => BalanceEffect::None,
        }
    }

    /// Apply an entry of this kind to `balance`.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::InvalidInput`] for a zero amount or on overflow
    /// - [`SlotbookError::InsufficientFunds`] when a decrease exceeds the balance
    pub fn apply(&self, balance: Money, amount: Money) -> Result<Money, SlotbookError> {
        if amount.is_zero() {
            return Err(SlotbookError::InvalidInput(
                "ledger entry amount must be positive".into(),
            ));
        }

        match self.effect() {
            BalanceEffect::Increase => balance
                .checked_add(amount)
                .ok_or_else(|| SlotbookError::InvalidInput("wallet balance overflow".into())),
            BalanceEffect::Decrease => {
                balance
                    .checked_sub(amount)
                    .ok_or(SlotbookError::InsufficientFunds {
                        available: balance,
                        requested: amount,
                    })
            }
            BalanceEffect::None => Ok(balance),
        }
    }

    /// Convert kind to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
            Self::Win => "WIN",
            Self::Loss => "LOSS",
            Self::Refund => "REFUND",
            Self::WithdrawHold => "WITHDRAW_HOLD",
            Self::WithdrawFinal => "WITHDRAW_FINAL",
            Self::WithdrawRelease => "WITHDRAW_RELEASE",
        }
    }

    /// Parse kind from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known kind.
    pub fn parse(s: &str) -> Result<Self, SlotbookError> {
        match s {
            "CREDIT" => Ok(Self::Credit),
            "DEBIT" => Ok(Self::Debit),
            "WIN" => Ok(Self::Win),
            "LOSS" => Ok(Self::Loss),
            "REFUND" => Ok(Self::Refund),
            "WITHDRAW_HOLD" => Ok(Self::WithdrawHold),
            "WITHDRAW_FINAL" => Ok(Self::WithdrawFinal),
            "WITHDRAW_RELEASE" => Ok(Self::WithdrawRelease),
            _ => Err(SlotbookError::storage(format!("invalid entry kind: {s}"))),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Awaiting an external confirmation
    Pending,
    /// Settled
    Success,
    /// Failed
    Failed,
    /// Withdrawal hold awaiting an admin
    PendingAdminApproval,
    /// Withdrawal hold claimed by an approval whose payout is in flight
    Processing,
    /// Withdrawal hold approved and paid out
    Approved,
    /// Withdrawal hold rejected, funds released
    Rejected,
}

impl EntryStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::PendingAdminApproval => "pending_admin_approval",
            Self::Processing => "processing",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, SlotbookError> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "pending_admin_approval" => Ok(Self::PendingAdminApproval),
            "processing" => Ok(Self::Processing),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(SlotbookError::storage(format!("invalid entry status: {s}"))),
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable ledger record.
///
/// Only `status`, `resolved_by`, `resolution_note` and `updated_at` of a
/// withdrawal hold ever change, and only once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id
    pub id: EntryId,
    /// Wallet owner
    pub user_id: UserId,
    /// Per-user creation order, starting at 1
    pub sequence: i64,
    /// Kind
    pub kind: EntryKind,
    /// Amount, always positive
    pub amount: Money,
    /// Balance right after this entry was applied
    pub balance_after: Money,
    /// Globally unique idempotency reference
    pub reference: String,
    /// Status
    pub status: EntryStatus,
    /// Human readable description
    pub description: String,
    /// Free-form context (slot, booking, payout details)
    pub metadata: serde_json::Value,
    /// Admin who resolved a hold
    pub resolved_by: Option<AdminId>,
    /// Approval note or rejection reason
    pub resolution_note: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// Request to append one ledger entry.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryRequest {
    /// Wallet owner
    pub user_id: UserId,
    /// Kind
    pub kind: EntryKind,
    /// Amount
    pub amount: Money,
    /// Idempotency reference
    pub reference: String,
    /// Initial status
    pub status: EntryStatus,
    /// Description
    pub description: String,
    /// Metadata
    pub metadata: serde_json::Value,
}

impl EntryRequest {
    /// A settled entry. Withdrawal holds start pending admin approval.
    #[must_use]
    pub fn new(user_id: UserId, kind: EntryKind, amount: Money, reference: impl Into<String>) -> Self {
        let status = if kind == EntryKind::WithdrawHold {
            EntryStatus::PendingAdminApproval
        } else {
            EntryStatus::Success
        };

        Self {
            user_id,
            kind,
            amount,
            reference: reference.into(),
            status,
            description: String::new(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// `true` when `entry` is a replay of this request.
    #[must_use]
    pub fn is_replay_of(&self, entry: &LedgerEntry) -> bool {
        entry.user_id == self.user_id && entry.kind == self.kind && entry.amount == self.amount
    }

    /// Resolve a replay: the existing entry if the payload matches, otherwise
    /// a duplicate-reference error.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::DuplicateReference`] on a payload mismatch.
    pub fn replay(&self, existing: LedgerEntry) -> Result<LedgerEntry, SlotbookError> {
        if self.is_replay_of(&existing) {
            Ok(existing)
        } else {
            Err(SlotbookError::DuplicateReference {
                reference: self.reference.clone(),
            })
        }
    }
}

/// Admin decision on a pending withdrawal hold.
#[derive(Clone, Debug, PartialEq)]
pub struct HoldResolution {
    /// Reference of the hold entry
    pub reference: String,
    /// `Approved` or `Rejected`
    pub target: EntryStatus,
    /// Deciding admin
    pub admin: AdminId,
    /// Note or rejection reason
    pub note: Option<String>,
    /// Entry written in the same unit: `WithdrawFinal` or `WithdrawRelease`
    pub follow_up: EntryRequest,
}

/// Result of resolving a hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoldOutcome {
    /// Hold with its new status
    pub hold: LedgerEntry,
    /// Follow-up entry
    pub follow_up: LedgerEntry,
}

fn ensure_withdrawal_hold(hold: &LedgerEntry) -> Result<(), SlotbookError> {
    if hold.kind == EntryKind::WithdrawHold {
        Ok(())
    } else {
        Err(SlotbookError::InvalidInput(format!(
            "entry {} is not a withdrawal hold",
            hold.reference
        )))
    }
}

fn already_resolved(hold: &LedgerEntry) -> SlotbookError {
    SlotbookError::AlreadyResolved {
        reference: hold.reference.clone(),
        status: hold.status,
    }
}

/// Check that an approval may claim `hold` for payout.
///
/// A pending hold can be claimed. A processing hold can be claimed again
/// only once its claim is older than `stale_before`, which recovers holds
/// whose approval died mid-payout.
///
/// # Errors
///
/// - [`SlotbookError::InvalidInput`] if `hold` is not a withdrawal hold
/// - [`SlotbookError::AlreadyResolved`] if the hold is resolved or claimed
pub fn ensure_claimable(hold: &LedgerEntry, stale_before: DateTime<Utc>) -> Result<(), SlotbookError> {
    ensure_withdrawal_hold(hold)?;
    match hold.status {
        EntryStatus::PendingAdminApproval => Ok(()),
        EntryStatus::Processing if hold.updated_at <= stale_before => Ok(()),
        _ => Err(already_resolved(hold)),
    }
}

/// Check that a hold can be resolved to `target`.
///
/// Approval finalizes a claimed (processing) hold. Rejection only applies to
/// a hold still pending, so a payout in flight can never be released.
///
/// # Errors
///
/// - [`SlotbookError::InvalidInput`] if `hold` is not a withdrawal hold or
///   `target` is not a resolution status
/// - [`SlotbookError::AlreadyResolved`] if the hold is not in the state
///   `target` resolves from
pub fn ensure_resolvable(hold: &LedgerEntry, target: EntryStatus) -> Result<(), SlotbookError> {
    ensure_withdrawal_hold(hold)?;
    let expected = match target {
        EntryStatus::Approved => EntryStatus::Processing,
        EntryStatus::Rejected => EntryStatus::PendingAdminApproval,
        _ => {
            return Err(SlotbookError::InvalidInput(format!(
                "hold cannot be resolved to {target}"
            )));
        }
    };
    if hold.status != expected {
        return Err(already_resolved(hold));
    }
    Ok(())
}

/// Replay a user's entries in sequence order and check every `balance_after`.
///
/// Returns the final balance, or the sequence number of the first entry whose
/// snapshot disagrees with the running sum.
///
/// # Errors
///
/// Returns `Err(sequence)` at the first inconsistent entry.
pub fn replay_balance(entries: &[LedgerEntry]) -> Result<Money, i64> {
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.sequence);

    let mut balance = Money::ZERO;
    for entry in ordered {
        balance = entry
            .kind
            .apply(balance, entry.amount)
            .map_err(|_| entry.sequence)?;
        if balance != entry.balance_after {
            return Err(entry.sequence);
        }
    }
    Ok(balance)
}

/// Beneficiary account for a withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutDetails {
    /// UPI id
    pub upi_id: String,
    /// Account holder name
    pub account_holder: String,
    /// Bank name, optional
    pub bank_name: Option<String>,
}

impl PayoutDetails {
    /// Trim fields and require UPI id and holder name.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::InvalidInput`] when a required field is blank.
    pub fn validated(self) -> Result<Self, SlotbookError> {
        let upi_id = self.upi_id.trim().to_string();
        let account_holder = self.account_holder.trim().to_string();
        if upi_id.is_empty() || account_holder.is_empty() {
            return Err(SlotbookError::InvalidInput(
                "UPI id and account holder name are required".into(),
            ));
        }
        Ok(Self {
            upi_id,
            account_holder,
            bank_name: self
                .bank_name
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn entry(sequence: i64, kind: EntryKind, amount: u64, after: u64) -> LedgerEntry {
        let now = Utc::now();
        LedgerEntry {
            id: EntryId::new(),
            user_id: UserId::new(),
            sequence,
            kind,
            amount: Money::from_minor(amount),
            balance_after: Money::from_minor(after),
            reference: format!("ref-{sequence}"),
            status: EntryStatus::Success,
            description: String::new(),
            metadata: serde_json::Value::Null,
            resolved_by: None,
            resolution_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn decrease_rejected_when_short() {
        let err = EntryKind::WithdrawHold
            .apply(Money::from_major(50), Money::from_major(80))
            .unwrap_err();
        assert_eq!(
            err,
            SlotbookError::InsufficientFunds {
                available: Money::from_major(50),
                requested: Money::from_major(80),
            }
        );
    }

    #[test]
    fn final_marker_leaves_balance_alone() {
        assert_eq!(
            EntryKind::WithdrawFinal
                .apply(Money::from_major(70), Money::from_major(30))
                .unwrap(),
            Money::from_major(70)
        );
    }

    #[test]
    fn zero_amount_rejected() {
        assert!(EntryKind::Credit.apply(Money::ZERO, Money::ZERO).is_err());
    }

    #[test]
    fn replay_balance_detects_bad_snapshot() {
        let good = vec![
            entry(1, EntryKind::Credit, 100, 100),
            entry(2, EntryKind::WithdrawHold, 30, 70),
            entry(3, EntryKind::WithdrawRelease, 30, 100),
        ];
        assert_eq!(replay_balance(&good), Ok(Money::from_minor(100)));

        let bad = vec![
            entry(1, EntryKind::Credit, 100, 100),
            entry(2, EntryKind::Debit, 30, 80),
        ];
        assert_eq!(replay_balance(&bad), Err(2));
    }

    #[test]
    fn replay_requires_same_payload() {
        let user = UserId::new();
        let request = EntryRequest::new(user, EntryKind::Debit, Money::from_major(5), "booking:1");
        let mut existing = entry(1, EntryKind::Debit, 500, 0);
        existing.user_id = user;
        assert!(request.replay(existing.clone()).is_ok());

        existing.amount = Money::from_major(6);
        assert!(matches!(
            request.replay(existing),
            Err(SlotbookError::DuplicateReference { .. })
        ));
    }

    #[test]
    fn hold_resolution_rules() {
        let mut hold = entry(1, EntryKind::WithdrawHold, 30, 70);
        hold.status = EntryStatus::PendingAdminApproval;
        assert!(ensure_resolvable(&hold, EntryStatus::Rejected).is_ok());
        assert!(ensure_resolvable(&hold, EntryStatus::Success).is_err());
        // Approval needs a claim first
        assert!(matches!(
            ensure_resolvable(&hold, EntryStatus::Approved),
            Err(SlotbookError::AlreadyResolved { .. })
        ));

        hold.status = EntryStatus::Processing;
        assert!(ensure_resolvable(&hold, EntryStatus::Approved).is_ok());
        assert_eq!(
            ensure_resolvable(&hold, EntryStatus::Rejected),
            Err(SlotbookError::AlreadyResolved {
                reference: hold.reference.clone(),
                status: EntryStatus::Processing,
            })
        );

        hold.status = EntryStatus::Approved;
        assert!(matches!(
            ensure_resolvable(&hold, EntryStatus::Rejected),
            Err(SlotbookError::AlreadyResolved { .. })
        ));
    }

    #[test]
    fn claims_take_pending_or_stale_holds() {
        let mut hold = entry(1, EntryKind::WithdrawHold, 30, 70);
        let stale_before = hold.updated_at - chrono::Duration::minutes(15);

        hold.status = EntryStatus::PendingAdminApproval;
        assert!(ensure_claimable(&hold, stale_before).is_ok());

        hold.status = EntryStatus::Processing;
        assert!(matches!(
            ensure_claimable(&hold, stale_before),
            Err(SlotbookError::AlreadyResolved { status: EntryStatus::Processing, .. })
        ));
        assert!(ensure_claimable(&hold, hold.updated_at).is_ok());

        hold.status = EntryStatus::Rejected;
        assert!(ensure_claimable(&hold, hold.updated_at).is_err());

        let credit = entry(2, EntryKind::Credit, 30, 100);
        assert!(matches!(
            ensure_claimable(&credit, stale_before),
            Err(SlotbookError::InvalidInput(_))
        ));
    }

    #[test]
    fn payout_details_require_upi_and_holder() {
        let details = PayoutDetails {
            upi_id: "  ".into(),
            account_holder: "A".into(),
            bank_name: None,
        };
        assert!(details.validated().is_err());
    }
}
