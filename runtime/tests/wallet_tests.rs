//! Integration tests for deposits, direct ledger entries and withdrawals.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use chrono::Duration as ChronoDuration;
use common::{Harness, major};
use slotbook_core::SlotbookError;
use slotbook_core::environment::Clock;
use slotbook_core::gateway::{GatewayFuture, Notification, PayoutGateway, PayoutReceipt, PayoutRequest};
use slotbook_core::ledger::{EntryKind, EntryRequest, EntryStatus, PayoutDetails, replay_balance};
use slotbook_core::store::LedgerStore;
use slotbook_core::types::{AdminId, Money, Page, UserId};
use slotbook_runtime::DepositConfirmation;
use slotbook_testing::MockPayoutGateway;
use std::sync::Arc;
use tokio::sync::Notify;

/// Payout gateway that parks every submission until released.
struct GatedPayouts {
    inner: Arc<MockPayoutGateway>,
    entered: Notify,
    proceed: Notify,
}

impl GatedPayouts {
    fn new(inner: Arc<MockPayoutGateway>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            entered: Notify::new(),
            proceed: Notify::new(),
        })
    }
}

impl PayoutGateway for GatedPayouts {
    fn submit_payout(&self, request: PayoutRequest) -> GatewayFuture<'_, PayoutReceipt> {
        Box::pin(async move {
            self.entered.notify_one();
            self.proceed.notified().await;
            self.inner.submit_payout(request).await
        })
    }
}

fn payout_details() -> PayoutDetails {
    PayoutDetails {
        upi_id: " player@upi ".into(),
        account_holder: "Player One".into(),
        bank_name: None,
    }
}

// ============================================================================
// Wallet
// ============================================================================

#[tokio::test]
async fn open_wallet_is_idempotent() {
    let h = Harness::new();
    let user = UserId::new();

    assert_eq!(
        h.engine.get_balance(user).await.unwrap_err(),
        SlotbookError::UserNotFound(user)
    );
    assert_eq!(h.engine.open_wallet(user).await.unwrap(), Money::ZERO);
    h.engine
        .apply_ledger_entry(EntryRequest::new(user, EntryKind::Credit, major(40), "bonus:1"))
        .await
        .unwrap();
    assert_eq!(h.engine.open_wallet(user).await.unwrap(), major(40));
}

#[tokio::test]
async fn direct_entries_move_the_balance_and_replay_by_reference() {
    let h = Harness::new();
    let user = h.funded_user(major(100));

    let loss = h
        .engine
        .apply_ledger_entry(EntryRequest::new(user, EntryKind::Loss, major(30), "adj:1"))
        .await
        .unwrap();
    assert_eq!(loss.balance_after, major(70));

    let replay = h
        .engine
        .apply_ledger_entry(EntryRequest::new(user, EntryKind::Loss, major(30), "adj:1"))
        .await
        .unwrap();
    assert_eq!(replay.id, loss.id);

    let err = h
        .engine
        .apply_ledger_entry(EntryRequest::new(user, EntryKind::Loss, major(31), "adj:1"))
        .await
        .unwrap_err();
    assert_eq!(err, SlotbookError::DuplicateReference { reference: "adj:1".into() });

    let err = h
        .engine
        .apply_ledger_entry(EntryRequest::new(user, EntryKind::Debit, major(500), "adj:2"))
        .await
        .unwrap_err();
    assert!(matches!(err, SlotbookError::InsufficientFunds { .. }));

    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(70));
}

#[tokio::test]
async fn withdrawal_kinds_cannot_be_applied_directly() {
    let h = Harness::new();
    let user = h.funded_user(major(100));

    let err = h
        .engine
        .apply_ledger_entry(EntryRequest::new(user, EntryKind::WithdrawHold, major(30), "sneaky"))
        .await
        .unwrap_err();
    assert!(matches!(err, SlotbookError::InvalidInput(_)));
}

#[tokio::test]
async fn statement_is_newest_first_and_paginated() {
    let h = Harness::new();
    let user = h.funded_user(major(100));
    for n in 1..=4 {
        h.engine
            .apply_ledger_entry(EntryRequest::new(user, EntryKind::Credit, major(n), format!("c:{n}")))
            .await
            .unwrap();
    }

    let page = h.engine.list_transactions(user, Page::new(1, 2)).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
    assert!(page.has_next);
    assert_eq!(page.items[0].reference, "c:4");
    assert_eq!(page.items[1].reference, "c:3");

    let last = h.engine.list_transactions(user, Page::new(3, 2)).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_next);
    assert!(last.has_prev);
}

// ============================================================================
// Deposits
// ============================================================================

#[tokio::test]
async fn verified_deposit_is_credited_once() {
    let h = Harness::new();
    let user = h.funded_user(Money::ZERO);

    let order = h.engine.create_deposit_order(user, major(500)).await.unwrap();
    assert_eq!(order.amount, major(500));
    assert_eq!(order.currency, "INR");

    let confirmation = DepositConfirmation {
        user_id: user,
        order_ref: order.order_ref.clone(),
        payment_ref: "pay_1".into(),
        signature: h.payments.complete_checkout(&order.order_ref, "pay_1"),
        amount: major(500),
    };
    let credit = h.engine.confirm_deposit(confirmation.clone()).await.unwrap();
    assert_eq!(credit.reference, "deposit:pay_1");
    let again = h.engine.confirm_deposit(confirmation).await.unwrap();
    assert_eq!(again.id, credit.id);

    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(500));
    assert!(h.notifier.sent().contains(&Notification::DepositCredited {
        user_id: user,
        amount: major(500),
    }));
}

#[tokio::test]
async fn forged_deposit_is_rejected() {
    let h = Harness::new();
    let user = h.funded_user(Money::ZERO);
    let order = h.engine.create_deposit_order(user, major(500)).await.unwrap();

    let err = h
        .engine
        .confirm_deposit(DepositConfirmation {
            user_id: user,
            order_ref: order.order_ref,
            payment_ref: "pay_1".into(),
            signature: "0".repeat(64),
            amount: major(500),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SlotbookError::InvalidInput(_)));
    assert_eq!(h.engine.get_balance(user).await.unwrap(), Money::ZERO);
}

#[tokio::test]
async fn deposit_credits_the_order_amount_only() {
    let h = Harness::new();
    let user = h.funded_user(Money::ZERO);
    let order = h.engine.create_deposit_order(user, major(10)).await.unwrap();
    let signature = h.payments.complete_checkout(&order.order_ref, "pay_1");

    let inflated = h
        .engine
        .confirm_deposit(DepositConfirmation {
            user_id: user,
            order_ref: order.order_ref.clone(),
            payment_ref: "pay_1".into(),
            signature: signature.clone(),
            amount: major(1_000_000),
        })
        .await
        .unwrap_err();

    assert!(matches!(inflated, SlotbookError::InvalidInput(_)));
    assert_eq!(h.engine.get_balance(user).await.unwrap(), Money::ZERO);
    assert!(h.store.entries_for(user).is_empty());

    let credit = h
        .engine
        .confirm_deposit(DepositConfirmation {
            user_id: user,
            order_ref: order.order_ref,
            payment_ref: "pay_1".into(),
            signature,
            amount: major(10),
        })
        .await
        .unwrap();
    assert_eq!(credit.amount, major(10));
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(10));
}

#[tokio::test]
async fn unpaid_order_is_not_credited() {
    let h = Harness::new();
    let user = h.funded_user(Money::ZERO);
    let order = h.engine.create_deposit_order(user, major(100)).await.unwrap();

    // Signed, but the gateway never captured the payment
    let err = h
        .engine
        .confirm_deposit(DepositConfirmation {
            user_id: user,
            order_ref: order.order_ref.clone(),
            payment_ref: "pay_1".into(),
            signature: h.payments.sign(&order.order_ref, "pay_1"),
            amount: major(100),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SlotbookError::InvalidInput(ref message) if message.contains("not paid")));
    assert_eq!(h.engine.get_balance(user).await.unwrap(), Money::ZERO);
}

#[tokio::test]
async fn order_from_another_wallet_is_not_credited() {
    let h = Harness::new();
    let owner = h.funded_user(Money::ZERO);
    let thief = h.funded_user(Money::ZERO);
    let order = h.engine.create_deposit_order(owner, major(100)).await.unwrap();
    let signature = h.payments.complete_checkout(&order.order_ref, "pay_1");

    let err = h
        .engine
        .confirm_deposit(DepositConfirmation {
            user_id: thief,
            order_ref: order.order_ref.clone(),
            payment_ref: "pay_1".into(),
            signature,
            amount: major(100),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SlotbookError::InvalidInput(_)));
    assert_eq!(h.engine.get_balance(thief).await.unwrap(), Money::ZERO);
}

#[tokio::test]
async fn unknown_order_is_not_credited() {
    let h = Harness::new();
    let user = h.funded_user(Money::ZERO);

    let err = h
        .engine
        .confirm_deposit(DepositConfirmation {
            user_id: user,
            order_ref: "order_404".into(),
            payment_ref: "pay_1".into(),
            signature: h.payments.sign("order_404", "pay_1"),
            amount: major(100),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SlotbookError::InvalidInput(_)));
}

#[tokio::test]
async fn deposits_below_the_minimum_are_refused() {
    let h = Harness::new();
    let user = h.funded_user(Money::ZERO);

    let err = h.engine.create_deposit_order(user, major(5)).await.unwrap_err();
    assert!(matches!(err, SlotbookError::InvalidInput(_)));
}

// ============================================================================
// Withdrawals
// ============================================================================

#[tokio::test]
async fn withdrawal_above_balance_creates_no_hold() {
    let h = Harness::new();
    let user = h.funded_user(major(50));

    let err = h
        .engine
        .request_withdrawal(user, major(80), payout_details(), "w1")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SlotbookError::InsufficientFunds {
            available: major(50),
            requested: major(80),
        }
    );
    assert_eq!(h.engine.pending_withdrawals(Page::default()).await.unwrap().total, 0);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(50));
}

#[tokio::test]
async fn rejected_withdrawal_restores_the_balance() {
    let h = Harness::new();
    let user = h.funded_user(major(100));

    let hold = h
        .engine
        .request_withdrawal(user, major(30), payout_details(), "w1")
        .await
        .unwrap();
    assert_eq!(hold.reference, format!("withdraw:{user}:w1"));
    assert_eq!(hold.status, EntryStatus::PendingAdminApproval);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(70));

    let admin = AdminId::new();
    let outcome = h
        .engine
        .reject_withdrawal(&hold.reference, admin, "  name mismatch ")
        .await
        .unwrap();

    assert_eq!(outcome.hold.status, EntryStatus::Rejected);
    assert_eq!(outcome.hold.resolved_by, Some(admin));
    assert_eq!(outcome.hold.resolution_note.as_deref(), Some("name mismatch"));
    assert_eq!(outcome.follow_up.kind, EntryKind::WithdrawRelease);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(100));
    assert!(h.payouts.payouts().is_empty());
}

#[tokio::test]
async fn approval_pays_out_after_transient_failures() {
    let h = Harness::new();
    let user = h.funded_user(major(100));
    let hold = h
        .engine
        .request_withdrawal(user, major(60), payout_details(), "w1")
        .await
        .unwrap();
    h.payouts.fail_transiently(2);

    let outcome = h
        .engine
        .approve_withdrawal(&hold.reference, AdminId::new(), Some("ok".into()))
        .await
        .unwrap();

    assert_eq!(outcome.hold.status, EntryStatus::Approved);
    assert_eq!(outcome.follow_up.kind, EntryKind::WithdrawFinal);
    assert_eq!(outcome.follow_up.balance_after, major(40));
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(40));
    assert_eq!(h.payouts.attempts(), 3);

    let payouts = h.payouts.payouts();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].reference, hold.reference);
    assert_eq!(payouts[0].beneficiary.upi_id, "player@upi");
    assert_eq!(payouts[0].amount, major(60));
}

#[tokio::test]
async fn refused_payout_leaves_the_hold_pending() {
    let h = Harness::new();
    let user = h.funded_user(major(100));
    let hold = h
        .engine
        .request_withdrawal(user, major(60), payout_details(), "w1")
        .await
        .unwrap();
    h.payouts.reject_all("account closed");

    let err = h
        .engine
        .approve_withdrawal(&hold.reference, AdminId::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SlotbookError::Upstream(_)));
    // Permanent rejections are not retried
    assert_eq!(h.payouts.attempts(), 1);
    let pending = h.engine.pending_withdrawals(Page::default()).await.unwrap();
    assert_eq!(pending.items.len(), 1);
    assert_eq!(pending.items[0].reference, hold.reference);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(40));
}

#[tokio::test]
async fn a_hold_is_resolved_once() {
    let h = Harness::new();
    let user = h.funded_user(major(100));
    let hold = h
        .engine
        .request_withdrawal(user, major(60), payout_details(), "w1")
        .await
        .unwrap();
    h.engine
        .approve_withdrawal(&hold.reference, AdminId::new(), None)
        .await
        .unwrap();

    let err = h
        .engine
        .reject_withdrawal(&hold.reference, AdminId::new(), "too late")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SlotbookError::AlreadyResolved {
            reference: hold.reference.clone(),
            status: EntryStatus::Approved,
        }
    );

    let err = h
        .engine
        .approve_withdrawal(&hold.reference, AdminId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SlotbookError::AlreadyResolved { .. }));
    assert_eq!(h.payouts.payouts().len(), 1);
}

#[tokio::test]
async fn withdrawal_request_is_idempotent_per_key() {
    let h = Harness::new();
    let user = h.funded_user(major(100));

    let first = h
        .engine
        .request_withdrawal(user, major(30), payout_details(), "w1")
        .await
        .unwrap();
    let second = h
        .engine
        .request_withdrawal(user, major(30), payout_details(), "w1")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(70));
}

#[tokio::test]
async fn withdrawal_input_is_validated() {
    let h = Harness::new();
    let user = h.funded_user(major(100));

    let below_minimum = h
        .engine
        .request_withdrawal(user, major(5), payout_details(), "w1")
        .await;
    assert!(matches!(below_minimum, Err(SlotbookError::InvalidInput(_))));

    let no_upi = h
        .engine
        .request_withdrawal(
            user,
            major(20),
            PayoutDetails {
                upi_id: "  ".into(),
                ..payout_details()
            },
            "w2",
        )
        .await;
    assert!(matches!(no_upi, Err(SlotbookError::InvalidInput(_))));

    let hold = h
        .engine
        .request_withdrawal(user, major(20), payout_details(), "w3")
        .await
        .unwrap();
    let no_reason = h.engine.reject_withdrawal(&hold.reference, AdminId::new(), " ").await;
    assert!(matches!(no_reason, Err(SlotbookError::InvalidInput(_))));

    let unknown = h.engine.approve_withdrawal("withdraw:nobody:x", AdminId::new(), None).await;
    assert_eq!(unknown.unwrap_err(), SlotbookError::EntryNotFound("withdraw:nobody:x".into()));
}

#[tokio::test]
async fn ledger_replays_to_the_stored_balance_after_a_full_cycle() {
    let h = Harness::new();
    let user = h.funded_user(major(100));

    let approved = h
        .engine
        .request_withdrawal(user, major(20), payout_details(), "a")
        .await
        .unwrap();
    let rejected = h
        .engine
        .request_withdrawal(user, major(30), payout_details(), "r")
        .await
        .unwrap();
    h.engine
        .approve_withdrawal(&approved.reference, AdminId::new(), None)
        .await
        .unwrap();
    h.engine
        .reject_withdrawal(&rejected.reference, AdminId::new(), "duplicate")
        .await
        .unwrap();

    let entries = h.store.entries_for(user);
    assert_eq!(entries.len(), 5);
    assert_eq!(replay_balance(&entries), Ok(major(80)));
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(80));
}

#[tokio::test]
async fn rejection_cannot_release_a_hold_being_paid_out() {
    let h = Harness::new();
    let gate = GatedPayouts::new(h.payouts.clone());
    let engine = h.engine_with_payouts(gate.clone());
    let user = h.funded_user(major(100));
    let hold = engine
        .request_withdrawal(user, major(100), payout_details(), "w1")
        .await
        .unwrap();

    let approving = tokio::spawn({
        let engine = engine.clone();
        let reference = hold.reference.clone();
        async move { engine.approve_withdrawal(&reference, AdminId::new(), None).await }
    });
    gate.entered.notified().await;

    let err = engine
        .reject_withdrawal(&hold.reference, AdminId::new(), "changed my mind")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SlotbookError::AlreadyResolved {
            reference: hold.reference.clone(),
            status: EntryStatus::Processing,
        }
    );
    let err = engine
        .approve_withdrawal(&hold.reference, AdminId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SlotbookError::AlreadyResolved { .. }));

    gate.proceed.notify_one();
    let outcome = approving.await.unwrap().unwrap();

    assert_eq!(outcome.hold.status, EntryStatus::Approved);
    assert_eq!(h.payouts.payouts().len(), 1);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), Money::ZERO);
    assert_eq!(replay_balance(&h.store.entries_for(user)), Ok(Money::ZERO));
}

#[tokio::test]
async fn failed_payout_returns_the_hold_for_rejection() {
    let h = Harness::new();
    let user = h.funded_user(major(100));
    let hold = h
        .engine
        .request_withdrawal(user, major(60), payout_details(), "w1")
        .await
        .unwrap();
    h.payouts.reject_all("account closed");

    let err = h
        .engine
        .approve_withdrawal(&hold.reference, AdminId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SlotbookError::Upstream(_)));

    let stored = h.store.find_entry(hold.reference.clone()).await.unwrap().unwrap();
    assert_eq!(stored.status, EntryStatus::PendingAdminApproval);
    assert_eq!(stored.resolved_by, None);

    let outcome = h
        .engine
        .reject_withdrawal(&hold.reference, AdminId::new(), "account closed")
        .await
        .unwrap();
    assert_eq!(outcome.hold.status, EntryStatus::Rejected);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(100));
}

#[tokio::test]
async fn abandoned_claim_is_taken_over_after_the_timeout() {
    let h = Harness::new();
    let user = h.funded_user(major(100));
    let hold = h
        .engine
        .request_withdrawal(user, major(40), payout_details(), "w1")
        .await
        .unwrap();

    // An approval that claimed the hold and never came back
    h.store
        .claim_hold(hold.reference.clone(), AdminId::new(), h.clock.now(), h.clock.now())
        .await
        .unwrap();

    let err = h
        .engine
        .approve_withdrawal(&hold.reference, AdminId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SlotbookError::AlreadyResolved { status: EntryStatus::Processing, .. }));
    assert!(h
        .engine
        .reject_withdrawal(&hold.reference, AdminId::new(), "stuck")
        .await
        .is_err());

    h.clock.advance(ChronoDuration::minutes(16));
    let outcome = h
        .engine
        .approve_withdrawal(&hold.reference, AdminId::new(), None)
        .await
        .unwrap();
    assert_eq!(outcome.hold.status, EntryStatus::Approved);
    assert_eq!(h.payouts.payouts().len(), 1);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(60));
}
