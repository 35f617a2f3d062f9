//! Shared harness for runtime integration tests.
//!
//! Wires a [`Slotbook`] engine over the in-memory store, a mock clock and mock
//! collaborators, and keeps handles on each so tests can steer and inspect
//! them.

#![allow(dead_code, clippy::expect_used)]

use slotbook_core::environment::Clock;
use slotbook_core::gateway::PayoutGateway;
use slotbook_core::slot::Slot;
use slotbook_core::store::BookingStore;
use slotbook_core::types::{Money, UserId};
use slotbook_runtime::retry::RetryPolicy;
use slotbook_runtime::{EngineSettings, Slotbook, SlotbookEnvironment, WithdrawalPolicy};
use slotbook_testing::{
    InMemoryStore, MockClock, MockPaymentGateway, MockPayoutGateway, RecordingNotifier, fixtures,
    test_epoch,
};
use std::sync::Arc;
use std::time::Duration;

pub const CHECKOUT_SECRET: &str = "test_checkout_secret";

pub struct Harness {
    pub engine: Slotbook,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<MockClock>,
    pub payments: Arc<MockPaymentGateway>,
    pub payouts: Arc<MockPayoutGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notifier(RecordingNotifier::new())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        let store = InMemoryStore::shared();
        let clock = Arc::new(MockClock::new(test_epoch()));
        let payments = Arc::new(MockPaymentGateway::new(CHECKOUT_SECRET));
        let payouts = MockPayoutGateway::shared();
        let notifier = Arc::new(notifier);

        let env = SlotbookEnvironment::with_store(
            Arc::clone(&store),
            clock.clone(),
            payments.clone(),
            payouts.clone(),
            notifier.clone(),
        );
        let engine = Slotbook::new(env, fast_settings());

        Self {
            engine,
            store,
            clock,
            payments,
            payouts,
            notifier,
        }
    }

    /// A second engine over the same store, clock and checkout, paying out
    /// through `payouts`.
    pub fn engine_with_payouts(&self, payouts: Arc<dyn PayoutGateway>) -> Slotbook {
        let env = SlotbookEnvironment::with_store(
            Arc::clone(&self.store),
            self.clock.clone(),
            self.payments.clone(),
            payouts,
            self.notifier.clone(),
        );
        Slotbook::new(env, fast_settings())
    }

    /// A second engine over the same collaborators, keeping bookings in
    /// `bookings`.
    pub fn engine_with_bookings(&self, bookings: Arc<dyn BookingStore>) -> Slotbook {
        let env = SlotbookEnvironment {
            bookings,
            ..SlotbookEnvironment::with_store(
                Arc::clone(&self.store),
                self.clock.clone(),
                self.payments.clone(),
                self.payouts.clone(),
                self.notifier.clone(),
            )
        };
        Slotbook::new(env, fast_settings())
    }

    /// An upcoming slot starting two hours from the harness clock.
    pub async fn upcoming_slot(&self, match_type: &str, fee: Money, capacity: usize) -> Slot {
        self.engine
            .create_slot(fixtures::new_slot(match_type, fee, capacity, self.clock.now()))
            .await
            .expect("slot should be created")
    }

    /// A user whose wallet holds `balance`.
    pub fn funded_user(&self, balance: Money) -> UserId {
        let user = UserId::new();
        self.store.seed_wallet(user, balance, test_epoch());
        user
    }
}

/// Default policies with payout retries shortened to milliseconds.
fn fast_settings() -> EngineSettings {
    EngineSettings {
        withdrawals: WithdrawalPolicy {
            payout_retry: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .build(),
            ..WithdrawalPolicy::default()
        },
        ..EngineSettings::default()
    }
}

pub fn major(amount: u64) -> Money {
    Money::from_major(amount)
}
