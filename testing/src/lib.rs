//! # Slotbook Testing
//!
//! Testing utilities for the Slotbook reservation engine.
//!
//! This crate provides:
//! - [`InMemoryStore`]: every store trait over one mutex, with failure injection
//! - Deterministic clocks ([`FixedClock`], [`MockClock`])
//! - Mock collaborators ([`MockPaymentGateway`], [`MockPayoutGateway`],
//!   [`RecordingNotifier`])
//! - Fixtures for common slots and booking requests
//!
//! ## Example
//!
//! ```ignore
//! use slotbook_core::store::SlotInventory;
//! use slotbook_core::types::Money;
//! use slotbook_testing::{InMemoryStore, fixtures, test_epoch};
//!
//! #[tokio::test]
//! async fn stores_a_duo_slot() {
//!     let store = InMemoryStore::shared();
//!     let slot = fixtures::slot("duo", Money::from_major(100), 4, test_epoch()).unwrap();
//!     store.create_slot(slot).await.unwrap();
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use slotbook_core::environment::Clock;

pub mod gateways;
pub mod memory;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use slotbook_testing::mocks::FixedClock;
    /// use slotbook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Drives the match scheduler through live windows without sleeping.
    #[derive(Debug)]
    pub struct MockClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl MockClock {
        /// Start at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

/// Fixtures for slots and booking requests.
pub mod fixtures {
    use chrono::{DateTime, Utc};
    use slotbook_core::booking::BookingRequest;
    use slotbook_core::slot::{NewSlot, Slot};
    use slotbook_core::types::{Money, PositionKey, PositionLayout, SlotId, UserId};
    use slotbook_core::SlotbookError;
    use std::collections::BTreeMap;

    /// Admin request for a slot with `teams` teams of the match type's size,
    /// starting two hours after `now`.
    #[must_use]
    pub fn new_slot(match_type: &str, entry_fee: Money, capacity: usize, now: DateTime<Utc>) -> NewSlot {
        NewSlot {
            title: format!("{match_type} match"),
            match_type: match_type.to_string(),
            entry_fee,
            start_time: now + chrono::Duration::hours(2),
            layout: None,
            capacity: Some(capacity),
            per_kill_reward: Money::from_major(5),
            total_prize_pool: Money::from_major(500),
        }
    }

    /// Build a slot from [`new_slot`].
    ///
    /// # Errors
    ///
    /// Returns the validation error for an unknown match type.
    pub fn slot(match_type: &str, entry_fee: Money, capacity: usize, now: DateTime<Utc>) -> Result<Slot, SlotbookError> {
        new_slot(match_type, entry_fee, capacity, now).into_slot(now)
    }

    /// A slot with an explicit layout.
    ///
    /// # Errors
    ///
    /// Returns the validation error for an unknown match type.
    pub fn slot_with_layout(
        match_type: &str,
        entry_fee: Money,
        layout: PositionLayout,
        now: DateTime<Utc>,
    ) -> Result<Slot, SlotbookError> {
        NewSlot {
            layout: Some(layout),
            ..new_slot(match_type, entry_fee, 0, now)
        }
        .into_slot(now)
    }

    /// Booking request for `positions`, naming every player and paying
    /// `expected_amount`.
    #[must_use]
    pub fn booking_request(
        user_id: UserId,
        slot_id: SlotId,
        match_type: &str,
        positions: &[PositionKey],
        expected_amount: Money,
        idempotency_key: &str,
    ) -> BookingRequest {
        let mut selected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut names = BTreeMap::new();
        for position in positions {
            selected
                .entry(position.team.clone())
                .or_default()
                .push(position.label.clone());
            names.insert(position.clone(), format!("player-{position}"));
        }

        BookingRequest {
            user_id,
            slot_id,
            match_type: match_type.to_string(),
            selected_positions: selected,
            player_names: names,
            expected_amount,
            idempotency_key: idempotency_key.to_string(),
        }
    }

    /// Shorthand for a position key.
    #[must_use]
    pub fn pos(team: &str, label: &str) -> PositionKey {
        PositionKey::new(team, label)
    }
}

// Re-export commonly used items
pub use gateways::{MockPaymentGateway, MockPayoutGateway, RecordingNotifier};
pub use memory::{InMemoryStore, StoreOperation};
pub use mocks::{test_clock, test_epoch, FixedClock, MockClock};
