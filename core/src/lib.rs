//! # Slotbook Core
//!
//! Domain types, error taxonomy and storage traits for the Slotbook slot
//! reservation and wallet ledger engine.
//!
//! ## Core Concepts
//!
//! - **Slot**: one match with a fixed layout of `(team, label)` positions
//! - **Booking**: a paid claim on some of a slot's positions
//! - **Ledger entry**: immutable record explaining one balance change
//! - **Withdrawal hold**: funds reserved until an admin approves or rejects
//!
//! ## Guarantees
//!
//! - A position is held by at most one confirmed booking
//! - A wallet balance changes exactly once per committed entry, and replaying
//!   a user's entries reproduces every `balance_after`
//! - Slot status only moves forward; `cancelled` is admin-only
//!
//! ## Layout
//!
//! This crate is I/O free. `slotbook-postgres` and `slotbook-testing` implement
//! the [`store`] traits; `slotbook-runtime` composes them into the booking,
//! withdrawal and lifecycle workflows.

pub mod booking;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod lifecycle;
pub mod signature;
pub mod slot;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{ErrorKind, SlotbookError};

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use slotbook_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
