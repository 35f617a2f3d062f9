//! Storage abstractions: slot inventory, wallet ledger and bookings.
//!
//! # Implementations
//!
//! - `PostgresStore` (in `slotbook-postgres`): production, row locks per slot
//!   and per wallet
//! - `InMemoryStore` (in `slotbook-testing`): one lock around all state, for
//!   fast deterministic tests
//!
//! # Atomicity
//!
//! Every method is one all-or-nothing unit. Cross-store protocols (booking,
//! cancellation) are composed by the runtime with compensation, relying on
//! each method being idempotent for the same booking id or reference.
//!
//! # Dyn Compatibility
//!
//! Methods return explicit `Pin<Box<dyn Future>>` so that the runtime can hold
//! `Arc<dyn SlotInventory>` and friends.

use crate::booking::{Booking, BookingStatus};
use crate::error::SlotbookError;
use crate::ledger::{EntryRequest, HoldOutcome, HoldResolution, LedgerEntry};
use crate::slot::{Slot, SlotOccupancy, SlotStatus};
use crate::types::{AdminId, BookingId, MatchType, Money, Page, Paginated, PositionKey, SlotId, UserId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SlotbookError>> + Send + 'a>>;

/// Durable capacity record per slot.
pub trait SlotInventory: Send + Sync {
    /// Persist a new slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn create_slot(&self, slot: Slot) -> StoreFuture<'_, Slot>;

    /// Load a slot with its occupancy.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] if absent.
    fn load_slot(&self, slot_id: SlotId) -> StoreFuture<'_, Slot>;

    /// Slots ordered by start time, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn list_slots(&self, status: Option<SlotStatus>) -> StoreFuture<'_, Vec<Slot>>;

    /// Atomically assign every position in `positions` to `booking_id`.
    ///
    /// No partial occupancy: either all positions are assigned or none.
    /// Positions already held by `booking_id` are accepted, so replaying an
    /// occupy for the same booking succeeds.
    ///
    /// # Errors
    ///
    /// See [`Slot::check_occupiable`], plus [`SlotbookError::SlotNotFound`].
    fn occupy(
        &self,
        slot_id: SlotId,
        booking_id: BookingId,
        match_type: MatchType,
        positions: Vec<PositionKey>,
    ) -> StoreFuture<'_, Slot>;

    /// Free the positions in `positions` that are held by `booking_id`.
    ///
    /// Positions held by other bookings or already free are left alone.
    /// Returns how many positions were freed.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] if absent.
    fn release(
        &self,
        slot_id: SlotId,
        booking_id: BookingId,
        positions: Vec<PositionKey>,
    ) -> StoreFuture<'_, usize>;

    /// Conditionally move the slot from `expected` to `target`.
    ///
    /// Returns `None` without writing when the slot is no longer in
    /// `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] if absent.
    fn transition_status(
        &self,
        slot_id: SlotId,
        expected: SlotStatus,
        target: SlotStatus,
    ) -> StoreFuture<'_, Option<Slot>>;

    /// Archive a cancelled or completed slot. An archived slot is no longer
    /// loaded, listed or written: every later call on it reports
    /// [`SlotbookError::SlotNotFound`].
    ///
    /// Returns `false` without writing when the slot is still upcoming or
    /// live.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] if absent or already archived.
    fn archive_slot(&self, slot_id: SlotId, now: DateTime<Utc>) -> StoreFuture<'_, bool>;

    /// Read-only pre-check that a booking could occupy `positions`.
    ///
    /// # Errors
    ///
    /// Same as [`SlotInventory::occupy`].
    fn reserve_eligible(
        &self,
        slot_id: SlotId,
        match_type: MatchType,
        positions: Vec<PositionKey>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let slot = self.load_slot(slot_id).await?;
            slot.check_occupiable(None, match_type, &positions)
        })
    }

    /// Capacity view of a slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] if absent.
    fn occupancy(&self, slot_id: SlotId) -> StoreFuture<'_, SlotOccupancy> {
        Box::pin(async move { Ok(self.load_slot(slot_id).await?.occupancy_summary()) })
    }
}

/// Durable, append-only wallet ledger with a balance snapshot per user.
pub trait LedgerStore: Send + Sync {
    /// Create a zero-balance wallet if the user has none. Returns the balance.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn open_wallet(&self, user_id: UserId, now: DateTime<Utc>) -> StoreFuture<'_, Money>;

    /// Current balance.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::UserNotFound`] without a wallet.
    fn balance(&self, user_id: UserId) -> StoreFuture<'_, Money>;

    /// Append an entry and move the balance, in one unit.
    ///
    /// A request whose reference already exists returns the stored entry when
    /// user, kind and amount match, and fails otherwise.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::UserNotFound`] without a wallet
    /// - [`SlotbookError::InsufficientFunds`] for a decrease above the balance
    /// - [`SlotbookError::DuplicateReference`] on a reference reused with a
    ///   different payload
    fn apply_entry(&self, request: EntryRequest, now: DateTime<Utc>) -> StoreFuture<'_, LedgerEntry>;

    /// Entry by reference.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn find_entry(&self, reference: String) -> StoreFuture<'_, Option<LedgerEntry>>;

    /// Claim a withdrawal hold for payout: a conditional move to
    /// `processing` that rejection refuses. Returns the claimed hold.
    ///
    /// A hold already processing is only claimed again when its claim was
    /// made at or before `stale_before`.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::EntryNotFound`] for an unknown reference
    /// - [`SlotbookError::AlreadyResolved`] for a resolved or freshly claimed
    ///   hold
    fn claim_hold(
        &self,
        reference: String,
        admin: AdminId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreFuture<'_, LedgerEntry>;

    /// Return a claimed hold to `pending_admin_approval` after a failed
    /// payout. Returns `false` if the hold was not processing.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn release_claim(&self, reference: String, now: DateTime<Utc>) -> StoreFuture<'_, bool>;

    /// Resolve a withdrawal hold and append its follow-up entry, in one unit.
    ///
    /// Approval finalizes a claimed hold; rejection releases a pending one.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::EntryNotFound`] for an unknown reference
    /// - [`SlotbookError::AlreadyResolved`] when the hold is not in the state
    ///   the target resolves from
    fn resolve_hold(&self, resolution: HoldResolution, now: DateTime<Utc>) -> StoreFuture<'_, HoldOutcome>;

    /// A user's entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::UserNotFound`] without a wallet.
    fn list_entries(&self, user_id: UserId, page: Page) -> StoreFuture<'_, Paginated<LedgerEntry>>;

    /// Withdrawal holds awaiting an admin or a payout, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn list_pending_holds(&self, page: Page) -> StoreFuture<'_, Paginated<LedgerEntry>>;
}

/// Durable booking records.
pub trait BookingStore: Send + Sync {
    /// Insert the booking unless one with the same id exists; returns the
    /// stored booking either way.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn insert_booking(&self, booking: Booking) -> StoreFuture<'_, Booking>;

    /// Booking by id.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn load_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>>;

    /// Move a confirmed booking to cancelled. An already-cancelled booking is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::BookingNotFound`] if absent
    /// - [`SlotbookError::BookingNotActive`] for a completed booking
    fn mark_cancelled(&self, booking_id: BookingId, now: DateTime<Utc>) -> StoreFuture<'_, Booking>;

    /// Bookings of a slot in creation order, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn list_for_slot(
        &self,
        slot_id: SlotId,
        status: Option<BookingStatus>,
    ) -> StoreFuture<'_, Vec<Booking>>;

    /// A user's bookings, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn list_for_user(&self, user_id: UserId, page: Page) -> StoreFuture<'_, Paginated<Booking>>;

    /// Confirmed bookings whose slot is missing or archived, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn list_orphaned(&self) -> StoreFuture<'_, Vec<Booking>>;

    /// Mark every confirmed booking of a slot completed. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    fn complete_for_slot(&self, slot_id: SlotId, now: DateTime<Utc>) -> StoreFuture<'_, u64>;
}
