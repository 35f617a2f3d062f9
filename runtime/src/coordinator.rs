//! Reservation coordinator: the booking protocol and its mirror, cancellation.
//!
//! # Booking
//!
//! ```text
//! replay? ─▶ load slot ─▶ fee + names ─▶ occupy ─▶ debit ─▶ insert booking
//!                                          │          │           │
//!                                          ▼          ▼           ▼
//!                                       conflict   release    refund + release
//! ```
//!
//! Each store call is atomic on its own. The protocol is made all-or-nothing
//! by compensating every earlier write when a later one fails, and made
//! retryable by keying every write on the booking id, which is derived from
//! the user and the idempotency key.
//!
//! A stored booking is then settled against a fresh read of its slot, so a
//! slot that closed mid-booking cancels or completes it like the rest.
//!
//! # Cancellation
//!
//! Mark cancelled, release positions, refund under `refund:<booking id>`.
//! Every step converges when repeated, so an interrupted cancellation is
//! finished by running it again.

use crate::SlotbookEnvironment;
use crate::metrics::{BookingMetrics, outcome_label};
use serde::{Deserialize, Serialize};
use slotbook_core::SlotbookError;
use slotbook_core::booking::{Booking, BookingRequest, BookingStatus};
use slotbook_core::gateway::Notification;
use slotbook_core::ledger::{EntryKind, EntryRequest, LedgerEntry};
use slotbook_core::slot::{NewSlot, Slot, SlotOccupancy, SlotStatus, flatten_selection};
use slotbook_core::types::{
    AMOUNT_TOLERANCE, BookingId, MatchType, Money, Page, Paginated, PositionKey, SlotId, UserId,
};
use std::time::Instant;

/// Per-slot booking figures for admins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatistics {
    /// Slot
    pub slot_id: SlotId,
    /// Status at read time
    pub status: SlotStatus,
    /// Confirmed bookings
    pub confirmed_bookings: usize,
    /// Positions held by bookings
    pub positions_booked: usize,
    /// Free positions
    pub positions_available: usize,
    /// Sum charged over confirmed bookings
    pub revenue: Money,
}

/// Runs bookings and cancellations against the slot inventory, the wallet
/// ledger and the booking records.
#[derive(Clone, Debug)]
pub struct ReservationCoordinator {
    env: SlotbookEnvironment,
}

impl ReservationCoordinator {
    /// Create a coordinator over `env`.
    #[must_use]
    pub const fn new(env: SlotbookEnvironment) -> Self {
        Self { env }
    }

    /// Book positions on a slot and debit the entry fee.
    ///
    /// Replaying a request with the same user and idempotency key returns the
    /// booking created the first time, without a second debit.
    ///
    /// # Errors
    ///
    /// - Validation: blank key, unknown match type, empty or duplicate
    ///   selection, match type mismatch, amount mismatch, missing player names,
    ///   unknown positions
    /// - [`SlotbookError::IdempotencyConflict`] when the key was used for a
    ///   different booking
    /// - [`SlotbookError::SlotNotBookable`] unless the slot is upcoming
    /// - [`SlotbookError::PositionsTaken`] listing positions held by others
    /// - [`SlotbookError::InsufficientFunds`] when the wallet cannot pay; the
    ///   positions are released before returning
    #[tracing::instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            slot_id = %request.slot_id,
            booking_id = %request.booking_id(),
        )
    )]
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, SlotbookError> {
        let started = Instant::now();
        let result = self.book(&request).await;
        BookingMetrics::record(outcome_label(&result), started.elapsed());

        match &result {
            Ok(booking) => tracing::info!(
                amount = %booking.amount_charged,
                positions = booking.positions.len(),
                "Booking confirmed"
            ),
            Err(error) => tracing::warn!(%error, kind = ?error.kind(), "Booking rejected"),
        }
        result
    }

    async fn book(&self, request: &BookingRequest) -> Result<Booking, SlotbookError> {
        if request.idempotency_key.trim().is_empty() {
            return Err(SlotbookError::InvalidInput(
                "idempotency key is required".into(),
            ));
        }
        let requested_type = MatchType::normalize(&request.match_type)?;
        let positions = flatten_selection(&request.selected_positions)?;
        let booking_id = request.booking_id();

        if let Some(existing) = self.env.bookings.load_booking(booking_id).await? {
            let existing = replayed(request, &positions, existing)?;
            return self.settle(existing).await;
        }

        let slot = self.env.slots.load_slot(request.slot_id).await?;
        if slot.status != SlotStatus::Upcoming {
            return Err(SlotbookError::SlotNotBookable {
                slot_id: slot.id,
                status: slot.status,
            });
        }
        if slot.match_type != requested_type {
            return Err(SlotbookError::MatchTypeMismatch {
                expected: slot.match_type,
                requested: requested_type,
            });
        }

        let expected = booking_total(&slot, positions.len())?;
        if expected.abs_diff(request.expected_amount) > AMOUNT_TOLERANCE {
            return Err(SlotbookError::AmountMismatch {
                expected,
                received: request.expected_amount,
            });
        }
        let named = request.named_positions(&positions)?;

        self.env
            .slots
            .occupy(slot.id, booking_id, requested_type, positions.clone())
            .await?;

        let debit = if expected.is_zero() {
            None
        } else {
            match self.debit(request.user_id, booking_id, expected).await {
                Ok(entry) => Some(entry),
                Err(error) => {
                    self.release_unclaimed(slot.id, booking_id, &positions).await;
                    return Err(error);
                }
            }
        };

        let now = self.env.clock.now();
        let booking = Booking {
            id: booking_id,
            user_id: request.user_id,
            slot_id: slot.id,
            match_type: requested_type,
            positions: named,
            amount_charged: expected,
            ledger_entry_id: debit.as_ref().map(|entry| entry.id),
            idempotency_key: request.idempotency_key.clone(),
            status: BookingStatus::Confirmed,
            created_at: now,
            updated_at: now,
        };

        let stored = match self.env.bookings.insert_booking(booking).await {
            Ok(stored) => stored,
            Err(error) => {
                if let Some(entry) = &debit {
                    self.reverse_debit(entry).await;
                }
                self.release_unclaimed(slot.id, booking_id, &positions).await;
                return Err(error);
            }
        };

        // A concurrent request with the same key won the insert.
        if !request.matches_booking(&stored, &positions) {
            self.release_unclaimed(slot.id, booking_id, &positions).await;
            return Err(SlotbookError::IdempotencyConflict {
                key: request.idempotency_key.clone(),
            });
        }

        let settled = self.settle(stored).await?;
        if settled.status == BookingStatus::Confirmed {
            self.env
                .notify(Notification::BookingConfirmed {
                    user_id: settled.user_id,
                    booking_id: settled.id,
                    slot_id: settled.slot_id,
                    amount: settled.amount_charged,
                })
                .await;
        }

        Ok(settled)
    }

    /// Reconcile a stored booking with the current status of its slot.
    ///
    /// A booking can commit just after its slot closed, when the slot's
    /// cascade has already run without it. It then shares the slot's fate: on
    /// a cancelled or removed slot it is cancelled and refunded, on a
    /// completed slot it is completed. If the slot cannot be read, the error
    /// is returned with the booking still confirmed; retrying the request
    /// settles it.
    async fn settle(&self, booking: Booking) -> Result<Booking, SlotbookError> {
        if booking.status != BookingStatus::Confirmed {
            return Ok(booking);
        }

        let slot = match self.env.slots.load_slot(booking.slot_id).await {
            Ok(slot) => slot,
            Err(SlotbookError::SlotNotFound(slot_id)) => {
                tracing::warn!("Slot removed while booking, cancelling booking");
                self.cancel(booking.id).await?;
                return Err(SlotbookError::SlotNotFound(slot_id));
            }
            Err(error) => {
                tracing::warn!(%error, "Could not re-read slot after booking");
                return Err(error);
            }
        };

        match slot.status {
            SlotStatus::Upcoming | SlotStatus::Live => Ok(booking),
            SlotStatus::Cancelled => {
                tracing::warn!("Slot cancelled while booking, cancelling booking");
                self.cancel(booking.id).await?;
                Err(SlotbookError::SlotNotBookable {
                    slot_id: slot.id,
                    status: SlotStatus::Cancelled,
                })
            }
            SlotStatus::Completed => {
                tracing::warn!("Slot completed while booking, completing booking");
                let now = self.env.clock.now();
                self.env.bookings.complete_for_slot(slot.id, now).await?;
                Ok(Booking {
                    status: BookingStatus::Completed,
                    updated_at: now,
                    ..booking
                })
            }
        }
    }

    /// Debit the booking total.
    ///
    /// A debit that was reversed by an earlier failed attempt keeps its
    /// reference, so a retry debits under the next generation
    /// (`booking:<id>#2`, ...) instead of replaying the reversed entry.
    async fn debit(
        &self,
        user_id: UserId,
        booking_id: BookingId,
        amount: Money,
    ) -> Result<LedgerEntry, SlotbookError> {
        let base = format!("booking:{booking_id}");
        let mut reference = base.clone();
        let mut generation = 1_u32;
        while self
            .env
            .ledger
            .find_entry(reversal_reference(&reference))
            .await?
            .is_some()
        {
            generation += 1;
            reference = format!("{base}#{generation}");
        }

        let request = EntryRequest::new(user_id, EntryKind::Debit, amount, reference)
            .with_description("Slot booking")
            .with_metadata(serde_json::json!({ "booking_id": booking_id.to_string() }));
        self.env.apply_entry(request).await
    }

    async fn reverse_debit(&self, debit: &LedgerEntry) {
        let request = EntryRequest::new(
            debit.user_id,
            EntryKind::Refund,
            debit.amount,
            reversal_reference(&debit.reference),
        )
        .with_description("Booking reversal");

        match self.env.apply_entry(request).await {
            Ok(_) => tracing::warn!(reference = %debit.reference, "Booking debit reversed"),
            Err(error) => tracing::error!(
                %error,
                reference = %debit.reference,
                "Failed to reverse booking debit"
            ),
        }
    }

    /// Release positions after a failed attempt, keeping any a stored booking
    /// with the same id now holds.
    async fn release_unclaimed(&self, slot_id: SlotId, booking_id: BookingId, positions: &[PositionKey]) {
        let claimed = match self.env.bookings.load_booking(booking_id).await {
            Ok(Some(booking)) if booking.status == BookingStatus::Confirmed => booking.position_keys(),
            Ok(_) => Vec::new(),
            Err(error) => {
                tracing::error!(%error, "Could not check booking before releasing positions");
                return;
            }
        };
        let unclaimed: Vec<PositionKey> = positions
            .iter()
            .filter(|p| !claimed.contains(p))
            .cloned()
            .collect();
        if unclaimed.is_empty() {
            return;
        }

        match self.env.slots.release(slot_id, booking_id, unclaimed).await {
            Ok(freed) => tracing::warn!(freed, "Released positions after failed booking"),
            Err(error) => tracing::error!(%error, "Failed to release positions after failed booking"),
        }
    }

    /// Cancel a booking, free its positions and refund what it charged.
    ///
    /// Cancelling an already cancelled booking finishes any step an earlier
    /// attempt left undone and returns the booking.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::BookingNotFound`] for an unknown id
    /// - [`SlotbookError::BookingNotActive`] for a completed booking
    #[tracing::instrument(skip(self))]
    pub async fn cancel_booking(&self, booking_id: BookingId) -> Result<Booking, SlotbookError> {
        let booking = self.cancel(booking_id).await?;
        tracing::info!(
            slot_id = %booking.slot_id,
            refunded = %booking.amount_charged,
            "Booking cancelled"
        );
        Ok(booking)
    }

    async fn cancel(&self, booking_id: BookingId) -> Result<Booking, SlotbookError> {
        let booking = self
            .env
            .bookings
            .mark_cancelled(booking_id, self.env.clock.now())
            .await?;

        // A removed slot has no positions left to free.
        match self
            .env
            .slots
            .release(booking.slot_id, booking.id, booking.position_keys())
            .await
        {
            Ok(_) | Err(SlotbookError::SlotNotFound(_)) => {}
            Err(error) => return Err(error),
        }

        if !booking.amount_charged.is_zero() {
            let refund = EntryRequest::new(
                booking.user_id,
                EntryKind::Refund,
                booking.amount_charged,
                format!("refund:{}", booking.id),
            )
            .with_description("Booking cancelled")
            .with_metadata(serde_json::json!({ "booking_id": booking.id.to_string() }));
            self.env.apply_entry(refund).await?;
        }

        self.env
            .notify(Notification::BookingCancelled {
                user_id: booking.user_id,
                booking_id: booking.id,
                refunded: booking.amount_charged,
            })
            .await;

        Ok(booking)
    }

    /// Capacity view of a slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] for an unknown slot.
    pub async fn get_slot_occupancy(&self, slot_id: SlotId) -> Result<SlotOccupancy, SlotbookError> {
        self.env.slots.occupancy(slot_id).await
    }

    /// Create an upcoming slot.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown match type, a blank title or
    /// an empty layout.
    #[tracing::instrument(skip(self, new_slot), fields(title = %new_slot.title))]
    pub async fn create_slot(&self, new_slot: NewSlot) -> Result<Slot, SlotbookError> {
        let slot = new_slot.into_slot(self.env.clock.now())?;
        let slot = self.env.slots.create_slot(slot).await?;
        tracing::info!(
            slot_id = %slot.id,
            match_type = %slot.match_type,
            positions = slot.total_positions(),
            "Slot created"
        );
        Ok(slot)
    }

    /// Slots by start time, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn list_slots(&self, status: Option<SlotStatus>) -> Result<Vec<Slot>, SlotbookError> {
        self.env.slots.list_slots(status).await
    }

    /// Bookings of a slot, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn slot_bookings(
        &self,
        slot_id: SlotId,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, SlotbookError> {
        self.env.bookings.list_for_slot(slot_id, status).await
    }

    /// A user's bookings, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] on backend failure.
    pub async fn user_bookings(&self, user_id: UserId, page: Page) -> Result<Paginated<Booking>, SlotbookError> {
        self.env.bookings.list_for_user(user_id, page).await
    }

    /// Booking figures for a slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::SlotNotFound`] for an unknown slot.
    pub async fn slot_statistics(&self, slot_id: SlotId) -> Result<SlotStatistics, SlotbookError> {
        let occupancy = self.env.slots.occupancy(slot_id).await?;
        let confirmed = self
            .env
            .bookings
            .list_for_slot(slot_id, Some(BookingStatus::Confirmed))
            .await?;

        let revenue = confirmed
            .iter()
            .try_fold(Money::ZERO, |sum, b| sum.checked_add(b.amount_charged))
            .ok_or_else(|| SlotbookError::storage("slot revenue overflows"))?;

        Ok(SlotStatistics {
            slot_id,
            status: occupancy.status,
            confirmed_bookings: confirmed.len(),
            positions_booked: occupancy.occupied,
            positions_available: occupancy.remaining,
            revenue,
        })
    }
}

fn replayed(
    request: &BookingRequest,
    positions: &[PositionKey],
    existing: Booking,
) -> Result<Booking, SlotbookError> {
    if request.matches_booking(&existing, positions) {
        tracing::debug!(status = %existing.status, "Booking replayed");
        Ok(existing)
    } else {
        Err(SlotbookError::IdempotencyConflict {
            key: request.idempotency_key.clone(),
        })
    }
}

/// Amount owed for `count` positions: zero for free matches, otherwise
/// `entry_fee × count`.
fn booking_total(slot: &Slot, count: usize) -> Result<Money, SlotbookError> {
    if slot.match_type.is_free() {
        return Ok(Money::ZERO);
    }
    u64::try_from(count)
        .ok()
        .and_then(|count| slot.entry_fee.checked_mul(count))
        .ok_or_else(|| SlotbookError::InvalidInput("booking total overflows".into()))
}

fn reversal_reference(reference: &str) -> String {
    format!("{reference}:reversal")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use slotbook_testing::fixtures;
    use slotbook_testing::test_epoch;

    #[test]
    fn free_matches_cost_nothing() {
        let now = test_epoch();
        let free = fixtures::slot("free matches", Money::from_major(100), 4, now).unwrap();
        assert_eq!(booking_total(&free, 3).unwrap(), Money::ZERO);

        let duo = fixtures::slot("duo", Money::from_major(100), 4, now).unwrap();
        assert_eq!(booking_total(&duo, 3).unwrap(), Money::from_major(300));
    }

    #[test]
    fn total_overflow_is_rejected() {
        let now = test_epoch();
        let slot = fixtures::slot("solo", Money::from_minor(u64::MAX), 2, now).unwrap();
        assert!(matches!(
            booking_total(&slot, 2),
            Err(SlotbookError::InvalidInput(_))
        ));
    }
}
