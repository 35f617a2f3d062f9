//! Slot status transitions, from admin commands and from the clock.
//!
//! Every write is conditional on the status it was computed from, so an admin
//! command and a scheduler tick racing on the same slot cannot both apply.
//!
//! Removing a slot closes it first and then archives it. A booking that
//! commits against a removed slot is cancelled when it re-reads the slot;
//! [`LifecycleService::cleanup_orphaned_bookings`] catches any left behind.

use crate::SlotbookEnvironment;
use crate::coordinator::ReservationCoordinator;
use crate::metrics::SchedulerMetrics;
use chrono::{DateTime, Utc};
use slotbook_core::SlotbookError;
use slotbook_core::booking::{Booking, BookingStatus};
use slotbook_core::lifecycle::{LifecycleWindows, due_transition, ensure_transition_allowed};
use slotbook_core::slot::{Slot, SlotStatus};
use slotbook_core::types::SlotId;

/// What one scheduler pass did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Upcoming and live slots looked at
    pub examined: usize,
    /// Slots moved, with their new status
    pub transitioned: Vec<(SlotId, SlotStatus)>,
    /// Slots whose transition failed
    pub failed: Vec<(SlotId, SlotbookError)>,
}

/// Applies slot transitions and their side effects on bookings.
#[derive(Clone, Debug)]
pub struct LifecycleService {
    env: SlotbookEnvironment,
    coordinator: ReservationCoordinator,
    windows: LifecycleWindows,
}

impl LifecycleService {
    /// Create the service.
    #[must_use]
    pub fn new(env: SlotbookEnvironment, windows: LifecycleWindows) -> Self {
        Self {
            coordinator: ReservationCoordinator::new(env.clone()),
            env,
            windows,
        }
    }

    /// Windows used by [`LifecycleService::advance_due`].
    #[must_use]
    pub const fn windows(&self) -> LifecycleWindows {
        self.windows
    }

    /// Admin transition.
    ///
    /// Completing a slot completes its confirmed bookings. Cancelling it
    /// cancels and refunds every confirmed booking; cancelling an already
    /// cancelled slot re-runs that cascade.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::InvalidTransition`] for backwards moves and moves out
    ///   of `completed`
    /// - [`SlotbookError::ConcurrentModification`] if the slot changed status
    ///   under us
    /// - the first booking error of a cancellation cascade; the remaining
    ///   bookings are still processed
    #[tracing::instrument(skip(self))]
    pub async fn transition_match_status(
        &self,
        slot_id: SlotId,
        target: SlotStatus,
    ) -> Result<Slot, SlotbookError> {
        let slot = self.env.slots.load_slot(slot_id).await?;
        ensure_transition_allowed(slot.status, target)?;

        let updated = if slot.status == target {
            slot
        } else {
            self.env
                .slots
                .transition_status(slot_id, slot.status, target)
                .await?
                .ok_or_else(|| SlotbookError::ConcurrentModification {
                    resource: format!("slot {slot_id}"),
                })?
        };
        tracing::info!(status = %updated.status, "Slot status set by admin");
        SchedulerMetrics::record_transition(target, "admin");

        self.after_transition(&updated).await?;
        Ok(updated)
    }

    /// Admin removal of a slot.
    ///
    /// An upcoming, live or cancelled slot is cancelled first, which cancels
    /// and refunds its confirmed bookings. The closed slot is then archived:
    /// its bookings stay in the users' history, the slot itself is no longer
    /// loaded or listed. A completed slot is archived as is.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::SlotNotFound`] for an unknown or already removed slot
    /// - the first booking error of the cancellation cascade; the slot is then
    ///   left cancelled but not archived, and removing it again resumes
    /// - [`SlotbookError::ConcurrentModification`] if the slot was reopened
    ///   under us
    #[tracing::instrument(skip(self))]
    pub async fn remove_slot(&self, slot_id: SlotId) -> Result<Slot, SlotbookError> {
        let slot = self.env.slots.load_slot(slot_id).await?;
        let closed = match slot.status {
            SlotStatus::Completed => slot,
            SlotStatus::Upcoming | SlotStatus::Live | SlotStatus::Cancelled => {
                self.transition_match_status(slot_id, SlotStatus::Cancelled).await?
            }
        };

        if !self.env.slots.archive_slot(slot_id, self.env.clock.now()).await? {
            return Err(SlotbookError::ConcurrentModification {
                resource: format!("slot {slot_id}"),
            });
        }

        tracing::info!(status = %closed.status, "Slot removed by admin");
        SchedulerMetrics::record_removal();
        Ok(closed)
    }

    /// Cancel and refund every confirmed booking whose slot is missing or
    /// archived. Returns how many were cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first cancellation error; the remaining bookings are still
    /// processed.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_orphaned_bookings(&self) -> Result<usize, SlotbookError> {
        let orphans = self.env.bookings.list_orphaned().await?;
        if orphans.is_empty() {
            return Ok(0);
        }

        let result = self.cancel_all(orphans).await;
        if let Ok(cancelled) = result {
            tracing::info!(cancelled, "Orphaned bookings cancelled");
            SchedulerMetrics::record_orphans_cancelled(cancelled);
        }
        result
    }

    /// Apply every transition the clock makes due at `now`.
    ///
    /// A failing slot is logged and recorded in the report; the others are
    /// still processed.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] only if the candidate slots cannot be
    /// listed.
    pub async fn advance_due(&self, now: DateTime<Utc>) -> Result<TickReport, SlotbookError> {
        let mut candidates = self.env.slots.list_slots(Some(SlotStatus::Upcoming)).await?;
        candidates.extend(self.env.slots.list_slots(Some(SlotStatus::Live)).await?);

        let mut report = TickReport {
            examined: candidates.len(),
            ..TickReport::default()
        };

        for slot in candidates {
            let Some(target) = due_transition(slot.status, slot.start_time, now, self.windows) else {
                continue;
            };

            match self.apply_due(&slot, target).await {
                Ok(true) => {
                    tracing::info!(slot_id = %slot.id, from = %slot.status, to = %target, "Slot transitioned");
                    SchedulerMetrics::record_transition(target, "scheduler");
                    report.transitioned.push((slot.id, target));
                }
                Ok(false) => {
                    tracing::debug!(slot_id = %slot.id, "Slot already moved by another writer");
                }
                Err(error) => {
                    tracing::error!(slot_id = %slot.id, %error, "Slot transition failed");
                    SchedulerMetrics::record_failure();
                    report.failed.push((slot.id, error));
                }
            }
        }

        Ok(report)
    }

    async fn apply_due(&self, slot: &Slot, target: SlotStatus) -> Result<bool, SlotbookError> {
        match self
            .env
            .slots
            .transition_status(slot.id, slot.status, target)
            .await?
        {
            Some(updated) => {
                self.after_transition(&updated).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn after_transition(&self, slot: &Slot) -> Result<(), SlotbookError> {
        match slot.status {
            SlotStatus::Completed => {
                let completed = self
                    .env
                    .bookings
                    .complete_for_slot(slot.id, self.env.clock.now())
                    .await?;
                tracing::debug!(slot_id = %slot.id, completed, "Bookings completed");
            }
            SlotStatus::Cancelled => {
                let cancelled = self.cascade_cancellation(slot.id).await?;
                tracing::info!(slot_id = %slot.id, cancelled, "Bookings cancelled with slot");
            }
            SlotStatus::Upcoming | SlotStatus::Live => {}
        }
        Ok(())
    }

    async fn cascade_cancellation(&self, slot_id: SlotId) -> Result<usize, SlotbookError> {
        let confirmed = self
            .env
            .bookings
            .list_for_slot(slot_id, Some(BookingStatus::Confirmed))
            .await?;
        self.cancel_all(confirmed).await
    }

    async fn cancel_all(&self, bookings: Vec<Booking>) -> Result<usize, SlotbookError> {
        let mut cancelled = 0;
        let mut first_error = None;
        for booking in bookings {
            match self.coordinator.cancel_booking(booking.id).await {
                Ok(_) => cancelled += 1,
                Err(error) => {
                    tracing::error!(booking_id = %booking.id, %error, "Cascade cancellation failed");
                    first_error.get_or_insert(error);
                }
            }
        }

        first_error.map_or(Ok(cancelled), Err)
    }
}
