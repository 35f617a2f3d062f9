//! Integration tests for slot lifecycle transitions and the match scheduler.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use chrono::Duration as ChronoDuration;
use common::{Harness, major};
use slotbook_core::SlotbookError;
use slotbook_core::booking::BookingStatus;
use slotbook_core::environment::Clock;
use slotbook_core::slot::SlotStatus;
use slotbook_core::store::SlotInventory;
use slotbook_core::types::{Money, Page};
use slotbook_runtime::SchedulerConfig;
use slotbook_testing::StoreOperation;
use slotbook_testing::fixtures::{booking_request, pos};
use std::time::Duration;

// ============================================================================
// Clock-driven transitions
// ============================================================================

#[tokio::test]
async fn slot_goes_live_then_completes_with_its_bookings() {
    let h = Harness::new();
    let slot = h.upcoming_slot("solo", major(10), 4).await;
    let user = h.funded_user(major(100));
    let booking = h
        .engine
        .create_booking(booking_request(user, slot.id, "solo", &[pos("Team 1", "A")], major(10), "k"))
        .await
        .unwrap();
    let scheduler = h.engine.scheduler(SchedulerConfig::default());

    let report = scheduler.run_once(slot.start_time - ChronoDuration::seconds(1)).await.unwrap();
    assert_eq!(report.examined, 1);
    assert!(report.transitioned.is_empty());

    let report = scheduler.run_once(slot.start_time).await.unwrap();
    assert_eq!(report.transitioned, vec![(slot.id, SlotStatus::Live)]);

    h.clock.set(slot.start_time + ChronoDuration::minutes(30));
    let report = scheduler.run_once(h.clock.now()).await.unwrap();
    assert_eq!(report.transitioned, vec![(slot.id, SlotStatus::Completed)]);

    let bookings = h.engine.slot_bookings(slot.id, None).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].id, booking.id);
    assert_eq!(bookings[0].status, BookingStatus::Completed);

    // Completed slots are no longer examined
    let report = scheduler.run_once(h.clock.now() + ChronoDuration::hours(1)).await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn stale_upcoming_slot_is_completed_directly() {
    let h = Harness::new();
    let slot = h.upcoming_slot("duo", major(10), 4).await;
    let scheduler = h.engine.scheduler(SchedulerConfig::default());

    let report = scheduler
        .run_once(slot.start_time + ChronoDuration::hours(1))
        .await
        .unwrap();

    assert_eq!(report.transitioned, vec![(slot.id, SlotStatus::Completed)]);
    let slots = h.engine.list_slots(Some(SlotStatus::Completed)).await.unwrap();
    assert_eq!(slots.len(), 1);
}

#[tokio::test]
async fn a_failing_slot_does_not_stop_the_pass() {
    let h = Harness::new();
    let first = h.upcoming_slot("solo", major(10), 2).await;
    h.clock.advance(ChronoDuration::minutes(5));
    let second = h.upcoming_slot("solo", major(10), 2).await;
    let scheduler = h.engine.scheduler(SchedulerConfig::default());
    h.store.inject_failure(StoreOperation::TransitionStatus);

    let report = scheduler.run_once(second.start_time).await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, first.id);
    assert_eq!(report.transitioned, vec![(second.id, SlotStatus::Live)]);
}

// ============================================================================
// Admin transitions
// ============================================================================

#[tokio::test]
async fn cancelling_a_slot_refunds_every_booking() {
    let h = Harness::new();
    let slot = h.upcoming_slot("duo", major(100), 4).await;
    let alice = h.funded_user(major(200));
    let bob = h.funded_user(major(200));
    h.engine
        .create_booking(booking_request(
            alice,
            slot.id,
            "duo",
            &[pos("Team 1", "A"), pos("Team 1", "B")],
            major(200),
            "a",
        ))
        .await
        .unwrap();
    h.engine
        .create_booking(booking_request(bob, slot.id, "duo", &[pos("Team 2", "A")], major(100), "b"))
        .await
        .unwrap();

    let cancelled = h
        .engine
        .transition_match_status(slot.id, SlotStatus::Cancelled)
        .await
        .unwrap();

    assert_eq!(cancelled.status, SlotStatus::Cancelled);
    assert_eq!(h.engine.get_balance(alice).await.unwrap(), major(200));
    assert_eq!(h.engine.get_balance(bob).await.unwrap(), major(200));
    assert!(
        h.engine
            .slot_bookings(slot.id, None)
            .await
            .unwrap()
            .iter()
            .all(|b| b.status == BookingStatus::Cancelled)
    );
    assert_eq!(h.engine.get_slot_occupancy(slot.id).await.unwrap().occupied, 0);
}

#[tokio::test]
async fn repeated_cancellation_finishes_an_interrupted_cascade() {
    let h = Harness::new();
    let slot = h.upcoming_slot("solo", major(50), 4).await;
    let user = h.funded_user(major(50));
    h.engine
        .create_booking(booking_request(user, slot.id, "solo", &[pos("Team 1", "A")], major(50), "k"))
        .await
        .unwrap();
    h.store.inject_failure(StoreOperation::MarkCancelled);

    assert!(
        h.engine
            .transition_match_status(slot.id, SlotStatus::Cancelled)
            .await
            .is_err()
    );
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(0));

    h.engine
        .transition_match_status(slot.id, SlotStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(50));
}

#[tokio::test]
async fn backwards_and_terminal_moves_are_rejected() {
    let h = Harness::new();
    let slot = h.upcoming_slot("solo", major(10), 2).await;

    h.engine
        .transition_match_status(slot.id, SlotStatus::Completed)
        .await
        .unwrap();

    let err = h
        .engine
        .transition_match_status(slot.id, SlotStatus::Live)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SlotbookError::InvalidTransition {
            from: SlotStatus::Completed,
            to: SlotStatus::Live,
        }
    );

    let err = h
        .engine
        .transition_match_status(slot.id, SlotStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, SlotbookError::InvalidTransition { .. }));
}

#[tokio::test]
async fn winnings_require_a_completed_slot() {
    let h = Harness::new();
    let slot = h.upcoming_slot("solo", major(10), 2).await;
    let user = h.funded_user(major(0));

    let err = h.engine.award_winnings(slot.id, user, major(300)).await.unwrap_err();
    assert_eq!(
        err,
        SlotbookError::SlotNotCompleted {
            slot_id: slot.id,
            status: SlotStatus::Upcoming,
        }
    );

    h.engine
        .transition_match_status(slot.id, SlotStatus::Completed)
        .await
        .unwrap();
    let win = h.engine.award_winnings(slot.id, user, major(300)).await.unwrap();
    assert_eq!(win.reference, format!("win:{}:{user}", slot.id));

    // One award per user and slot
    let again = h.engine.award_winnings(slot.id, user, major(300)).await.unwrap();
    assert_eq!(again.id, win.id);
    let err = h.engine.award_winnings(slot.id, user, major(500)).await.unwrap_err();
    assert!(matches!(err, SlotbookError::DuplicateReference { .. }));

    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(300));
}

// ============================================================================
// Slot removal
// ============================================================================

#[tokio::test]
async fn removing_an_open_slot_refunds_and_hides_it() {
    let h = Harness::new();
    let slot = h.upcoming_slot("duo", major(100), 4).await;
    let user = h.funded_user(major(200));
    let booking = h
        .engine
        .create_booking(booking_request(user, slot.id, "duo", &[pos("Team 1", "A")], major(100), "k"))
        .await
        .unwrap();

    let removed = h.engine.remove_slot(slot.id).await.unwrap();
    assert_eq!(removed.status, SlotStatus::Cancelled);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(200));

    assert!(h.engine.list_slots(None).await.unwrap().is_empty());
    assert_eq!(
        h.engine.get_slot_occupancy(slot.id).await.unwrap_err(),
        SlotbookError::SlotNotFound(slot.id)
    );
    assert_eq!(
        h.engine.remove_slot(slot.id).await.unwrap_err(),
        SlotbookError::SlotNotFound(slot.id)
    );

    // History survives the slot.
    let history = h.engine.user_bookings(user, Page::new(1, 10)).await.unwrap();
    assert_eq!(history.items.len(), 1);
    assert_eq!(history.items[0].id, booking.id);
    assert_eq!(history.items[0].status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn removing_a_completed_slot_keeps_its_bookings_completed() {
    let h = Harness::new();
    let slot = h.upcoming_slot("solo", major(10), 4).await;
    let user = h.funded_user(major(100));
    h.engine
        .create_booking(booking_request(user, slot.id, "solo", &[pos("Team 1", "A")], major(10), "k"))
        .await
        .unwrap();
    h.engine
        .transition_match_status(slot.id, SlotStatus::Completed)
        .await
        .unwrap();

    let removed = h.engine.remove_slot(slot.id).await.unwrap();

    assert_eq!(removed.status, SlotStatus::Completed);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(90));
    let booking = h.store.all_bookings().pop().unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
}

#[tokio::test]
async fn interrupted_removal_resumes_on_retry() {
    let h = Harness::new();
    let slot = h.upcoming_slot("solo", major(10), 4).await;
    let user = h.funded_user(major(10));
    h.engine
        .create_booking(booking_request(user, slot.id, "solo", &[pos("Team 1", "A")], major(10), "k"))
        .await
        .unwrap();
    h.store.inject_failure(StoreOperation::MarkCancelled);

    assert!(h.engine.remove_slot(slot.id).await.is_err());
    let listed = h.engine.list_slots(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SlotStatus::Cancelled);

    h.engine.remove_slot(slot.id).await.unwrap();
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(10));
    assert!(h.engine.list_slots(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn orphaned_bookings_are_refunded_once() {
    let h = Harness::new();
    let slot = h.upcoming_slot("duo", major(50), 4).await;
    let kept = h.upcoming_slot("duo", major(50), 4).await;
    let user = h.funded_user(major(100));
    h.engine
        .create_booking(booking_request(user, slot.id, "duo", &[pos("Team 1", "A")], major(50), "gone"))
        .await
        .unwrap();
    h.engine
        .create_booking(booking_request(user, kept.id, "duo", &[pos("Team 1", "A")], major(50), "kept"))
        .await
        .unwrap();

    // Closed and archived without the cancellation cascade.
    h.store
        .transition_status(slot.id, SlotStatus::Upcoming, SlotStatus::Cancelled)
        .await
        .unwrap();
    assert!(h.store.archive_slot(slot.id, h.clock.now()).await.unwrap());
    assert_eq!(h.engine.get_balance(user).await.unwrap(), Money::ZERO);

    assert_eq!(h.engine.cleanup_orphaned_bookings().await.unwrap(), 1);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(50));
    assert_eq!(h.engine.cleanup_orphaned_bookings().await.unwrap(), 0);
    assert_eq!(h.engine.get_balance(user).await.unwrap(), major(50));

    let statuses: Vec<BookingStatus> = h.store.all_bookings().iter().map(|b| b.status).collect();
    assert_eq!(statuses, vec![BookingStatus::Cancelled, BookingStatus::Confirmed]);
    assert_eq!(h.engine.get_slot_occupancy(kept.id).await.unwrap().occupied, 1);
}

// ============================================================================
// Scheduler task
// ============================================================================

#[tokio::test]
async fn scheduler_starts_once_and_stops() {
    let h = Harness::new();
    let slot = h.upcoming_slot("solo", major(10), 2).await;
    h.clock.set(slot.start_time);

    let scheduler = h.engine.scheduler(SchedulerConfig {
        interval: Duration::from_millis(10),
    });
    assert!(!scheduler.is_running());
    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(scheduler.is_running());

    let went_live = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let occupancy = h.engine.get_slot_occupancy(slot.id).await.unwrap();
            if occupancy.status == SlotStatus::Live {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(went_live.is_ok(), "first tick should move the slot live");

    scheduler.stop().await;
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn zero_interval_scheduler_keeps_ticking() {
    let h = Harness::new();
    let first = h.upcoming_slot("solo", major(10), 2).await;
    h.clock.set(first.start_time);

    let scheduler = h.engine.scheduler(SchedulerConfig {
        interval: Duration::ZERO,
    });
    assert!(scheduler.start());

    let status_of = |slot_id| {
        let engine = h.engine.clone();
        async move { engine.get_slot_occupancy(slot_id).await.unwrap().status }
    };
    let went_live = tokio::time::timeout(Duration::from_secs(5), async {
        while status_of(first.id).await != SlotStatus::Live {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(went_live.is_ok(), "a zero interval is raised to the minimum");
    assert!(scheduler.is_running());

    // Later ticks still run
    let second = h.upcoming_slot("solo", major(10), 2).await;
    h.clock.set(second.start_time);
    let second_live = tokio::time::timeout(Duration::from_secs(5), async {
        while status_of(second.id).await != SlotStatus::Live {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(second_live.is_ok());

    scheduler.stop().await;
    assert!(!scheduler.is_running());
}
