//! Match lifecycle rules.
//!
//! ```text
//! upcoming ──start──▶ live ──start+live_duration──▶ completed
//!    │                 │
//!    │ start+stale     │
//!    └────────────────────────────────────────────▶ completed
//!    └─────admin─────▶ cancelled ◀─────admin──────┘ (from live)
//! ```
//!
//! Pure functions; the runtime scheduler and admin commands decide what to
//! write based on them.

use crate::error::SlotbookError;
use crate::slot::SlotStatus;
use chrono::{DateTime, Duration, Utc};

/// Time windows driving automatic transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleWindows {
    /// How long a match stays live
    pub live_duration: Duration,
    /// How long past its start an upcoming match may stay upcoming
    pub stale_window: Duration,
}

impl Default for LifecycleWindows {
    fn default() -> Self {
        Self {
            live_duration: Duration::minutes(30),
            stale_window: Duration::hours(1),
        }
    }
}

/// Transition the clock makes due for a slot, if any.
#[must_use]
pub fn due_transition(
    status: SlotStatus,
    start_time: DateTime<Utc>,
    now: DateTime<Utc>,
    windows: LifecycleWindows,
) -> Option<SlotStatus> {
    match status {
        SlotStatus::Upcoming if now >= start_time + windows.stale_window => {
            Some(SlotStatus::Completed)
        }
        SlotStatus::Upcoming if now >= start_time => Some(SlotStatus::Live),
        SlotStatus::Live if now >= start_time + windows.live_duration => {
            Some(SlotStatus::Completed)
        }
        _ => None,
    }
}

/// Check an admin-requested transition.
///
/// `cancelled -> cancelled` is accepted so an interrupted cancellation cascade
/// can be re-run.
///
/// # Errors
///
/// Returns [`SlotbookError::InvalidTransition`] for backwards moves and moves
/// out of a terminal status.
pub fn ensure_transition_allowed(from: SlotStatus, to: SlotStatus) -> Result<(), SlotbookError> {
    use SlotStatus::{Cancelled, Completed, Live, Upcoming};

    match (from, to) {
        (Upcoming, Live | Completed | Cancelled) | (Live, Completed | Cancelled) | (Cancelled, Cancelled) => {
            Ok(())
        }
        _ => Err(SlotbookError::InvalidTransition { from, to }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T18:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn upcoming_goes_live_at_start() {
        let w = LifecycleWindows::default();
        assert_eq!(
            due_transition(SlotStatus::Upcoming, start(), start() - Duration::seconds(1), w),
            None
        );
        assert_eq!(
            due_transition(SlotStatus::Upcoming, start(), start(), w),
            Some(SlotStatus::Live)
        );
    }

    #[test]
    fn live_completes_after_live_duration() {
        let w = LifecycleWindows::default();
        assert_eq!(
            due_transition(SlotStatus::Live, start(), start() + Duration::minutes(29), w),
            None
        );
        assert_eq!(
            due_transition(SlotStatus::Live, start(), start() + Duration::minutes(30), w),
            Some(SlotStatus::Completed)
        );
    }

    #[test]
    fn stale_upcoming_completes_directly() {
        let w = LifecycleWindows::default();
        assert_eq!(
            due_transition(SlotStatus::Upcoming, start(), start() + Duration::minutes(61), w),
            Some(SlotStatus::Completed)
        );
    }

    #[test]
    fn terminal_statuses_never_move() {
        let w = LifecycleWindows::default();
        let later = start() + Duration::days(2);
        assert_eq!(due_transition(SlotStatus::Completed, start(), later, w), None);
        assert_eq!(due_transition(SlotStatus::Cancelled, start(), later, w), None);
    }

    #[test]
    fn admin_transition_table() {
        use SlotStatus::{Cancelled, Completed, Live, Upcoming};

        for (from, to) in [
            (Upcoming, Live),
            (Upcoming, Completed),
            (Upcoming, Cancelled),
            (Live, Completed),
            (Live, Cancelled),
            (Cancelled, Cancelled),
        ] {
            assert!(ensure_transition_allowed(from, to).is_ok(), "{from} -> {to}");
        }

        for (from, to) in [
            (Live, Upcoming),
            (Completed, Cancelled),
            (Completed, Live),
            (Cancelled, Upcoming),
            (Cancelled, Completed),
            (Upcoming, Upcoming),
        ] {
            assert!(
                matches!(
                    ensure_transition_allowed(from, to),
                    Err(SlotbookError::InvalidTransition { .. })
                ),
                "{from} -> {to}"
            );
        }
    }
}
