//! Slots: one match with a fixed set of bookable positions.
//!
//! Occupancy is the only record of which positions are sold. Remaining
//! capacity is always derived from it, never stored alongside.

use crate::error::SlotbookError;
use crate::types::{BookingId, MatchType, Money, PositionKey, PositionLayout, SlotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Capacity used when a new slot names neither a layout nor a capacity.
pub const DEFAULT_SLOT_CAPACITY: usize = 50;

/// Lifecycle status of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Open for booking, match not started
    Upcoming,
    /// Match in progress
    Live,
    /// Match finished
    Completed,
    /// Called off by an admin; bookings refunded
    Cancelled,
}

impl SlotStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Live => "live",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, SlotbookError> {
        match s {
            "upcoming" => Ok(Self::Upcoming),
            "live" => Ok(Self::Live),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(SlotbookError::storage(format!("invalid slot status: {s}"))),
        }
    }

    /// Completed and cancelled slots never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A match and its occupancy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Slot id
    pub id: SlotId,
    /// Display title
    pub title: String,
    /// Match format
    pub match_type: MatchType,
    /// Fee per position
    pub entry_fee: Money,
    /// Scheduled start
    pub start_time: DateTime<Utc>,
    /// Every bookable position
    pub layout: PositionLayout,
    /// Occupied positions and the booking holding each
    pub occupancy: BTreeMap<PositionKey, BookingId>,
    /// Lifecycle status
    pub status: SlotStatus,
    /// Prize per kill
    pub per_kill_reward: Money,
    /// Total prize pool
    pub total_prize_pool: Money,
    /// Bumped on every status or occupancy change
    pub version: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Slot {
    /// Total positions on the slot.
    #[must_use]
    pub fn total_positions(&self) -> usize {
        self.layout.len()
    }

    /// Occupied position count.
    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.occupancy.len()
    }

    /// Free position count.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.total_positions().saturating_sub(self.occupied_count())
    }

    /// Booking holding `position`, if any.
    #[must_use]
    pub fn occupant(&self, position: &PositionKey) -> Option<BookingId> {
        self.occupancy.get(position).copied()
    }

    /// Check that `booking_id` may occupy every position in `positions`.
    ///
    /// Positions already held by `booking_id` count as free so that a
    /// replayed occupy succeeds.
    ///
    /// # Errors
    ///
    /// - [`SlotbookError::SlotNotBookable`] unless the slot is upcoming
    /// - [`SlotbookError::MatchTypeMismatch`] if `match_type` differs
    /// - [`SlotbookError::UnknownPositions`] for positions not on the layout
    /// - [`SlotbookError::PositionsTaken`] for positions held by another booking
    pub fn check_occupiable(
        &self,
        booking_id: Option<BookingId>,
        match_type: MatchType,
        positions: &[PositionKey],
    ) -> Result<(), SlotbookError> {
        if self.status != SlotStatus::Upcoming {
            return Err(SlotbookError::SlotNotBookable {
                slot_id: self.id,
                status: self.status,
            });
        }

        if self.match_type != match_type {
            return Err(SlotbookError::MatchTypeMismatch {
                expected: self.match_type,
                requested: match_type,
            });
        }

        let unknown: Vec<PositionKey> = positions
            .iter()
            .filter(|p| !self.layout.contains(p))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(SlotbookError::UnknownPositions { positions: unknown });
        }

        let taken: Vec<PositionKey> = positions
            .iter()
            .filter(|p| match self.occupant(p) {
                Some(holder) => Some(holder) != booking_id,
                None => false,
            })
            .cloned()
            .collect();
        if !taken.is_empty() {
            return Err(SlotbookError::PositionsTaken {
                slot_id: self.id,
                positions: taken,
            });
        }

        Ok(())
    }

    /// Snapshot of capacity and free positions.
    #[must_use]
    pub fn occupancy_summary(&self) -> SlotOccupancy {
        SlotOccupancy {
            slot_id: self.id,
            status: self.status,
            total: self.total_positions(),
            occupied: self.occupied_count(),
            remaining: self.remaining(),
            free_positions: self
                .layout
                .iter()
                .filter(|p| !self.occupancy.contains_key(p))
                .cloned()
                .collect(),
        }
    }
}

/// Capacity view of a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOccupancy {
    /// Slot id
    pub slot_id: SlotId,
    /// Status at read time
    pub status: SlotStatus,
    /// Total positions
    pub total: usize,
    /// Occupied positions
    pub occupied: usize,
    /// Free positions (`total - occupied`)
    pub remaining: usize,
    /// Free positions in layout order
    pub free_positions: Vec<PositionKey>,
}

/// Admin request to create a slot.
#[derive(Clone, Debug)]
pub struct NewSlot {
    /// Display title
    pub title: String,
    /// Match format, as entered by the admin
    pub match_type: String,
    /// Fee per position
    pub entry_fee: Money,
    /// Scheduled start
    pub start_time: DateTime<Utc>,
    /// Explicit layout; when absent one is built from `capacity`
    pub layout: Option<PositionLayout>,
    /// Player capacity for the default layout
    pub capacity: Option<usize>,
    /// Prize per kill
    pub per_kill_reward: Money,
    /// Total prize pool
    pub total_prize_pool: Money,
}

impl NewSlot {
    /// Validate the request and build an upcoming slot.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown match type, an empty title or
    /// an empty layout.
    pub fn into_slot(self, now: DateTime<Utc>) -> Result<Slot, SlotbookError> {
        let match_type = MatchType::normalize(&self.match_type)?;

        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(SlotbookError::InvalidInput("slot title is required".into()));
        }

        let layout = match self.layout {
            Some(layout) => layout,
            None => PositionLayout::for_match(
                match_type,
                self.capacity.unwrap_or(DEFAULT_SLOT_CAPACITY),
            ),
        };
        if layout.is_empty() {
            return Err(SlotbookError::InvalidInput(
                "slot must offer at least one position".into(),
            ));
        }

        Ok(Slot {
            id: SlotId::new(),
            title,
            match_type,
            entry_fee: self.entry_fee,
            start_time: self.start_time,
            layout,
            occupancy: BTreeMap::new(),
            status: SlotStatus::Upcoming,
            per_kill_reward: self.per_kill_reward,
            total_prize_pool: self.total_prize_pool,
            version: 0,
            created_at: now,
        })
    }
}

/// Flatten a `team -> labels` selection into sorted position keys.
///
/// # Errors
///
/// Returns [`SlotbookError::InvalidInput`] when the selection is empty or names
/// a position twice.
pub fn flatten_selection(
    selection: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<PositionKey>, SlotbookError> {
    let mut seen = BTreeSet::new();
    let mut positions = Vec::new();

    for (team, labels) in selection {
        for label in labels {
            let key = PositionKey::new(team, label);
            if key.team.is_empty() || key.label.is_empty() {
                return Err(SlotbookError::InvalidInput(
                    "position team and label must not be blank".into(),
                ));
            }
            if !seen.insert(key.clone()) {
                return Err(SlotbookError::InvalidInput(format!(
                    "position {key} selected more than once"
                )));
            }
            positions.push(key);
        }
    }

    if positions.is_empty() {
        return Err(SlotbookError::InvalidInput(
            "at least one position must be selected".into(),
        ));
    }

    positions.sort();
    Ok(positions)
}
