//! Bookings and booking requests.

use crate::error::SlotbookError;
use crate::types::{
    AMOUNT_TOLERANCE, BookingId, EntryId, MatchType, Money, PositionKey, SlotId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Status of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Paid and holding positions
    Confirmed,
    /// Cancelled and refunded
    Cancelled,
    /// The match finished
    Completed,
}

impl BookingStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, SlotbookError> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            _ => Err(SlotbookError::storage(format!("invalid booking status: {s}"))),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A position bought by a booking and the player who will play it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedPosition {
    /// Position
    pub position: PositionKey,
    /// Player name
    pub player_name: String,
}

/// A confirmed, cancelled or completed purchase of positions on a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking id, derived from the user and idempotency key
    pub id: BookingId,
    /// Buyer
    pub user_id: UserId,
    /// Slot booked
    pub slot_id: SlotId,
    /// Normalized match type at booking time
    pub match_type: MatchType,
    /// Positions in `(team, label)` order
    pub positions: Vec<BookedPosition>,
    /// Amount debited
    pub amount_charged: Money,
    /// Debit entry, absent for free bookings
    pub ledger_entry_id: Option<EntryId>,
    /// Client idempotency key
    pub idempotency_key: String,
    /// Status
    pub status: BookingStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Positions held, in order.
    #[must_use]
    pub fn position_keys(&self) -> Vec<PositionKey> {
        self.positions.iter().map(|p| p.position.clone()).collect()
    }
}

/// Client request to book positions.
#[derive(Clone, Debug)]
pub struct BookingRequest {
    /// Buyer
    pub user_id: UserId,
    /// Slot to book
    pub slot_id: SlotId,
    /// Match type as the client saw it, normalized before comparison
    pub match_type: String,
    /// Team name to labels
    pub selected_positions: BTreeMap<String, Vec<String>>,
    /// Player name per position
    pub player_names: BTreeMap<PositionKey, String>,
    /// Total the client expects to pay
    pub expected_amount: Money,
    /// Client idempotency key
    pub idempotency_key: String,
}

impl BookingRequest {
    /// Booking id this request maps to.
    #[must_use]
    pub fn booking_id(&self) -> BookingId {
        BookingId::for_request(self.user_id, &self.idempotency_key)
    }

    /// Pair each position with its trimmed player name.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::MissingPlayerNames`] listing every position
    /// without a non-blank name.
    pub fn named_positions(
        &self,
        positions: &[PositionKey],
    ) -> Result<Vec<BookedPosition>, SlotbookError> {
        let mut missing = Vec::new();
        let mut named = Vec::with_capacity(positions.len());

        for position in positions {
            match self.player_names.get(position).map(|n| n.trim()) {
                Some(name) if !name.is_empty() => named.push(BookedPosition {
                    position: position.clone(),
                    player_name: name.to_string(),
                }),
                _ => missing.push(position.clone()),
            }
        }

        if missing.is_empty() {
            named.sort_by(|a, b| a.position.cmp(&b.position));
            Ok(named)
        } else {
            Err(SlotbookError::MissingPlayerNames { positions: missing })
        }
    }

    /// `true` when `booking` is what this request would have created: same
    /// buyer, slot, positions and player names, and an expected amount within
    /// [`AMOUNT_TOLERANCE`] of the amount charged.
    ///
    /// `positions` must be sorted, as [`crate::slot::flatten_selection`]
    /// returns them.
    #[must_use]
    pub fn matches_booking(&self, booking: &Booking, positions: &[PositionKey]) -> bool {
        booking.user_id == self.user_id
            && booking.slot_id == self.slot_id
            && booking.position_keys() == positions
            && booking.amount_charged.abs_diff(self.expected_amount) <= AMOUNT_TOLERANCE
            && booking.positions.iter().all(|booked| {
                self.player_names
                    .get(&booked.position)
                    .is_some_and(|name| name.trim() == booked.player_name)
            })
    }
}
