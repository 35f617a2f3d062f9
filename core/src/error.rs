//! Error taxonomy for every Slotbook operation.
//!
//! Each [`SlotbookError`] variant belongs to exactly one [`ErrorKind`]. Callers
//! branch on the kind (retry, map to a status code); the variant carries the
//! detail for logs and messages.

use crate::booking::BookingStatus;
use crate::ledger::EntryStatus;
use crate::slot::SlotStatus;
use crate::types::{BookingId, MatchType, Money, PositionKey, SlotId, UserId};
use thiserror::Error;

/// Coarse classification of an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request is malformed or inconsistent with the slot
    Validation,
    /// Lost a race or reused a reference
    Conflict,
    /// Wallet balance too low
    InsufficientFunds,
    /// Referenced entity does not exist
    NotFound,
    /// Entity is in the wrong lifecycle state
    State,
    /// External collaborator failed
    Upstream,
    /// Backend unavailable
    Storage,
}

/// Errors returned by Slotbook operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotbookError {
    /// Malformed request field.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Match type string outside the alias table.
    #[error("Unknown match type: {0}")]
    UnknownMatchType(String),

    /// Requested match type differs from the slot's.
    #[error("Match type mismatch: slot is {expected}, request was {requested}")]
    MatchTypeMismatch {
        /// Slot's match type
        expected: MatchType,
        /// Requested match type
        requested: MatchType,
    },

    /// Client total differs from the computed fee.
    #[error("Amount mismatch: expected {expected}, received {received}")]
    AmountMismatch {
        /// Computed fee
        expected: Money,
        /// Client total
        received: Money,
    },

    /// Positions without a player name.
    #[error("Missing player names for: {}", join_positions(.positions))]
    MissingPlayerNames {
        /// Offending positions
        positions: Vec<PositionKey>,
    },

    /// Positions that do not exist on the slot.
    #[error("Unknown positions: {}", join_positions(.positions))]
    UnknownPositions {
        /// Offending positions
        positions: Vec<PositionKey>,
    },

    /// Positions already held by another booking.
    #[error("Positions already taken on slot {slot_id}: {}", join_positions(.positions))]
    PositionsTaken {
        /// Slot
        slot_id: SlotId,
        /// Positions held by others
        positions: Vec<PositionKey>,
    },

    /// Ledger reference reused with a different payload.
    #[error("Reference {reference} already used with a different payload")]
    DuplicateReference {
        /// The reference
        reference: String,
    },

    /// Idempotency key reused with a different booking request.
    #[error("Idempotency key {key} already used for a different booking")]
    IdempotencyConflict {
        /// The key
        key: String,
    },

    /// A conditional write lost to a concurrent writer.
    #[error("Concurrent modification of {resource}")]
    ConcurrentModification {
        /// What was being written
        resource: String,
    },

    /// Decrease larger than the balance.
    #[error("Insufficient funds: balance {available}, requested {requested}")]
    InsufficientFunds {
        /// Current balance
        available: Money,
        /// Requested amount
        requested: Money,
    },

    /// No such slot.
    #[error("Slot not found: {0}")]
    SlotNotFound(SlotId),

    /// No wallet for this user.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// No such booking.
    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    /// No ledger entry with this reference.
    #[error("Ledger entry not found: {0}")]
    EntryNotFound(String),

    /// Slot is not open for booking.
    #[error("Slot {slot_id} is {status} and not open for booking")]
    SlotNotBookable {
        /// Slot
        slot_id: SlotId,
        /// Current status
        status: SlotStatus,
    },

    /// Disallowed lifecycle transition.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: SlotStatus,
        /// Requested status
        to: SlotStatus,
    },

    /// Operation requires a completed match.
    #[error("Slot {slot_id} is {status}, not completed")]
    SlotNotCompleted {
        /// Slot
        slot_id: SlotId,
        /// Current status
        status: SlotStatus,
    },

    /// Hold already approved or rejected.
    #[error("Entry {reference} is already {status}")]
    AlreadyResolved {
        /// Hold reference
        reference: String,
        /// Current status
        status: EntryStatus,
    },

    /// Booking cannot take this action in its current status.
    #[error("Booking {booking_id} is {status}")]
    BookingNotActive {
        /// Booking
        booking_id: BookingId,
        /// Current status
        status: BookingStatus,
    },

    /// External collaborator failure.
    #[error("Upstream service error: {0}")]
    Upstream(String),

    /// Backend failure. The detail is logged, never displayed.
    #[error("Storage unavailable")]
    Storage {
        /// Backend message
        detail: String,
    },
}

impl SlotbookError {
    /// Build a storage error from any backend message.
    #[must_use]
    pub fn storage(detail: impl Into<String>) -> Self {
        Self::Storage {
            detail: detail.into(),
        }
    }

    /// Taxonomy bucket of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_)
            | Self::UnknownMatchType(_)
            | Self::MatchTypeMismatch { .. }
            | Self::AmountMismatch { .. }
            | Self::MissingPlayerNames { .. }
            | Self::UnknownPositions { .. } => ErrorKind::Validation,
            Self::PositionsTaken { .. }
            | Self::DuplicateReference { .. }
            | Self::IdempotencyConflict { .. }
            | Self::ConcurrentModification { .. } => ErrorKind::Conflict,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::SlotNotFound(_)
            | Self::UserNotFound(_)
            | Self::BookingNotFound(_)
            | Self::EntryNotFound(_) => ErrorKind::NotFound,
            Self::SlotNotBookable { .. }
            | Self::InvalidTransition { .. }
            | Self::SlotNotCompleted { .. }
            | Self::AlreadyResolved { .. }
            | Self::BookingNotActive { .. } => ErrorKind::State,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// `true` if the caller may retry with the same idempotency key.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Upstream | ErrorKind::Storage)
            || matches!(self, Self::ConcurrentModification { .. })
    }

    /// HTTP status code for an outer API layer.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::InsufficientFunds => 402,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict | ErrorKind::State => 409,
            ErrorKind::Upstream => 502,
            ErrorKind::Storage => 503,
        }
    }
}

fn join_positions(positions: &[PositionKey]) -> String {
    positions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
