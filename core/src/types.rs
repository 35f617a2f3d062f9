//! Value objects shared by every Slotbook component.
//!
//! Identifiers, money in minor units, the match type alias table, position
//! keys and pagination. Entities (slots, bookings, ledger entries) live in
//! their own modules and are built from these.

use crate::error::SlotbookError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a wallet holder
    UserId
);
uuid_id!(
    /// Unique identifier for an admin acting on holds or slots
    AdminId
);
uuid_id!(
    /// Unique identifier for a slot (one tournament match)
    SlotId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a ledger entry
    EntryId
);

impl BookingId {
    /// Derive the booking id for a client request.
    ///
    /// The same `(user, idempotency key)` pair always maps to the same id, so a
    /// retried request lands on the booking the first attempt created.
    #[must_use]
    pub fn for_request(user_id: UserId, idempotency_key: &str) -> Self {
        Self(Uuid::new_v5(user_id.as_uuid(), idempotency_key.as_bytes()))
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount of currency in minor units (paise).
///
/// Never negative. Arithmetic is checked; callers turn `None` into a typed
/// error instead of wrapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Create from minor units.
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Create from whole major units (rupees).
    #[must_use]
    pub const fn from_major(major: u64) -> Self {
        Self(major * 100)
    }

    /// Minor units.
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// `true` when the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked subtraction, `None` when the result would be negative.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked multiplication by a count.
    #[must_use]
    pub const fn checked_mul(self, count: u64) -> Option<Self> {
        match self.0.checked_mul(count) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Absolute difference between two amounts.
    #[must_use]
    pub const fn abs_diff(self, other: Self) -> Self {
        Self(self.0.abs_diff(other.0))
    }

    /// Convert to the signed representation used by the SQL backend.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::InvalidInput`] above `i64::MAX` minor units.
    pub fn to_i64(self) -> Result<i64, SlotbookError> {
        i64::try_from(self.0)
            .map_err(|_| SlotbookError::InvalidInput(format!("amount {self} out of range")))
    }

    /// Convert from the signed representation used by the SQL backend.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::InvalidInput`] for negative values.
    pub fn from_i64(minor: i64) -> Result<Self, SlotbookError> {
        u64::try_from(minor)
            .map(Self)
            .map_err(|_| SlotbookError::InvalidInput(format!("negative amount {minor}")))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "₹{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Largest difference between a client's stated total and the computed fee
/// that is still accepted (0.01 in major units).
pub const AMOUNT_TOLERANCE: Money = Money::from_minor(1);

// ============================================================================
// Match type
// ============================================================================

/// Format of a match. Determines team size and whether entry is free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// One player per team
    Solo,
    /// Two players per team
    Duo,
    /// Four players per team
    Squad,
    /// Four-a-side clash squad rounds
    ClashSquad,
    /// Lone wolf duels
    LoneWolf,
    /// Survival mode
    Survival,
    /// No entry fee is charged
    FreeMatches,
}

/// Alias table used by [`MatchType::normalize`]. Keys are lowercase with
/// single spaces.
const MATCH_TYPE_ALIASES: &[(&str, MatchType)] = &[
    ("solo", MatchType::Solo),
    ("duo", MatchType::Duo),
    ("squad", MatchType::Squad),
    ("full map", MatchType::Squad),
    ("fullmap", MatchType::Squad),
    ("full-map", MatchType::Squad),
    ("clash squad", MatchType::ClashSquad),
    ("clashsquad", MatchType::ClashSquad),
    ("clash_squad", MatchType::ClashSquad),
    ("lone wolf", MatchType::LoneWolf),
    ("lonewolf", MatchType::LoneWolf),
    ("lone_wolf", MatchType::LoneWolf),
    ("survival", MatchType::Survival),
    ("free matches", MatchType::FreeMatches),
    ("free match", MatchType::FreeMatches),
    ("free_matches", MatchType::FreeMatches),
    ("free", MatchType::FreeMatches),
];

impl MatchType {
    /// Map a client-supplied match type string to its canonical value.
    ///
    /// Case and surrounding/internal whitespace are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::UnknownMatchType`] for strings outside the
    /// alias table.
    pub fn normalize(raw: &str) -> Result<Self, SlotbookError> {
        let folded = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        MATCH_TYPE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == folded)
            .map(|(_, match_type)| *match_type)
            .ok_or_else(|| SlotbookError::UnknownMatchType(raw.to_string()))
    }

    /// Canonical storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Duo => "duo",
            Self::Squad => "squad",
            Self::ClashSquad => "clash_squad",
            Self::LoneWolf => "lone_wolf",
            Self::Survival => "survival",
            Self::FreeMatches => "free_matches",
        }
    }

    /// Players per team, used to build the default position layout.
    #[must_use]
    pub const fn team_size(&self) -> usize {
        match self {
            Self::Solo | Self::Survival | Self::FreeMatches => 1,
            Self::Duo | Self::LoneWolf => 2,
            Self::Squad | Self::ClashSquad => 4,
        }
    }

    /// Free matches never charge an entry fee, whatever the slot's fee says.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self, Self::FreeMatches)
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = SlotbookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

// ============================================================================
// Positions
// ============================================================================

/// One bookable position: a label within a team, e.g. `("Team 3", "B")`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    /// Team name
    pub team: String,
    /// Label within the team
    pub label: String,
}

impl PositionKey {
    /// Create a key, trimming both parts.
    #[must_use]
    pub fn new(team: impl AsRef<str>, label: impl AsRef<str>) -> Self {
        Self {
            team: team.as_ref().trim().to_string(),
            label: label.as_ref().trim().to_string(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.team, self.label)
    }
}

/// The full set of positions a slot offers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLayout(BTreeSet<PositionKey>);

impl PositionLayout {
    /// `team_count` teams named `Team 1..=n`, each labelled `A`, `B`, ...
    ///
    /// Team size is capped at 26 labels.
    #[must_use]
    pub fn teams(team_count: usize, team_size: usize) -> Self {
        let mut positions = BTreeSet::new();
        for team in 1..=team_count {
            for label in (b'A'..=b'Z').take(team_size) {
                positions.insert(PositionKey::new(
                    format!("Team {team}"),
                    char::from(label).to_string(),
                ));
            }
        }
        Self(positions)
    }

    /// Default layout for a match type: enough whole teams to seat
    /// `capacity` players.
    #[must_use]
    pub fn for_match(match_type: MatchType, capacity: usize) -> Self {
        let size = match_type.team_size();
        Self::teams(capacity.div_ceil(size), size)
    }

    /// Build a layout from explicit positions.
    #[must_use]
    pub fn from_positions(positions: impl IntoIterator<Item = PositionKey>) -> Self {
        Self(positions.into_iter().collect())
    }

    /// Number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when the layout has no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `true` when the position exists on this layout.
    #[must_use]
    pub fn contains(&self, position: &PositionKey) -> bool {
        self.0.contains(position)
    }

    /// Positions in `(team, label)` order.
    pub fn iter(&self) -> impl Iterator<Item = &PositionKey> {
        self.0.iter()
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Default page size for history listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound on page size.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A 1-based page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    number: u32,
    size: u32,
}

impl Page {
    /// Create a page request, clamping to `number >= 1` and
    /// `1 <= size <= MAX_PAGE_SIZE`.
    #[must_use]
    pub fn new(number: u32, size: u32) -> Self {
        Self {
            number: number.max(1),
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Page number, starting at 1.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Items per page.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Items to skip.
    #[must_use]
    pub fn offset(&self) -> u64 {
        (u64::from(self.number) - 1) * u64::from(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// One page of results with navigation metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Total matching items across all pages
    pub total: u64,
    /// Page number
    pub page: u32,
    /// Page size
    pub size: u32,
    /// Number of pages
    pub total_pages: u64,
    /// `true` if a later page exists
    pub has_next: bool,
    /// `true` if an earlier page exists
    pub has_prev: bool,
}

impl<T> Paginated<T> {
    /// Wrap a page of items.
    #[must_use]
    pub fn new(items: Vec<T>, total: u64, page: Page) -> Self {
        let total_pages = total.div_ceil(u64::from(page.size()));
        Self {
            items,
            total,
            page: page.number(),
            size: page.size(),
            total_pages,
            has_next: u64::from(page.number()) < total_pages,
            has_prev: page.number() > 1,
        }
    }

    /// Slice an in-memory, already ordered collection.
    #[must_use]
    pub fn from_ordered(all: Vec<T>, page: Page) -> Self {
        let total = all.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let items = all
            .into_iter()
            .skip(offset)
            .take(page.size() as usize)
            .collect();
        Self::new(items, total, page)
    }
}
