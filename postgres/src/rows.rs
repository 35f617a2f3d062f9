//! Row decoding.
//!
//! Money is stored as `BIGINT` minor units and enums as their `as_str` form.
//! A row that fails to decode is a storage fault, never a client error.

use slotbook_core::SlotbookError;
use slotbook_core::booking::{BookedPosition, Booking, BookingStatus};
use slotbook_core::ledger::{EntryKind, EntryStatus, LedgerEntry};
use slotbook_core::slot::{Slot, SlotStatus};
use slotbook_core::types::{
    AdminId, BookingId, EntryId, MatchType, Money, PositionKey, PositionLayout, SlotId, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

pub(crate) const ENTRY_COLUMNS: &str = "id, user_id, sequence, kind, amount, balance_after, reference, \
     status, description, metadata, resolved_by, resolution_note, created_at, updated_at";

pub(crate) const SLOT_COLUMNS: &str = "id, title, match_type, entry_fee, start_time, status, \
     per_kill_reward, total_prize_pool, version, created_at";

pub(crate) const BOOKING_COLUMNS: &str = "id, user_id, slot_id, match_type, amount_charged, \
     ledger_entry_id, idempotency_key, status, created_at, updated_at";

pub(crate) fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, SlotbookError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| SlotbookError::storage(format!("Failed to decode column {name}: {e}")))
}

fn money(row: &PgRow, name: &str) -> Result<Money, SlotbookError> {
    Money::from_i64(column(row, name)?).map_err(|e| SlotbookError::storage(e.to_string()))
}

fn match_type(row: &PgRow) -> Result<MatchType, SlotbookError> {
    let raw: String = column(row, "match_type")?;
    MatchType::normalize(&raw).map_err(|e| SlotbookError::storage(e.to_string()))
}

pub(crate) fn entry(row: &PgRow) -> Result<LedgerEntry, SlotbookError> {
    Ok(LedgerEntry {
        id: EntryId::from_uuid(column(row, "id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        sequence: column(row, "sequence")?,
        kind: EntryKind::parse(&column::<String>(row, "kind")?)?,
        amount: money(row, "amount")?,
        balance_after: money(row, "balance_after")?,
        reference: column(row, "reference")?,
        status: EntryStatus::parse(&column::<String>(row, "status")?)?,
        description: column(row, "description")?,
        metadata: column(row, "metadata")?,
        resolved_by: column::<Option<Uuid>>(row, "resolved_by")?.map(AdminId::from_uuid),
        resolution_note: column(row, "resolution_note")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

/// Build a slot from its row and its `slot_positions` rows.
pub(crate) fn slot(row: &PgRow, positions: &[PgRow]) -> Result<Slot, SlotbookError> {
    let mut layout = Vec::with_capacity(positions.len());
    let mut occupancy = BTreeMap::new();
    for position in positions {
        let key = PositionKey::new(
            column::<String>(position, "team")?,
            column::<String>(position, "label")?,
        );
        if let Some(holder) = column::<Option<Uuid>>(position, "booking_id")? {
            occupancy.insert(key.clone(), BookingId::from_uuid(holder));
        }
        layout.push(key);
    }

    Ok(Slot {
        id: SlotId::from_uuid(column(row, "id")?),
        title: column(row, "title")?,
        match_type: match_type(row)?,
        entry_fee: money(row, "entry_fee")?,
        start_time: column(row, "start_time")?,
        layout: PositionLayout::from_positions(layout),
        occupancy,
        status: SlotStatus::parse(&column::<String>(row, "status")?)?,
        per_kill_reward: money(row, "per_kill_reward")?,
        total_prize_pool: money(row, "total_prize_pool")?,
        version: column(row, "version")?,
        created_at: column(row, "created_at")?,
    })
}

pub(crate) fn booked_position(row: &PgRow) -> Result<BookedPosition, SlotbookError> {
    Ok(BookedPosition {
        position: PositionKey::new(column::<String>(row, "team")?, column::<String>(row, "label")?),
        player_name: column(row, "player_name")?,
    })
}

/// Build a booking from its row and its positions in `(team, label)` order.
pub(crate) fn booking(row: &PgRow, positions: Vec<BookedPosition>) -> Result<Booking, SlotbookError> {
    Ok(Booking {
        id: BookingId::from_uuid(column(row, "id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        slot_id: SlotId::from_uuid(column(row, "slot_id")?),
        match_type: match_type(row)?,
        positions,
        amount_charged: money(row, "amount_charged")?,
        ledger_entry_id: column::<Option<Uuid>>(row, "ledger_entry_id")?.map(EntryId::from_uuid),
        idempotency_key: column(row, "idempotency_key")?,
        status: BookingStatus::parse(&column::<String>(row, "status")?)?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}
