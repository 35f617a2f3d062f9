//! [`BookingStore`] over `bookings` and `booking_positions`.

use crate::rows::{self, BOOKING_COLUMNS};
use crate::{PostgresStore, count_total, db_error, limit_offset};
use chrono::{DateTime, Utc};
use slotbook_core::SlotbookError;
use slotbook_core::booking::{BookedPosition, Booking, BookingStatus};
use slotbook_core::store::{BookingStore, StoreFuture};
use slotbook_core::types::{BookingId, Page, Paginated, SlotId, UserId};
use sqlx::PgConnection;
use sqlx::postgres::PgRow;
use std::collections::HashMap;
use uuid::Uuid;

/// Positions of every booking in `ids`, each list in `(team, label)` order.
async fn positions_for(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<BookedPosition>>, SlotbookError> {
    let position_rows = sqlx::query(
        "SELECT booking_id, team, label, player_name FROM booking_positions
         WHERE booking_id = ANY($1)
         ORDER BY team, label",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error("load booking positions"))?;

    let mut by_booking: HashMap<Uuid, Vec<BookedPosition>> = HashMap::new();
    for row in &position_rows {
        by_booking
            .entry(rows::column(row, "booking_id")?)
            .or_default()
            .push(rows::booked_position(row)?);
    }
    Ok(by_booking)
}

/// Decode booking rows, keeping their order.
async fn with_positions(conn: &mut PgConnection, booking_rows: &[PgRow]) -> Result<Vec<Booking>, SlotbookError> {
    let ids: Vec<Uuid> = booking_rows
        .iter()
        .map(|row| rows::column::<Uuid>(row, "id"))
        .collect::<Result<_, _>>()?;
    let mut positions = positions_for(conn, &ids).await?;

    booking_rows
        .iter()
        .zip(&ids)
        .map(|(row, id)| rows::booking(row, positions.remove(id).unwrap_or_default()))
        .collect()
}

async fn load_booking_in(
    conn: &mut PgConnection,
    booking_id: BookingId,
    for_update: bool,
) -> Result<Option<Booking>, SlotbookError> {
    let query = if for_update {
        format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE")
    } else {
        format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1")
    };

    let Some(row) = sqlx::query(&query)
        .bind(booking_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("load booking"))?
    else {
        return Ok(None);
    };

    let mut bookings = with_positions(conn, std::slice::from_ref(&row)).await?;
    Ok(bookings.pop())
}

impl BookingStore for PostgresStore {
    fn insert_booking(&self, booking: Booking) -> StoreFuture<'_, Booking> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

            let inserted = sqlx::query(
                "INSERT INTO bookings (id, user_id, slot_id, match_type, amount_charged,
                                       ledger_entry_id, idempotency_key, status, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(booking.id.as_uuid())
            .bind(booking.user_id.as_uuid())
            .bind(booking.slot_id.as_uuid())
            .bind(booking.match_type.as_str())
            .bind(booking.amount_charged.to_i64()?)
            .bind(booking.ledger_entry_id.map(|id| *id.as_uuid()))
            .bind(&booking.idempotency_key)
            .bind(booking.status.as_str())
            .bind(booking.created_at)
            .bind(booking.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error("insert booking"))?;

            if inserted.rows_affected() == 1 {
                for position in &booking.positions {
                    sqlx::query(
                        "INSERT INTO booking_positions (booking_id, team, label, player_name)
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(booking.id.as_uuid())
                    .bind(&position.position.team)
                    .bind(&position.position.label)
                    .bind(&position.player_name)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("insert booking position"))?;
                }
            }

            let stored = load_booking_in(&mut tx, booking.id, false)
                .await?
                .ok_or_else(|| SlotbookError::storage(format!("booking {} missing after insert", booking.id)))?;
            tx.commit().await.map_err(db_error("commit booking"))?;
            Ok(stored)
        })
    }

    fn load_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;
            load_booking_in(&mut conn, booking_id, false).await
        })
    }

    fn mark_cancelled(&self, booking_id: BookingId, now: DateTime<Utc>) -> StoreFuture<'_, Booking> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;
            let booking = load_booking_in(&mut tx, booking_id, true)
                .await?
                .ok_or(SlotbookError::BookingNotFound(booking_id))?;

            match booking.status {
                BookingStatus::Confirmed => {
                    sqlx::query("UPDATE bookings SET status = $2, updated_at = $3 WHERE id = $1")
                        .bind(booking_id.as_uuid())
                        .bind(BookingStatus::Cancelled.as_str())
                        .bind(now)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_error("cancel booking"))?;
                    tx.commit().await.map_err(db_error("commit cancellation"))?;
                    Ok(Booking {
                        status: BookingStatus::Cancelled,
                        updated_at: now,
                        ..booking
                    })
                }
                BookingStatus::Cancelled => Ok(booking),
                BookingStatus::Completed => Err(SlotbookError::BookingNotActive {
                    booking_id,
                    status: booking.status,
                }),
            }
        })
    }

    fn list_for_slot(
        &self,
        slot_id: SlotId,
        status: Option<BookingStatus>,
    ) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;
            let booking_rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 WHERE slot_id = $1 AND ($2::TEXT IS NULL OR status = $2)
                 ORDER BY created_at, id"
            ))
            .bind(slot_id.as_uuid())
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error("list slot bookings"))?;

            with_positions(&mut conn, &booking_rows).await
        })
    }

    fn list_for_user(&self, user_id: UserId, page: Page) -> StoreFuture<'_, Paginated<Booking>> {
        Box::pin(async move {
            let (limit, offset) = limit_offset(page)?;
            let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;

            let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookings WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error("count user bookings"))?;

            let booking_rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 WHERE user_id = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2 OFFSET $3"
            ))
            .bind(user_id.as_uuid())
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error("list user bookings"))?;

            let bookings = with_positions(&mut conn, &booking_rows).await?;
            Ok(Paginated::new(bookings, count_total(total), page))
        })
    }

    fn list_orphaned(&self) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;
            let booking_rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings b
                 WHERE b.status = $1
                   AND NOT EXISTS (
                       SELECT 1 FROM slots s WHERE s.id = b.slot_id AND s.archived_at IS NULL
                   )
                 ORDER BY b.created_at, b.id"
            ))
            .bind(BookingStatus::Confirmed.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error("list orphaned bookings"))?;

            with_positions(&mut conn, &booking_rows).await
        })
    }

    fn complete_for_slot(&self, slot_id: SlotId, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE bookings SET status = $3, updated_at = $4
                 WHERE slot_id = $1 AND status = $2",
            )
            .bind(slot_id.as_uuid())
            .bind(BookingStatus::Confirmed.as_str())
            .bind(BookingStatus::Completed.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error("complete slot bookings"))?;
            Ok(result.rows_affected())
        })
    }
}
