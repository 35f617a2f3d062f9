//! [`SlotInventory`] over `slots` and `slot_positions`.

use crate::rows::{self, SLOT_COLUMNS};
use crate::{PostgresStore, db_error};
use chrono::{DateTime, Utc};
use slotbook_core::SlotbookError;
use slotbook_core::slot::{Slot, SlotStatus};
use slotbook_core::store::{SlotInventory, StoreFuture};
use slotbook_core::types::{BookingId, MatchType, PositionKey, SlotId};
use sqlx::PgConnection;
use sqlx::postgres::PgRow;
use std::collections::HashMap;
use uuid::Uuid;

/// Load one slot with its positions, optionally locking the slot row.
async fn load_slot_in(conn: &mut PgConnection, slot_id: SlotId, for_update: bool) -> Result<Slot, SlotbookError> {
    let query = if for_update {
        format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = $1 AND archived_at IS NULL FOR UPDATE")
    } else {
        format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = $1 AND archived_at IS NULL")
    };

    let row = sqlx::query(&query)
        .bind(slot_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("load slot"))?
        .ok_or(SlotbookError::SlotNotFound(slot_id))?;

    let positions = sqlx::query(
        "SELECT team, label, booking_id FROM slot_positions WHERE slot_id = $1",
    )
    .bind(slot_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error("load slot positions"))?;

    rows::slot(&row, &positions)
}

/// [`SlotbookError::SlotNotFound`] unless the slot exists and is not archived.
async fn ensure_listed(conn: &mut PgConnection, slot_id: SlotId) -> Result<(), SlotbookError> {
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM slots WHERE id = $1 AND archived_at IS NULL")
        .bind(slot_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("load slot"))?;
    exists.map(|_| ()).ok_or(SlotbookError::SlotNotFound(slot_id))
}

async fn bump_version(conn: &mut PgConnection, slot_id: SlotId) -> Result<i64, SlotbookError> {
    let (version,): (i64,) = sqlx::query_as(
        "UPDATE slots SET version = version + 1 WHERE id = $1 RETURNING version",
    )
    .bind(slot_id.as_uuid())
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error("bump slot version"))?;
    Ok(version)
}

impl SlotInventory for PostgresStore {
    fn create_slot(&self, slot: Slot) -> StoreFuture<'_, Slot> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

            sqlx::query(
                "INSERT INTO slots (id, title, match_type, entry_fee, start_time, status,
                                    per_kill_reward, total_prize_pool, version, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(slot.id.as_uuid())
            .bind(&slot.title)
            .bind(slot.match_type.as_str())
            .bind(slot.entry_fee.to_i64()?)
            .bind(slot.start_time)
            .bind(slot.status.as_str())
            .bind(slot.per_kill_reward.to_i64()?)
            .bind(slot.total_prize_pool.to_i64()?)
            .bind(slot.version)
            .bind(slot.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error("insert slot"))?;

            for position in slot.layout.iter() {
                sqlx::query(
                    "INSERT INTO slot_positions (slot_id, team, label, booking_id)
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(slot.id.as_uuid())
                .bind(&position.team)
                .bind(&position.label)
                .bind(slot.occupant(position).map(|b| *b.as_uuid()))
                .execute(&mut *tx)
                .await
                .map_err(db_error("insert slot position"))?;
            }

            tx.commit().await.map_err(db_error("commit slot"))?;
            tracing::debug!(slot_id = %slot.id, positions = slot.total_positions(), "Slot stored");
            Ok(slot)
        })
    }

    fn load_slot(&self, slot_id: SlotId) -> StoreFuture<'_, Slot> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;
            load_slot_in(&mut conn, slot_id, false).await
        })
    }

    fn list_slots(&self, status: Option<SlotStatus>) -> StoreFuture<'_, Vec<Slot>> {
        Box::pin(async move {
            let slot_rows = sqlx::query(&format!(
                "SELECT {SLOT_COLUMNS} FROM slots
                 WHERE archived_at IS NULL AND ($1::TEXT IS NULL OR status = $1)
                 ORDER BY start_time, created_at"
            ))
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list slots"))?;

            let ids: Vec<Uuid> = slot_rows
                .iter()
                .map(|row| rows::column::<Uuid>(row, "id"))
                .collect::<Result<_, _>>()?;

            let position_rows = sqlx::query(
                "SELECT slot_id, team, label, booking_id FROM slot_positions WHERE slot_id = ANY($1)",
            )
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list slot positions"))?;

            let mut by_slot: HashMap<Uuid, Vec<PgRow>> = HashMap::new();
            for row in position_rows {
                by_slot.entry(rows::column(&row, "slot_id")?).or_default().push(row);
            }

            slot_rows
                .iter()
                .zip(&ids)
                .map(|(row, id)| rows::slot(row, by_slot.get(id).map(Vec::as_slice).unwrap_or_default()))
                .collect()
        })
    }

    fn occupy(
        &self,
        slot_id: SlotId,
        booking_id: BookingId,
        match_type: MatchType,
        positions: Vec<PositionKey>,
    ) -> StoreFuture<'_, Slot> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;
            let mut slot = load_slot_in(&mut tx, slot_id, true).await?;
            slot.check_occupiable(Some(booking_id), match_type, &positions)?;

            let mut assigned = 0_usize;
            for position in &positions {
                if slot.occupancy.contains_key(position) {
                    continue;
                }
                let result = sqlx::query(
                    "UPDATE slot_positions SET booking_id = $1
                     WHERE slot_id = $2 AND team = $3 AND label = $4 AND booking_id IS NULL",
                )
                .bind(booking_id.as_uuid())
                .bind(slot_id.as_uuid())
                .bind(&position.team)
                .bind(&position.label)
                .execute(&mut *tx)
                .await
                .map_err(db_error("occupy position"))?;

                if result.rows_affected() != 1 {
                    return Err(SlotbookError::ConcurrentModification {
                        resource: format!("slot {slot_id} position {position}"),
                    });
                }
                slot.occupancy.insert(position.clone(), booking_id);
                assigned += 1;
            }

            if assigned > 0 {
                slot.version = bump_version(&mut tx, slot_id).await?;
            }
            tx.commit().await.map_err(db_error("commit occupancy"))?;

            tracing::debug!(%slot_id, %booking_id, assigned, "Positions occupied");
            Ok(slot)
        })
    }

    fn release(
        &self,
        slot_id: SlotId,
        booking_id: BookingId,
        positions: Vec<PositionKey>,
    ) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;
            // Lock the slot so release serializes with occupy.
            load_slot_in(&mut tx, slot_id, true).await?;

            let mut freed = 0_usize;
            for position in &positions {
                let result = sqlx::query(
                    "UPDATE slot_positions SET booking_id = NULL
                     WHERE slot_id = $1 AND team = $2 AND label = $3 AND booking_id = $4",
                )
                .bind(slot_id.as_uuid())
                .bind(&position.team)
                .bind(&position.label)
                .bind(booking_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(db_error("release position"))?;
                if result.rows_affected() == 1 {
                    freed += 1;
                }
            }

            if freed > 0 {
                bump_version(&mut tx, slot_id).await?;
            }
            tx.commit().await.map_err(db_error("commit release"))?;

            tracing::debug!(%slot_id, %booking_id, freed, "Positions released");
            Ok(freed)
        })
    }

    fn transition_status(
        &self,
        slot_id: SlotId,
        expected: SlotStatus,
        target: SlotStatus,
    ) -> StoreFuture<'_, Option<Slot>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

            let result = sqlx::query(
                "UPDATE slots SET status = $3, version = version + 1
                 WHERE id = $1 AND status = $2 AND archived_at IS NULL",
            )
            .bind(slot_id.as_uuid())
            .bind(expected.as_str())
            .bind(target.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error("transition slot"))?;

            if result.rows_affected() == 0 {
                return ensure_listed(&mut tx, slot_id).await.map(|()| None);
            }

            let slot = load_slot_in(&mut tx, slot_id, false).await?;
            tx.commit().await.map_err(db_error("commit transition"))?;
            Ok(Some(slot))
        })
    }

    fn archive_slot(&self, slot_id: SlotId, now: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;

            let result = sqlx::query(
                "UPDATE slots SET archived_at = $2, version = version + 1
                 WHERE id = $1 AND archived_at IS NULL AND status IN ($3, $4)",
            )
            .bind(slot_id.as_uuid())
            .bind(now)
            .bind(SlotStatus::Cancelled.as_str())
            .bind(SlotStatus::Completed.as_str())
            .execute(&mut *conn)
            .await
            .map_err(db_error("archive slot"))?;

            if result.rows_affected() == 0 {
                return ensure_listed(&mut conn, slot_id).await.map(|()| false);
            }
            tracing::debug!(%slot_id, "Slot archived");
            Ok(true)
        })
    }
}
