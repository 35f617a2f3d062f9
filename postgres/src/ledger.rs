//! [`LedgerStore`] over `wallets` and `ledger_entries`.
//!
//! An append locks the wallet row, checks the reference, writes the entry and
//! moves the snapshot in one transaction. `wallets.balance` and the sum of the
//! user's entries can therefore never disagree.

use crate::rows::{self, ENTRY_COLUMNS};
use crate::{PostgresStore, count_total, db_error, is_unique_violation, limit_offset};
use chrono::{DateTime, Utc};
use slotbook_core::SlotbookError;
use slotbook_core::ledger::{
    EntryRequest, EntryStatus, HoldOutcome, HoldResolution, LedgerEntry, ensure_claimable,
    ensure_resolvable,
};
use slotbook_core::store::{LedgerStore, StoreFuture};
use slotbook_core::types::{AdminId, EntryId, Money, Page, Paginated, UserId};
use sqlx::PgConnection;

async fn find_entry_in(
    conn: &mut PgConnection,
    reference: &str,
    for_update: bool,
) -> Result<Option<LedgerEntry>, SlotbookError> {
    let query = if for_update {
        format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE reference = $1 FOR UPDATE")
    } else {
        format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE reference = $1")
    };

    sqlx::query(&query)
        .bind(reference)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("load ledger entry"))?
        .as_ref()
        .map(rows::entry)
        .transpose()
}

/// Append `request` inside the caller's transaction.
///
/// Replays an existing entry with the same reference instead of writing.
async fn append(
    conn: &mut PgConnection,
    request: EntryRequest,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, SlotbookError> {
    let (balance, last_sequence): (i64, i64) = sqlx::query_as(
        "SELECT balance, last_sequence FROM wallets WHERE user_id = $1 FOR UPDATE",
    )
    .bind(request.user_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error("lock wallet"))?
    .ok_or(SlotbookError::UserNotFound(request.user_id))?;

    if let Some(existing) = find_entry_in(conn, &request.reference, false).await? {
        return request.replay(existing);
    }

    let balance = Money::from_i64(balance).map_err(|e| SlotbookError::storage(e.to_string()))?;
    let balance_after = request.kind.apply(balance, request.amount)?;

    let entry = LedgerEntry {
        id: EntryId::new(),
        user_id: request.user_id,
        sequence: last_sequence + 1,
        kind: request.kind,
        amount: request.amount,
        balance_after,
        reference: request.reference,
        status: request.status,
        description: request.description,
        metadata: request.metadata,
        resolved_by: None,
        resolution_note: None,
        created_at: now,
        updated_at: now,
    };

    let inserted = sqlx::query(
        "INSERT INTO ledger_entries (id, user_id, sequence, kind, amount, balance_after, reference,
                                     status, description, metadata, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)",
    )
    .bind(entry.id.as_uuid())
    .bind(entry.user_id.as_uuid())
    .bind(entry.sequence)
    .bind(entry.kind.as_str())
    .bind(entry.amount.to_i64()?)
    .bind(entry.balance_after.to_i64()?)
    .bind(&entry.reference)
    .bind(entry.status.as_str())
    .bind(&entry.description)
    .bind(&entry.metadata)
    .bind(now)
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => {}
        // The reference belongs to another user's wallet.
        Err(error) if is_unique_violation(&error) => {
            return Err(SlotbookError::DuplicateReference {
                reference: entry.reference,
            });
        }
        Err(error) => return Err(db_error("insert ledger entry")(error)),
    }

    sqlx::query(
        "UPDATE wallets SET balance = $2, last_sequence = $3, updated_at = $4 WHERE user_id = $1",
    )
    .bind(entry.user_id.as_uuid())
    .bind(entry.balance_after.to_i64()?)
    .bind(entry.sequence)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(db_error("update wallet"))?;

    tracing::debug!(
        user_id = %entry.user_id,
        kind = entry.kind.as_str(),
        amount = %entry.amount,
        balance_after = %entry.balance_after,
        "Ledger entry appended"
    );
    Ok(entry)
}

impl LedgerStore for PostgresStore {
    fn open_wallet(&self, user_id: UserId, now: DateTime<Utc>) -> StoreFuture<'_, Money> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO wallets (user_id, balance, last_sequence, created_at, updated_at)
                 VALUES ($1, 0, 0, $2, $2)
                 ON CONFLICT (user_id) DO NOTHING",
            )
            .bind(user_id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error("open wallet"))?;

            self.balance(user_id).await
        })
    }

    fn balance(&self, user_id: UserId) -> StoreFuture<'_, Money> {
        Box::pin(async move {
            let (balance,): (i64,) = sqlx::query_as("SELECT balance FROM wallets WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("load balance"))?
                .ok_or(SlotbookError::UserNotFound(user_id))?;
            Money::from_i64(balance).map_err(|e| SlotbookError::storage(e.to_string()))
        })
    }

    fn apply_entry(&self, request: EntryRequest, now: DateTime<Utc>) -> StoreFuture<'_, LedgerEntry> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;
            let entry = append(&mut tx, request, now).await?;
            tx.commit().await.map_err(db_error("commit ledger entry"))?;
            Ok(entry)
        })
    }

    fn find_entry(&self, reference: String) -> StoreFuture<'_, Option<LedgerEntry>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_error("acquire connection"))?;
            find_entry_in(&mut conn, &reference, false).await
        })
    }

    fn claim_hold(
        &self,
        reference: String,
        admin: AdminId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreFuture<'_, LedgerEntry> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

            let hold = find_entry_in(&mut tx, &reference, true)
                .await?
                .ok_or_else(|| SlotbookError::EntryNotFound(reference.clone()))?;
            ensure_claimable(&hold, stale_before)?;

            sqlx::query(
                "UPDATE ledger_entries SET status = $2, resolved_by = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(hold.id.as_uuid())
            .bind(EntryStatus::Processing.as_str())
            .bind(admin.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error("claim hold"))?;

            tx.commit().await.map_err(db_error("commit hold claim"))?;

            Ok(LedgerEntry {
                status: EntryStatus::Processing,
                resolved_by: Some(admin),
                updated_at: now,
                ..hold
            })
        })
    }

    fn release_claim(&self, reference: String, now: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let released = sqlx::query(
                "UPDATE ledger_entries
                 SET status = 'pending_admin_approval', resolved_by = NULL, updated_at = $2
                 WHERE reference = $1 AND kind = 'WITHDRAW_HOLD' AND status = 'processing'",
            )
            .bind(&reference)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error("release hold claim"))?
            .rows_affected();
            Ok(released > 0)
        })
    }

    fn resolve_hold(&self, resolution: HoldResolution, now: DateTime<Utc>) -> StoreFuture<'_, HoldOutcome> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

            let hold = find_entry_in(&mut tx, &resolution.reference, true)
                .await?
                .ok_or_else(|| SlotbookError::EntryNotFound(resolution.reference.clone()))?;
            ensure_resolvable(&hold, resolution.target)?;

            let follow_up = append(&mut tx, resolution.follow_up, now).await?;

            sqlx::query(
                "UPDATE ledger_entries
                 SET status = $2, resolved_by = $3, resolution_note = $4, updated_at = $5
                 WHERE id = $1",
            )
            .bind(hold.id.as_uuid())
            .bind(resolution.target.as_str())
            .bind(resolution.admin.as_uuid())
            .bind(resolution.note.as_deref())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error("resolve hold"))?;

            tx.commit().await.map_err(db_error("commit hold resolution"))?;

            let hold = LedgerEntry {
                status: resolution.target,
                resolved_by: Some(resolution.admin),
                resolution_note: resolution.note,
                updated_at: now,
                ..hold
            };
            Ok(HoldOutcome { hold, follow_up })
        })
    }

    fn list_entries(&self, user_id: UserId, page: Page) -> StoreFuture<'_, Paginated<LedgerEntry>> {
        Box::pin(async move {
            let (limit, offset) = limit_offset(page)?;

            let total: Option<(i64,)> = sqlx::query_as(
                "SELECT (SELECT COUNT(*) FROM ledger_entries WHERE user_id = $1)
                 FROM wallets WHERE user_id = $1",
            )
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("count ledger entries"))?;
            let (total,) = total.ok_or(SlotbookError::UserNotFound(user_id))?;

            let entries = sqlx::query(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries
                 WHERE user_id = $1
                 ORDER BY sequence DESC
                 LIMIT $2 OFFSET $3"
            ))
            .bind(user_id.as_uuid())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list ledger entries"))?
            .iter()
            .map(rows::entry)
            .collect::<Result<Vec<_>, _>>()?;

            Ok(Paginated::new(entries, count_total(total), page))
        })
    }

    fn list_pending_holds(&self, page: Page) -> StoreFuture<'_, Paginated<LedgerEntry>> {
        Box::pin(async move {
            let (limit, offset) = limit_offset(page)?;

            let (total,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM ledger_entries
                 WHERE kind = 'WITHDRAW_HOLD' AND status IN ('pending_admin_approval', 'processing')",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("count pending holds"))?;

            let holds = sqlx::query(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries
                 WHERE kind = 'WITHDRAW_HOLD' AND status IN ('pending_admin_approval', 'processing')
                 ORDER BY created_at, sequence
                 LIMIT $1 OFFSET $2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list pending holds"))?
            .iter()
            .map(rows::entry)
            .collect::<Result<Vec<_>, _>>()?;

            Ok(Paginated::new(holds, count_total(total), page))
        })
    }
}
