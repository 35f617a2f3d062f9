//! `PostgreSQL` storage for Slotbook.
//!
//! [`PostgresStore`] implements the three store traits from `slotbook-core`
//! over one connection pool:
//!
//! - [`SlotInventory`](slotbook_core::store::SlotInventory): `slots` plus one
//!   `slot_positions` row per position
//! - [`LedgerStore`](slotbook_core::store::LedgerStore): `wallets` plus the
//!   append-only `ledger_entries`
//! - [`BookingStore`](slotbook_core::store::BookingStore): `bookings` plus
//!   `booking_positions`
//!
//! # Locking
//!
//! Each trait method runs in one transaction. Writers serialize on a single
//! row with `SELECT ... FOR UPDATE`:
//!
//! | Operation | Locked row |
//! |-----------|------------|
//! | occupy / release | the slot |
//! | status transition | the slot (via `UPDATE`) |
//! | ledger append | the wallet |
//! | hold resolution | the hold entry, then the wallet |
//! | cancellation | the booking |
//!
//! A hold resolution locks the entry before the wallet; no operation takes
//! them in the other order.
//!
//! # Example
//!
//! ```ignore
//! use slotbook_postgres::PostgresStore;
//! use sqlx::postgres::PgPoolOptions;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = PgPoolOptions::new()
//!         .max_connections(10)
//!         .connect("postgres://localhost/slotbook")
//!         .await?;
//!     let store = PostgresStore::new(pool);
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

mod bookings;
mod ledger;
mod rows;
mod slots;

use slotbook_core::SlotbookError;
use sqlx::postgres::PgPool;

/// Slot inventory, wallet ledger and booking store backed by `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create or upgrade the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), SlotbookError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SlotbookError::storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a driver error to [`SlotbookError::Storage`], counting it per operation.
pub(crate) fn db_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> SlotbookError {
    move |error| {
        metrics::counter!("slotbook_store_errors_total", "operation" => operation).increment(1);
        tracing::error!(operation, %error, "Database operation failed");
        SlotbookError::storage(format!("Failed to {operation}: {error}"))
    }
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// `LIMIT` and `OFFSET` for a page.
pub(crate) fn limit_offset(page: slotbook_core::types::Page) -> Result<(i64, i64), SlotbookError> {
    let offset = i64::try_from(page.offset())
        .map_err(|_| SlotbookError::InvalidInput(format!("page {} is out of range", page.number())))?;
    Ok((i64::from(page.size()), offset))
}

/// `COUNT(*)` as an item total.
pub(crate) fn count_total(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}
