//! In-memory implementation of every Slotbook store trait.
//!
//! All state sits behind one mutex, which makes every trait method trivially
//! atomic and serializes slot and wallet writes the way row locks do in
//! `PostgreSQL`. The lock is never held across an `.await`.
//!
//! [`InMemoryStore::inject_failure`] makes the next call of one operation fail
//! with a storage error, for compensation tests.

#![allow(clippy::unwrap_used)] // Inspection helpers unwrap the lock for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use slotbook_core::SlotbookError;
use slotbook_core::booking::{Booking, BookingStatus};
use slotbook_core::ledger::{
    EntryKind, EntryRequest, EntryStatus, HoldOutcome, HoldResolution, LedgerEntry,
    ensure_claimable, ensure_resolvable,
};
use slotbook_core::slot::{Slot, SlotStatus};
use slotbook_core::store::{BookingStore, LedgerStore, SlotInventory, StoreFuture};
use slotbook_core::types::{
    AdminId, BookingId, EntryId, MatchType, Money, Page, Paginated, PositionKey, SlotId, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Store operation that can be made to fail once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// [`SlotInventory::load_slot`]
    LoadSlot,
    /// [`SlotInventory::occupy`]
    Occupy,
    /// [`SlotInventory::release`]
    Release,
    /// [`LedgerStore::apply_entry`]
    ApplyEntry,
    /// [`LedgerStore::resolve_hold`]
    ResolveHold,
    /// [`BookingStore::insert_booking`]
    InsertBooking,
    /// [`BookingStore::mark_cancelled`]
    MarkCancelled,
    /// [`SlotInventory::transition_status`]
    TransitionStatus,
}

#[derive(Debug, Default)]
struct Wallet {
    balance: Money,
    last_sequence: i64,
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<SlotId, Slot>,
    wallets: HashMap<UserId, Wallet>,
    entries: Vec<LedgerEntry>,
    by_reference: HashMap<String, usize>,
    bookings: HashMap<BookingId, Booking>,
    booking_order: Vec<BookingId>,
    failures: HashSet<StoreOperation>,
}

impl State {
    fn take_failure(&mut self, operation: StoreOperation) -> Result<(), SlotbookError> {
        if self.failures.remove(&operation) {
            Err(SlotbookError::storage(format!("injected failure: {operation:?}")))
        } else {
            Ok(())
        }
    }

    fn entry_index(&self, reference: &str) -> Result<usize, SlotbookError> {
        self.by_reference
            .get(reference)
            .copied()
            .ok_or_else(|| SlotbookError::EntryNotFound(reference.to_string()))
    }

    fn slot_mut(&mut self, slot_id: SlotId) -> Result<&mut Slot, SlotbookError> {
        self.slots
            .get_mut(&slot_id)
            .ok_or(SlotbookError::SlotNotFound(slot_id))
    }

    fn apply(&mut self, request: EntryRequest, now: DateTime<Utc>) -> Result<LedgerEntry, SlotbookError> {
        if let Some(&index) = self.by_reference.get(&request.reference) {
            return request.replay(self.entries[index].clone());
        }

        let wallet = self
            .wallets
            .get_mut(&request.user_id)
            .ok_or(SlotbookError::UserNotFound(request.user_id))?;
        let balance_after = request.kind.apply(wallet.balance, request.amount)?;
        wallet.balance = balance_after;
        wallet.last_sequence += 1;

        let entry = LedgerEntry {
            id: EntryId::new(),
            user_id: request.user_id,
            sequence: wallet.last_sequence,
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

        self.by_reference
            .insert(entry.reference.clone(), self.entries.len());
        self.entries.push(entry.clone());
        Ok(entry)
    }
}

/// In-memory store for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use slotbook_testing::InMemoryStore;
/// use slotbook_core::store::LedgerStore;
/// use slotbook_core::types::{Money, UserId};
///
/// # async fn example() -> Result<(), slotbook_core::SlotbookError> {
/// let store = InMemoryStore::new();
/// let user = UserId::new();
/// store.open_wallet(user, chrono::Utc::now()).await?;
/// assert_eq!(store.balance(user).await?, Money::ZERO);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an `Arc`-wrapped store for sharing across trait objects.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut State) -> Result<T, SlotbookError>,
    ) -> Result<T, SlotbookError> {
        let mut guard: MutexGuard<'_, State> = self
            .state
            .lock()
            .map_err(|_| SlotbookError::storage("in-memory store lock poisoned"))?;
        f(&mut guard)
    }

    /// Make the next call of `operation` fail with a storage error.
    pub fn inject_failure(&self, operation: StoreOperation) {
        self.state.lock().unwrap().failures.insert(operation);
    }

    /// Seed a wallet with a balance through a `CREDIT` entry, as a deposit
    /// would.
    pub fn seed_wallet(&self, user_id: UserId, amount: Money, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.wallets.entry(user_id).or_default();
        if !amount.is_zero() {
            let reference = format!("seed:{user_id}:{}", state.entries.len());
            state
                .apply(EntryRequest::new(user_id, EntryKind::Credit, amount, reference), now)
                .unwrap();
        }
    }

    /// Every entry of a user, in sequence order.
    #[must_use]
    pub fn entries_for(&self, user_id: UserId) -> Vec<LedgerEntry> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence);
        entries
    }

    /// Every booking, in insertion order.
    #[must_use]
    pub fn all_bookings(&self) -> Vec<Booking> {
        let state = self.state.lock().unwrap();
        state
            .booking_order
            .iter()
            .filter_map(|id| state.bookings.get(id).cloned())
            .collect()
    }
}

impl SlotInventory for InMemoryStore {
    fn create_slot(&self, slot: Slot) -> StoreFuture<'_, Slot> {
        Box::pin(async move {
            self.with_state(|state| {
                state.slots.insert(slot.id, slot.clone());
                Ok(slot)
            })
        })
    }

    fn load_slot(&self, slot_id: SlotId) -> StoreFuture<'_, Slot> {
        Box::pin(async move {
            self.with_state(|state| {
                state.take_failure(StoreOperation::LoadSlot)?;
                state
                    .slots
                    .get(&slot_id)
                    .cloned()
                    .ok_or(SlotbookError::SlotNotFound(slot_id))
            })
        })
    }

    fn list_slots(&self, status: Option<SlotStatus>) -> StoreFuture<'_, Vec<Slot>> {
        Box::pin(async move {
            self.with_state(|state| {
                let mut slots: Vec<Slot> = state
                    .slots
                    .values()
                    .filter(|s| status.is_none_or(|wanted| s.status == wanted))
                    .cloned()
                    .collect();
                slots.sort_by_key(|s| (s.start_time, s.created_at));
                Ok(slots)
            })
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
            self.with_state(|state| {
                state.take_failure(StoreOperation::Occupy)?;
                let slot = state.slot_mut(slot_id)?;
                slot.check_occupiable(Some(booking_id), match_type, &positions)?;

                let mut changed = false;
                for position in positions {
                    changed |= slot.occupancy.insert(position, booking_id).is_none();
                }
                if changed {
                    slot.version += 1;
                }
                Ok(slot.clone())
            })
        })
    }

    fn release(
        &self,
        slot_id: SlotId,
        booking_id: BookingId,
        positions: Vec<PositionKey>,
    ) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            self.with_state(|state| {
                state.take_failure(StoreOperation::Release)?;
                let slot = state.slot_mut(slot_id)?;

                let mut freed = 0;
                for position in &positions {
                    if slot.occupant(position) == Some(booking_id) {
                        slot.occupancy.remove(position);
                        freed += 1;
                    }
                }
                if freed > 0 {
                    slot.version += 1;
                }
                Ok(freed)
            })
        })
    }

    fn transition_status(
        &self,
        slot_id: SlotId,
        expected: SlotStatus,
        target: SlotStatus,
    ) -> StoreFuture<'_, Option<Slot>> {
        Box::pin(async move {
            self.with_state(|state| {
                state.take_failure(StoreOperation::TransitionStatus)?;
                let slot = state.slot_mut(slot_id)?;
                if slot.status != expected {
                    return Ok(None);
                }
                slot.status = target;
                slot.version += 1;
                Ok(Some(slot.clone()))
            })
        })
    }

    fn archive_slot(&self, slot_id: SlotId, _now: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.with_state(|state| {
                let slot = state.slot_mut(slot_id)?;
                if !matches!(slot.status, SlotStatus::Cancelled | SlotStatus::Completed) {
                    return Ok(false);
                }
                state.slots.remove(&slot_id);
                Ok(true)
            })
        })
    }
}

impl LedgerStore for InMemoryStore {
    fn open_wallet(&self, user_id: UserId, _now: DateTime<Utc>) -> StoreFuture<'_, Money> {
        Box::pin(async move {
            self.with_state(|state| Ok(state.wallets.entry(user_id).or_default().balance))
        })
    }

    fn balance(&self, user_id: UserId) -> StoreFuture<'_, Money> {
        Box::pin(async move {
            self.with_state(|state| {
                state
                    .wallets
                    .get(&user_id)
                    .map(|w| w.balance)
                    .ok_or(SlotbookError::UserNotFound(user_id))
            })
        })
    }

    fn apply_entry(&self, request: EntryRequest, now: DateTime<Utc>) -> StoreFuture<'_, LedgerEntry> {
        Box::pin(async move {
            self.with_state(|state| {
                state.take_failure(StoreOperation::ApplyEntry)?;
                state.apply(request, now)
            })
        })
    }

    fn find_entry(&self, reference: String) -> StoreFuture<'_, Option<LedgerEntry>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .by_reference
                    .get(&reference)
                    .map(|&index| state.entries[index].clone()))
            })
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
            self.with_state(|state| {
                let index = state.entry_index(&reference)?;
                let hold = &mut state.entries[index];
                ensure_claimable(hold, stale_before)?;

                hold.status = EntryStatus::Processing;
                hold.resolved_by = Some(admin);
                hold.updated_at = now;
                Ok(hold.clone())
            })
        })
    }

    fn release_claim(&self, reference: String, now: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.with_state(|state| {
                let index = state.entry_index(&reference)?;
                let hold = &mut state.entries[index];
                if hold.status != EntryStatus::Processing {
                    return Ok(false);
                }
                hold.status = EntryStatus::PendingAdminApproval;
                hold.resolved_by = None;
                hold.updated_at = now;
                Ok(true)
            })
        })
    }

    fn resolve_hold(&self, resolution: HoldResolution, now: DateTime<Utc>) -> StoreFuture<'_, HoldOutcome> {
        Box::pin(async move {
            self.with_state(|state| {
                state.take_failure(StoreOperation::ResolveHold)?;
                let index = state.entry_index(&resolution.reference)?;
                ensure_resolvable(&state.entries[index], resolution.target)?;

                let follow_up = state.apply(resolution.follow_up, now)?;

                let hold = &mut state.entries[index];
                hold.status = resolution.target;
                hold.resolved_by = Some(resolution.admin);
                hold.resolution_note = resolution.note;
                hold.updated_at = now;

                Ok(HoldOutcome {
                    hold: hold.clone(),
                    follow_up,
                })
            })
        })
    }

    fn list_entries(&self, user_id: UserId, page: Page) -> StoreFuture<'_, Paginated<LedgerEntry>> {
        Box::pin(async move {
            self.with_state(|state| {
                if !state.wallets.contains_key(&user_id) {
                    return Err(SlotbookError::UserNotFound(user_id));
                }
                let mut entries: Vec<LedgerEntry> = state
                    .entries
                    .iter()
                    .filter(|e| e.user_id == user_id)
                    .cloned()
                    .collect();
                entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
                Ok(Paginated::from_ordered(entries, page))
            })
        })
    }

    fn list_pending_holds(&self, page: Page) -> StoreFuture<'_, Paginated<LedgerEntry>> {
        Box::pin(async move {
            self.with_state(|state| {
                let pending: Vec<LedgerEntry> = state
                    .entries
                    .iter()
                    .filter(|e| {
                        e.kind == EntryKind::WithdrawHold
                            && matches!(
                                e.status,
                                EntryStatus::PendingAdminApproval | EntryStatus::Processing
                            )
                    })
                    .cloned()
                    .collect();
                Ok(Paginated::from_ordered(pending, page))
            })
        })
    }
}

impl BookingStore for InMemoryStore {
    fn insert_booking(&self, booking: Booking) -> StoreFuture<'_, Booking> {
        Box::pin(async move {
            self.with_state(|state| {
                state.take_failure(StoreOperation::InsertBooking)?;
                if let Some(existing) = state.bookings.get(&booking.id) {
                    return Ok(existing.clone());
                }
                state.booking_order.push(booking.id);
                state.bookings.insert(booking.id, booking.clone());
                Ok(booking)
            })
        })
    }

    fn load_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move { self.with_state(|state| Ok(state.bookings.get(&booking_id).cloned())) })
    }

    fn mark_cancelled(&self, booking_id: BookingId, now: DateTime<Utc>) -> StoreFuture<'_, Booking> {
        Box::pin(async move {
            self.with_state(|state| {
                state.take_failure(StoreOperation::MarkCancelled)?;
                let booking = state
                    .bookings
                    .get_mut(&booking_id)
                    .ok_or(SlotbookError::BookingNotFound(booking_id))?;
                match booking.status {
                    BookingStatus::Confirmed => {
                        booking.status = BookingStatus::Cancelled;
                        booking.updated_at = now;
                        Ok(booking.clone())
                    }
                    BookingStatus::Cancelled => Ok(booking.clone()),
                    BookingStatus::Completed => Err(SlotbookError::BookingNotActive {
                        booking_id,
                        status: booking.status,
                    }),
                }
            })
        })
    }

    fn list_for_slot(
        &self,
        slot_id: SlotId,
        status: Option<BookingStatus>,
    ) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .booking_order
                    .iter()
                    .filter_map(|id| state.bookings.get(id))
                    .filter(|b| b.slot_id == slot_id)
                    .filter(|b| status.is_none_or(|wanted| b.status == wanted))
                    .cloned()
                    .collect())
            })
        })
    }

    fn list_for_user(&self, user_id: UserId, page: Page) -> StoreFuture<'_, Paginated<Booking>> {
        Box::pin(async move {
            self.with_state(|state| {
                let bookings: Vec<Booking> = state
                    .booking_order
                    .iter()
                    .rev()
                    .filter_map(|id| state.bookings.get(id))
                    .filter(|b| b.user_id == user_id)
                    .cloned()
                    .collect();
                Ok(Paginated::from_ordered(bookings, page))
            })
        })
    }

    fn list_orphaned(&self) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .booking_order
                    .iter()
                    .filter_map(|id| state.bookings.get(id))
                    .filter(|b| b.status == BookingStatus::Confirmed && !state.slots.contains_key(&b.slot_id))
                    .cloned()
                    .collect())
            })
        })
    }

    fn complete_for_slot(&self, slot_id: SlotId, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.with_state(|state| {
                let mut completed = 0;
                for booking in state.bookings.values_mut() {
                    if booking.slot_id == slot_id && booking.status == BookingStatus::Confirmed {
                        booking.status = BookingStatus::Completed;
                        booking.updated_at = now;
                        completed += 1;
                    }
                }
                Ok(completed)
            })
        })
    }
}
