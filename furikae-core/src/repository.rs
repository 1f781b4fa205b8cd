use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::Booking;
use crate::slot::{SlotQuery, TimeSlot};
use crate::ticket::{Ticket, TicketStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lock wait timeout, serialization failure, deadlock, exhausted pool.
    #[error("transient store contention: {0}")]
    Transient(String),
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("store failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which `issued` tickets a sweep may look at.
#[derive(Debug, Clone, Default)]
pub struct DueScope {
    pub student_id: Option<String>,
}

/// Durable home of tickets, slots and bookings.
///
/// The non-transactional methods are plain reads. Every state change goes
/// through a [`StoreTransaction`] obtained from [`TicketStore::begin`].
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    async fn list_tickets(&self, student_id: &str, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>>;

    async fn get_slot(&self, id: Uuid) -> StoreResult<Option<TimeSlot>>;

    /// Slots matching `query`, ordered by date then start time.
    async fn find_slots(&self, query: &SlotQuery) -> StoreResult<Vec<TimeSlot>>;

    /// Inserts the slot unless one with the same id exists; returns the stored row.
    async fn register_slot(&self, slot: &TimeSlot) -> StoreResult<TimeSlot>;

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// Every booking ever made with the ticket, newest first.
    async fn bookings_for_ticket(&self, ticket_id: Uuid) -> StoreResult<Vec<Booking>>;

    /// Active bookings whose slot started at or before `now`.
    async fn started_active_bookings(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Booking>>;
}

/// One atomic unit of work. Dropping it without `commit` rolls everything back.
///
/// Callers take locks in the order ticket → booking → slot.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn lock_ticket(&mut self, id: Uuid) -> StoreResult<Option<Ticket>>;

    async fn lock_ticket_by_origin(&mut self, origin_lesson_id: &str) -> StoreResult<Option<Ticket>>;

    /// Locks up to `limit` `issued` tickets with `expires_at <= now`, skipping rows held elsewhere.
    async fn lock_due_tickets(
        &mut self,
        scope: &DueScope,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Ticket>>;

    async fn lock_booking(&mut self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn active_booking(&mut self, ticket_id: Uuid) -> StoreResult<Option<Booking>>;

    async fn lock_slot(&mut self, id: Uuid) -> StoreResult<Option<TimeSlot>>;

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()>;

    async fn update_ticket(&mut self, ticket: &Ticket) -> StoreResult<()>;

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()>;

    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()>;

    /// Persists `booked_count`; every other slot column is owned by the timetable.
    async fn update_slot(&mut self, slot: &TimeSlot) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
