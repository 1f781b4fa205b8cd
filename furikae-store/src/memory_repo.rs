use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use furikae_core::repository::{DueScope, StoreError, StoreResult, StoreTransaction, TicketStore};
use furikae_core::{Booking, SlotQuery, Ticket, TicketStatus, TimeSlot};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    tickets: HashMap<Uuid, Ticket>,
    slots: HashMap<Uuid, TimeSlot>,
    bookings: HashMap<Uuid, Booking>,
}

/// In-process store. A transaction owns the whole state for its lifetime,
/// so every unit of work is serializable.
#[derive(Clone, Default)]
pub struct MemoryTicketStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            guard,
            staged: MemoryState::default(),
        }))
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.state.lock().await.tickets.get(&id).cloned())
    }

    async fn list_tickets(&self, student_id: &str, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>> {
        let state = self.state.lock().await;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.student_id == student_id)
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(tickets)
    }

    async fn get_slot(&self, id: Uuid) -> StoreResult<Option<TimeSlot>> {
        Ok(self.state.lock().await.slots.get(&id).cloned())
    }

    async fn find_slots(&self, query: &SlotQuery) -> StoreResult<Vec<TimeSlot>> {
        let state = self.state.lock().await;
        let mut slots: Vec<TimeSlot> = state.slots.values().filter(|s| query.matches(s)).cloned().collect();
        slots.sort_by(|a, b| (a.date, a.start_time).cmp(&(b.date, b.start_time)));
        Ok(slots)
    }

    async fn register_slot(&self, slot: &TimeSlot) -> StoreResult<TimeSlot> {
        let mut state = self.state.lock().await;
        Ok(state.slots.entry(slot.id).or_insert_with(|| slot.clone()).clone())
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.state.lock().await.bookings.get(&id).cloned())
    }

    async fn bookings_for_ticket(&self, ticket_id: Uuid) -> StoreResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.ticket_id == ticket_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn started_active_bookings(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut started: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.is_active())
            .filter(|b| state.slots.get(&b.slot_id).is_some_and(|s| s.has_started(now)))
            .cloned()
            .collect();
        started.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        started.truncate(limit);
        Ok(started)
    }
}

/// Writes are staged and only applied to the shared state on commit.
struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

impl MemoryTransaction {
    fn ticket(&self, id: Uuid) -> Option<Ticket> {
        self.staged.tickets.get(&id).or_else(|| self.guard.tickets.get(&id)).cloned()
    }

    fn tickets(&self) -> Vec<Ticket> {
        let mut merged = self.guard.tickets.clone();
        merged.extend(self.staged.tickets.clone());
        merged.into_values().collect()
    }

    fn bookings(&self) -> Vec<Booking> {
        let mut merged = self.guard.bookings.clone();
        merged.extend(self.staged.bookings.clone());
        merged.into_values().collect()
    }

    fn ensure_single_active(&self, booking: &Booking) -> StoreResult<()> {
        if !booking.is_active() {
            return Ok(());
        }
        let clash = self
            .bookings()
            .into_iter()
            .any(|b| b.ticket_id == booking.ticket_id && b.is_active() && b.id != booking.id);
        if clash {
            return Err(StoreError::Conflict(format!(
                "ticket {} already has an active booking",
                booking.ticket_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_ticket(&mut self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.ticket(id))
    }

    async fn lock_ticket_by_origin(&mut self, origin_lesson_id: &str) -> StoreResult<Option<Ticket>> {
        Ok(self.tickets().into_iter().find(|t| t.origin_lesson_id == origin_lesson_id))
    }

    async fn lock_due_tickets(
        &mut self,
        scope: &DueScope,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Ticket>> {
        let mut due: Vec<Ticket> = self
            .tickets()
            .into_iter()
            .filter(|t| t.is_due(now))
            .filter(|t| scope.student_id.as_ref().map_or(true, |s| *s == t.student_id))
            .collect();
        due.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn lock_booking(&mut self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self
            .staged
            .bookings
            .get(&id)
            .or_else(|| self.guard.bookings.get(&id))
            .cloned())
    }

    async fn active_booking(&mut self, ticket_id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self
            .bookings()
            .into_iter()
            .find(|b| b.ticket_id == ticket_id && b.is_active()))
    }

    async fn lock_slot(&mut self, id: Uuid) -> StoreResult<Option<TimeSlot>> {
        Ok(self.staged.slots.get(&id).or_else(|| self.guard.slots.get(&id)).cloned())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        if self.ticket(ticket.id).is_some() {
            return Err(StoreError::Conflict(format!("ticket {} already exists", ticket.id)));
        }
        if self.tickets().iter().any(|t| t.origin_lesson_id == ticket.origin_lesson_id) {
            return Err(StoreError::Conflict(format!(
                "origin lesson {} already has a ticket",
                ticket.origin_lesson_id
            )));
        }
        self.staged.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        if self.ticket(ticket.id).is_none() {
            return Err(StoreError::Backend(format!("ticket {} does not exist", ticket.id)));
        }
        self.staged.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        self.ensure_single_active(booking)?;
        self.staged.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        self.ensure_single_active(booking)?;
        self.staged.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_slot(&mut self, slot: &TimeSlot) -> StoreResult<()> {
        if slot.booked_count < 0 || slot.booked_count > slot.capacity {
            return Err(StoreError::Backend(format!(
                "slot {} booked_count {} outside 0..={}",
                slot.id, slot.booked_count, slot.capacity
            )));
        }
        let mut stored = self
            .staged
            .slots
            .get(&slot.id)
            .or_else(|| self.guard.slots.get(&slot.id))
            .cloned()
            .ok_or_else(|| StoreError::Backend(format!("slot {} does not exist", slot.id)))?;
        stored.booked_count = slot.booked_count;
        self.staged.slots.insert(stored.id, stored);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { mut guard, staged } = *self;
        guard.tickets.extend(staged.tickets);
        guard.slots.extend(staged.slots);
        guard.bookings.extend(staged.bookings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime};
    use furikae_core::{SlotDefinition, TicketDraft};
    use std::time::Duration as StdDuration;

    fn ticket(origin: &str) -> Ticket {
        let now = Utc::now();
        Ticket::new(TicketDraft {
            student_id: "stu-1".into(),
            contract_id: "con-1".into(),
            origin_lesson_id: origin.into(),
            brand_id: "math".into(),
            product_scope: vec!["math".into()],
            absence_date: now.date_naive(),
            issued_at: now,
            expires_at: now + Duration::days(30),
        })
    }

    fn slot(capacity: i32) -> TimeSlot {
        SlotDefinition {
            id: Uuid::new_v4(),
            school_id: "school-a".into(),
            brand_id: "math".into(),
            date: (Utc::now() + Duration::days(3)).date_naive(),
            start_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            capacity,
        }
        .into_slot()
        .unwrap()
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = MemoryTicketStore::new();
        let t = ticket("lesson-1");

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_ticket(&t).await.unwrap();
            assert!(tx.lock_ticket(t.id).await.unwrap().is_some());
        }
        assert!(store.get_ticket(t.id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert_ticket(&t).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.get_ticket(t.id).await.unwrap(), Some(t));
    }

    #[tokio::test]
    async fn origin_lesson_is_unique() {
        let store = MemoryTicketStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_ticket(&ticket("lesson-1")).await.unwrap();
        let err = tx.insert_ticket(&ticket("lesson-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn one_active_booking_per_ticket() {
        let store = MemoryTicketStore::new();
        let ticket_id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let mut first = Booking::new(ticket_id, Uuid::new_v4(), now);
        tx.insert_booking(&first).await.unwrap();
        let second = Booking::new(ticket_id, Uuid::new_v4(), now);
        assert!(matches!(tx.insert_booking(&second).await, Err(StoreError::Conflict(_))));

        first.release("moved".into(), now).unwrap();
        tx.update_booking(&first).await.unwrap();
        tx.insert_booking(&second).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.bookings_for_ticket(ticket_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn slot_updates_respect_capacity() {
        let store = MemoryTicketStore::new();
        let mut s = slot(1);
        store.register_slot(&s).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        s.booked_count = 2;
        assert!(tx.update_slot(&s).await.is_err());
        s.booked_count = 1;
        tx.update_slot(&s).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_slot(s.id).await.unwrap().unwrap().remaining(), 0);
    }

    #[tokio::test]
    async fn register_slot_keeps_original_capacity() {
        let store = MemoryTicketStore::new();
        let s = slot(3);
        store.register_slot(&s).await.unwrap();

        let mut changed = s.clone();
        changed.capacity = 10;
        assert_eq!(store.register_slot(&changed).await.unwrap().capacity, 3);
    }

    #[tokio::test]
    async fn transactions_are_exclusive() {
        let store = MemoryTicketStore::new();
        let held = store.begin().await.unwrap();

        let waiting = tokio::time::timeout(StdDuration::from_millis(50), store.begin()).await;
        assert!(waiting.is_err());

        drop(held);
        assert!(store.begin().await.is_ok());
    }
}
