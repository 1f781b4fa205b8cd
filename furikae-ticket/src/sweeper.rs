use chrono::{DateTime, Utc};
use furikae_core::{Clock, CoreError, CoreResult, DueScope, EventPublisher, Ticket, TicketStore};
use furikae_shared::LifecycleEventKind;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::coordinator::BookingCoordinator;
use crate::publish;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired: usize,
    pub confirmed: usize,
}

/// Moves past-due `issued` tickets to `expired`.
///
/// Runs periodically and is also called lazily by every read that touches a
/// ticket, so a stale ticket is never shown or redeemed even between runs.
pub struct ExpirySweeper {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    batch_size: usize,
    auto_confirm: Option<Arc<BookingCoordinator>>,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        batch_size: usize,
    ) -> Self {
        Self { store, clock, events, batch_size: batch_size.max(1), auto_confirm: None }
    }

    /// Also confirm active bookings whose lesson has started on each periodic run.
    pub fn with_auto_confirm(mut self, coordinator: Arc<BookingCoordinator>) -> Self {
        self.auto_confirm = Some(coordinator);
        self
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        self.sweep_scope(&DueScope::default(), now).await
    }

    pub async fn expire_for_student(&self, student_id: &str) -> CoreResult<usize> {
        let scope = DueScope { student_id: Some(student_id.to_string()) };
        self.sweep_scope(&scope, self.clock.now()).await
    }

    /// Loads one ticket, expiring it first if it is past due.
    pub async fn expire_ticket(&self, ticket_id: Uuid) -> CoreResult<Ticket> {
        let now = self.clock.now();
        let ticket = self
            .store
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Ticket", ticket_id))?;
        if !ticket.is_due(now) {
            return Ok(ticket);
        }

        let mut tx = self.store.begin().await?;
        let mut ticket = tx
            .lock_ticket(ticket_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Ticket", ticket_id))?;
        // Re-checked under the lock: a concurrent reserve or sweep may have moved it.
        if !ticket.is_due(now) {
            return Ok(ticket);
        }
        ticket.expire(now)?;
        tx.update_ticket(&ticket).await?;
        tx.commit().await?;

        info!("Ticket {} expired on read (deadline {})", ticket.id, ticket.expires_at);
        publish(self.events.as_ref(), ticket.lifecycle_event(LifecycleEventKind::Expired, None, None, now)).await;
        Ok(ticket)
    }

    /// Confirms active bookings whose slot has started. Failures are logged per booking.
    pub async fn confirm_started(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let Some(coordinator) = &self.auto_confirm else {
            return Ok(0);
        };

        let started = self.store.started_active_bookings(now, self.batch_size).await?;
        let mut confirmed = 0;
        for booking in started {
            match coordinator.confirm(booking.id).await {
                Ok(_) => confirmed += 1,
                Err(e) => warn!("Auto-confirm of booking {} failed: {}", booking.id, e),
            }
        }
        Ok(confirmed)
    }

    pub async fn run_once(&self) -> CoreResult<SweepReport> {
        let now = self.clock.now();
        let expired = self.sweep_expired(now).await?;
        let confirmed = self.confirm_started(now).await?;
        if expired > 0 || confirmed > 0 {
            info!("Sweep finished: {} expired, {} confirmed", expired, confirmed);
        }
        Ok(SweepReport { expired, confirmed })
    }

    /// Periodic loop. Never returns; errors are logged and the next tick tries again.
    pub async fn run(self: Arc<Self>, every: Duration) {
        info!("Expiry sweeper started, interval {:?}", every);
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!("Expiry sweep failed: {}", e);
            }
        }
    }

    async fn sweep_scope(&self, scope: &DueScope, now: DateTime<Utc>) -> CoreResult<usize> {
        let mut total = 0;
        loop {
            let expired = self.expire_batch(scope, now).await?;
            let count = expired.len();
            for ticket in expired {
                publish(self.events.as_ref(), ticket.lifecycle_event(LifecycleEventKind::Expired, None, None, now))
                    .await;
            }
            total += count;
            if count < self.batch_size {
                break;
            }
        }
        Ok(total)
    }

    async fn expire_batch(&self, scope: &DueScope, now: DateTime<Utc>) -> CoreResult<Vec<Ticket>> {
        let mut tx = self.store.begin().await?;
        let due = tx.lock_due_tickets(scope, now, self.batch_size).await?;
        if due.is_empty() {
            return Ok(due);
        }

        let mut expired = Vec::with_capacity(due.len());
        for mut ticket in due {
            ticket.expire(now)?;
            tx.update_ticket(&ticket).await?;
            expired.push(ticket);
        }
        tx.commit().await?;

        info!("Expired {} tickets past their deadline", expired.len());
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use furikae_core::{ManualClock, RecordingPublisher, SlotDefinition, TicketDraft, TicketStatus};
    use furikae_store::MemoryTicketStore;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 0).unwrap()
    }

    async fn seed(store: &MemoryTicketStore, student: &str, days: i64) -> Ticket {
        let ticket = Ticket::new(TicketDraft {
            student_id: student.into(),
            contract_id: "standard".into(),
            origin_lesson_id: format!("lesson-{}", Uuid::new_v4()),
            brand_id: "math".into(),
            product_scope: vec!["math".into()],
            absence_date: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
            issued_at: start(),
            expires_at: start() + chrono::Duration::days(days),
        });
        let mut tx = store.begin().await.unwrap();
        tx.insert_ticket(&ticket).await.unwrap();
        tx.commit().await.unwrap();
        ticket
    }

    #[tokio::test]
    async fn test_sweep_expires_only_due_issued_tickets_in_batches() {
        let store = Arc::new(MemoryTicketStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let events = Arc::new(RecordingPublisher::new());
        let sweeper = ExpirySweeper::new(store.clone(), clock.clone(), events.clone(), 2);

        for _ in 0..5 {
            seed(&store, "stu-1", 1).await;
        }
        let fresh = seed(&store, "stu-1", 10).await;

        assert_eq!(sweeper.sweep_expired(start()).await.unwrap(), 0);

        let later = start() + chrono::Duration::days(2);
        assert_eq!(sweeper.sweep_expired(later).await.unwrap(), 5);
        assert_eq!(events.events().len(), 5);
        assert_eq!(store.get_ticket(fresh.id).await.unwrap().unwrap().status, TicketStatus::Issued);
        assert_eq!(sweeper.sweep_expired(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lazy_expiry_is_scoped() {
        let store = Arc::new(MemoryTicketStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let sweeper = ExpirySweeper::new(store.clone(), clock.clone(), Arc::new(RecordingPublisher::new()), 10);

        let mine = seed(&store, "stu-1", 1).await;
        let theirs = seed(&store, "stu-2", 1).await;
        clock.advance(chrono::Duration::days(1));

        assert_eq!(sweeper.expire_for_student("stu-1").await.unwrap(), 1);
        assert_eq!(store.get_ticket(mine.id).await.unwrap().unwrap().status, TicketStatus::Expired);
        assert_eq!(store.get_ticket(theirs.id).await.unwrap().unwrap().status, TicketStatus::Issued);

        let expired = sweeper.expire_ticket(theirs.id).await.unwrap();
        assert_eq!(expired.status, TicketStatus::Expired);
    }

    #[tokio::test]
    async fn test_auto_confirm_started_lessons() {
        let store = Arc::new(MemoryTicketStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let events = Arc::new(RecordingPublisher::new());
        let coordinator = Arc::new(BookingCoordinator::new(
            store.clone(),
            clock.clone(),
            events.clone(),
            Duration::from_secs(2),
            RetryPolicy::default(),
        ));
        let sweeper = ExpirySweeper::new(store.clone(), clock.clone(), events.clone(), 10)
            .with_auto_confirm(coordinator.clone());

        let ticket = seed(&store, "stu-1", 30).await;
        let slot = coordinator
            .register_slot(SlotDefinition {
                id: Uuid::new_v4(),
                school_id: "school-a".into(),
                brand_id: "math".into(),
                date: NaiveDate::from_ymd_opt(2026, 4, 12).unwrap(),
                start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                capacity: 4,
            })
            .await
            .unwrap();
        coordinator.reserve(ticket.id, slot.id).await.unwrap();

        assert_eq!(sweeper.run_once().await.unwrap(), SweepReport::default());

        clock.advance(chrono::Duration::days(2) + chrono::Duration::hours(1));
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report, SweepReport { expired: 0, confirmed: 1 });
        assert_eq!(store.get_ticket(ticket.id).await.unwrap().unwrap().status, TicketStatus::Used);
    }
}
