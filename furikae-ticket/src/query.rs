use chrono::NaiveDate;
use furikae_core::{
    AvailableSlot, Booking, Clock, CoreError, CoreResult, DateRange, SlotQuery, Ticket, TicketStatus, TicketStore,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::sweeper::ExpirySweeper;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketHistory {
    pub ticket: Ticket,
    /// Newest first.
    pub bookings: Vec<Booking>,
}

/// Read side. Every call goes to the store; nothing is cached between requests.
pub struct QueryFacade {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    sweeper: Arc<ExpirySweeper>,
    max_slot_query_days: i64,
}

impl QueryFacade {
    pub fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        sweeper: Arc<ExpirySweeper>,
        max_slot_query_days: i64,
    ) -> Self {
        Self { store, clock, sweeper, max_slot_query_days }
    }

    pub async fn list_my_tickets(&self, student_id: &str, status: Option<TicketStatus>) -> CoreResult<Vec<Ticket>> {
        if student_id.trim().is_empty() {
            return Err(CoreError::ValidationError("studentId is required".into()));
        }
        self.sweeper.expire_for_student(student_id).await?;
        Ok(self.store.list_tickets(student_id, status).await?)
    }

    /// Slots the ticket could be exchanged for right now, by date then start time.
    pub async fn list_available_slots(
        &self,
        ticket_id: Uuid,
        date_from: NaiveDate,
        date_to: NaiveDate,
        school_id: Option<String>,
    ) -> CoreResult<Vec<AvailableSlot>> {
        let range = DateRange::new(date_from, date_to, self.max_slot_query_days)?;
        let ticket = self.sweeper.expire_ticket(ticket_id).await?;
        let now = self.clock.now();
        ticket.check_redeemable(now)?;

        let query = SlotQuery {
            brands: ticket.product_scope,
            range,
            school_id: school_id.filter(|s| !s.trim().is_empty()),
            starts_after: now.naive_utc(),
        };
        let slots = self.store.find_slots(&query).await?;
        Ok(slots.into_iter().map(AvailableSlot::from).collect())
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> CoreResult<Ticket> {
        self.sweeper.expire_ticket(ticket_id).await
    }

    pub async fn history(&self, ticket_id: Uuid) -> CoreResult<TicketHistory> {
        let ticket = self.sweeper.expire_ticket(ticket_id).await?;
        let bookings = self.store.bookings_for_ticket(ticket_id).await?;
        Ok(TicketHistory { ticket, bookings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::BookingCoordinator;
    use crate::retry::RetryPolicy;
    use chrono::{DateTime, NaiveTime, TimeZone, Utc};
    use furikae_core::{ManualClock, RecordingPublisher, SlotDefinition, TicketDraft};
    use furikae_store::MemoryTicketStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryTicketStore>,
        clock: Arc<ManualClock>,
        coordinator: BookingCoordinator,
        queries: QueryFacade,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, day).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryTicketStore::new());
        let clock = Arc::new(ManualClock::new(now()));
        let events = Arc::new(RecordingPublisher::new());
        let sweeper = Arc::new(ExpirySweeper::new(store.clone(), clock.clone(), events.clone(), 50));
        let coordinator = BookingCoordinator::new(
            store.clone(),
            clock.clone(),
            events,
            Duration::from_secs(2),
            RetryPolicy::default(),
        );
        let queries = QueryFacade::new(store.clone(), clock.clone(), sweeper, 31);
        Fixture { store, clock, coordinator, queries }
    }

    async fn seed_ticket(store: &MemoryTicketStore, scope: &[&str], days: i64) -> Ticket {
        let ticket = Ticket::new(TicketDraft {
            student_id: "stu-1".into(),
            contract_id: "standard".into(),
            origin_lesson_id: format!("lesson-{}", Uuid::new_v4()),
            brand_id: scope[0].into(),
            product_scope: scope.iter().map(|s| s.to_string()).collect(),
            absence_date: date(9),
            issued_at: now(),
            expires_at: now() + chrono::Duration::days(days),
        });
        let mut tx = store.begin().await.unwrap();
        tx.insert_ticket(&ticket).await.unwrap();
        tx.commit().await.unwrap();
        ticket
    }

    async fn slot(f: &Fixture, school: &str, brand: &str, day: u32, hour: u32, capacity: i32) -> Uuid {
        f.coordinator
            .register_slot(SlotDefinition {
                id: Uuid::new_v4(),
                school_id: school.into(),
                brand_id: brand.into(),
                date: date(day),
                start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
                capacity,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_available_slots_are_filtered_and_ordered() {
        let f = fixture();
        let ticket = seed_ticket(&f.store, &["math", "math-online"], 30).await;

        let later = slot(&f, "school-a", "math", 14, 16, 2).await;
        let earlier = slot(&f, "school-b", "math-online", 12, 9, 2).await;
        let same_day_later = slot(&f, "school-a", "math", 12, 15, 2).await;
        slot(&f, "school-a", "english", 12, 10, 2).await;
        slot(&f, "school-a", "math", 10, 9, 2).await; // already started
        slot(&f, "school-a", "math", 20, 9, 2).await; // outside the range
        let full = slot(&f, "school-a", "math", 13, 9, 1).await;
        let other = seed_ticket(&f.store, &["math"], 30).await;
        f.coordinator.reserve(other.id, full).await.unwrap();

        let slots = f.queries.list_available_slots(ticket.id, date(10), date(17), None).await.unwrap();
        let ids: Vec<Uuid> = slots.iter().map(|s| s.slot.id).collect();
        assert_eq!(ids, vec![earlier, same_day_later, later]);
        assert!(slots.iter().all(|s| s.remaining == 2));

        let school_a = f
            .queries
            .list_available_slots(ticket.id, date(10), date(17), Some("school-a".into()))
            .await
            .unwrap();
        assert_eq!(school_a.len(), 2);
    }

    #[tokio::test]
    async fn test_range_is_validated() {
        let f = fixture();
        let ticket = seed_ticket(&f.store, &["math"], 30).await;

        assert!(matches!(
            f.queries.list_available_slots(ticket.id, date(17), date(10), None).await,
            Err(CoreError::ValidationError(_))
        ));
        let far = NaiveDate::from_ymd_opt(2026, 6, 30).unwrap();
        assert!(matches!(
            f.queries.list_available_slots(ticket.id, date(10), far, None).await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_browsing_expires_a_stale_ticket() {
        let f = fixture();
        let ticket = seed_ticket(&f.store, &["math"], 1).await;
        f.clock.advance(chrono::Duration::days(2));

        let err = f
            .queries
            .list_available_slots(ticket.id, date(12), date(14), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TicketNotRedeemable { .. }));
        assert_eq!(f.queries.get_ticket(ticket.id).await.unwrap().status, TicketStatus::Expired);
    }

    #[tokio::test]
    async fn test_my_tickets_and_history() {
        let f = fixture();
        let stale = seed_ticket(&f.store, &["math"], 1).await;
        let live = seed_ticket(&f.store, &["math"], 30).await;
        let slot_id = slot(&f, "school-a", "math", 14, 16, 2).await;
        let booking = f.coordinator.reserve(live.id, slot_id).await.unwrap();
        f.coordinator.release(booking.id, "clash").await.unwrap();
        f.clock.advance(chrono::Duration::days(1));
        let second = f.coordinator.reserve(live.id, slot_id).await.unwrap();

        let expired = f.queries.list_my_tickets("stu-1", Some(TicketStatus::Expired)).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
        assert_eq!(f.queries.list_my_tickets("stu-1", None).await.unwrap().len(), 2);
        assert!(matches!(
            f.queries.list_my_tickets("", None).await,
            Err(CoreError::ValidationError(_))
        ));

        let history = f.queries.history(live.id).await.unwrap();
        assert_eq!(history.ticket.status, TicketStatus::Reserved);
        let ids: Vec<Uuid> = history.bookings.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![second.id, booking.id]);
    }
}
