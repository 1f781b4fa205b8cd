pub mod coordinator;
pub mod issuer;
pub mod query;
pub mod retry;
pub mod sweeper;

use furikae_core::{Clock, EligibilityRules, EventPublisher, PolicyTable, TicketStore};
use furikae_shared::LifecycleEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use coordinator::BookingCoordinator;
pub use issuer::{IssueRequest, TicketIssuer};
pub use query::{QueryFacade, TicketHistory};
pub use retry::RetryPolicy;
pub use sweeper::{ExpirySweeper, SweepReport};

/// Events go out after commit; a broker outage never undoes a committed transition.
pub(crate) async fn publish(events: &dyn EventPublisher, event: LifecycleEvent) {
    if let Err(e) = events.publish(&event).await {
        warn!("Failed to publish {} for ticket {}: {}", event.topic(), event.ticket_id, e);
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub reserve_timeout: Duration,
    pub retry: RetryPolicy,
    pub sweep_batch_size: usize,
    pub max_slot_query_days: i64,
    pub auto_confirm_started_lessons: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reserve_timeout: Duration::from_secs(3),
            retry: RetryPolicy::default(),
            sweep_batch_size: 200,
            max_slot_query_days: 62,
            auto_confirm_started_lessons: false,
        }
    }
}

/// The ticket services wired to one store, clock and event sink.
#[derive(Clone)]
pub struct Engine {
    pub issuer: Arc<TicketIssuer>,
    pub coordinator: Arc<BookingCoordinator>,
    pub sweeper: Arc<ExpirySweeper>,
    pub queries: Arc<QueryFacade>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        policies: PolicyTable,
        eligibility: EligibilityRules,
        settings: EngineSettings,
    ) -> Self {
        let issuer = Arc::new(TicketIssuer::new(
            store.clone(),
            Arc::new(policies),
            Arc::new(eligibility),
            clock.clone(),
            events.clone(),
            settings.retry.clone(),
        ));
        let coordinator = Arc::new(BookingCoordinator::new(
            store.clone(),
            clock.clone(),
            events.clone(),
            settings.reserve_timeout,
            settings.retry.clone(),
        ));

        let mut sweeper = ExpirySweeper::new(store.clone(), clock.clone(), events, settings.sweep_batch_size);
        if settings.auto_confirm_started_lessons {
            sweeper = sweeper.with_auto_confirm(coordinator.clone());
        }
        let sweeper = Arc::new(sweeper);

        let queries = Arc::new(QueryFacade::new(store, clock, sweeper.clone(), settings.max_slot_query_days));

        Self { issuer, coordinator, sweeper, queries }
    }
}
