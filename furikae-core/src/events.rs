use async_trait::async_trait;
use furikae_shared::LifecycleEvent;
use std::sync::Mutex;
use tracing::info;

/// Outbound sink for ticket lifecycle events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Writes events to the log only. Used when no broker is configured.
#[derive(Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("{} ticket={} booking={:?}", event.topic(), event.ticket_id, event.booking_id);
        Ok(())
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
        Ok(())
    }
}
