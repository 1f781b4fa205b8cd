use furikae_shared::{AbsenceRegisteredEvent, AttendanceRecordedEvent};
use furikae_ticket::{Engine, RetryPolicy};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use std::time::Duration;
use tracing::{error, info, warn};

/// What to do with the offset of a message once the engine has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handled, or rejected for good. The offset may be committed.
    Done,
    /// The store stayed contended past the engine's own retries. Redeliver.
    Redeliver,
}

/// Feeds absence registrations and attendance records from Kafka into the engine.
///
/// Offsets are committed by hand once a message is settled. A message that
/// keeps hitting store contention is retried in place, so the partition waits
/// instead of skipping it.
pub async fn start_event_worker(
    brokers: String,
    group_id: String,
    absence_topic: String,
    attendance_topic: String,
    engine: Engine,
) -> Result<(), KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;

    consumer.subscribe(&[absence_topic.as_str(), attendance_topic.as_str()])?;

    info!("Event worker started, listening to {} and {}", absence_topic, attendance_topic);

    let redelivery = RetryPolicy::new(usize::MAX, Duration::from_millis(500), Duration::from_secs(30));

    loop {
        match consumer.recv().await {
            Err(e) => error!("Kafka error: {}", e),
            Ok(m) => {
                let topic = m.topic().to_string();
                let mut attempt = 0;
                loop {
                    let delivery = match m.payload_view::<str>() {
                        Some(Ok(payload)) if topic == absence_topic => handle_absence(&engine, payload).await,
                        Some(Ok(payload)) if topic == attendance_topic => handle_attendance(&engine, payload).await,
                        Some(Ok(_)) => {
                            warn!("Ignoring message from unexpected topic {}", topic);
                            Delivery::Done
                        }
                        Some(Err(e)) => {
                            error!("Error reading payload from {}: {}", topic, e);
                            Delivery::Done
                        }
                        None => {
                            warn!("Empty message on {}", topic);
                            Delivery::Done
                        }
                    };
                    if delivery == Delivery::Done {
                        break;
                    }
                    let delay = redelivery.jittered_delay(attempt);
                    warn!(
                        "Redelivering {} offset {} in {:?} (attempt {})",
                        topic,
                        m.offset(),
                        delay,
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1).min(16);
                }

                if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                    warn!("Failed to commit {} offset {}: {}", topic, m.offset(), e);
                }
            }
        }
    }
}

pub async fn handle_absence(engine: &Engine, payload: &str) -> Delivery {
    let event: AbsenceRegisteredEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            error!("Malformed absence event: {}", e);
            return Delivery::Done;
        }
    };

    let lesson = event.origin_lesson_id.clone();
    match engine.issuer.issue(event.into()).await {
        Ok(ticket) => {
            info!("Absence for lesson {} handled, ticket {}", lesson, ticket.id);
            Delivery::Done
        }
        Err(e) if e.is_transient() => {
            warn!("Absence for lesson {} not handled yet: {}", lesson, e);
            Delivery::Redeliver
        }
        Err(e) => {
            error!("Absence for lesson {} rejected: {}", lesson, e);
            Delivery::Done
        }
    }
}

pub async fn handle_attendance(engine: &Engine, payload: &str) -> Delivery {
    let event: AttendanceRecordedEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            error!("Malformed attendance event: {}", e);
            return Delivery::Done;
        }
    };

    match engine.coordinator.record_attendance(event.booking_id, event.attended).await {
        Ok(ticket) => {
            info!("Attendance for booking {} recorded, ticket {} is {}", event.booking_id, ticket.id, ticket.status);
            Delivery::Done
        }
        Err(e) if e.is_transient() => {
            warn!("Attendance for booking {} not recorded yet: {}", event.booking_id, e);
            Delivery::Redeliver
        }
        Err(e) => {
            error!("Attendance for booking {} failed: {}", event.booking_id, e);
            Delivery::Done
        }
    }
}
