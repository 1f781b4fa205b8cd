use chrono::NaiveDate;
use uuid::Uuid;

/// Inbound: a student was marked absent for a scheduled lesson.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceRegisteredEvent {
    pub student_id: String,
    pub contract_id: String,
    pub origin_lesson_id: String,
    pub brand_id: String,
    pub absence_date: NaiveDate,
    #[serde(default)]
    pub lesson_date: Option<NaiveDate>,
}

/// Inbound: the lesson-management side recorded attendance for a makeup lesson.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecordedEvent {
    pub booking_id: Uuid,
    pub attended: bool,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Issued,
    Reserved,
    Released,
    Used,
    Expired,
    Cancelled,
}

impl LifecycleEventKind {
    pub fn topic(&self) -> &'static str {
        match self {
            LifecycleEventKind::Issued => "ticket.issued",
            LifecycleEventKind::Reserved => "ticket.reserved",
            LifecycleEventKind::Released => "ticket.released",
            LifecycleEventKind::Used => "ticket.used",
            LifecycleEventKind::Expired => "ticket.expired",
            LifecycleEventKind::Cancelled => "ticket.cancelled",
        }
    }
}

/// Outbound: a ticket changed state. Published after the owning transaction commits.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub ticket_id: Uuid,
    pub student_id: String,
    pub booking_id: Option<Uuid>,
    pub slot_id: Option<Uuid>,
    pub reason: Option<String>,
    pub timestamp: i64,
}

impl LifecycleEvent {
    pub fn topic(&self) -> &'static str {
        self.kind.topic()
    }
}
