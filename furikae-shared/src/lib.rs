pub mod models;

pub use models::events::{
    AbsenceRegisteredEvent, AttendanceRecordedEvent, LifecycleEvent, LifecycleEventKind,
};
