pub mod booking;
pub mod clock;
pub mod events;
pub mod policy;
pub mod repository;
pub mod slot;
pub mod ticket;

use std::time::Duration;
use uuid::Uuid;

pub use booking::{Booking, BookingStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{EventPublisher, LogPublisher, RecordingPublisher};
pub use policy::{EligibilityRules, ExpiryPolicy, ExpiryRule, FnPolicy, PolicyContext, PolicyTable};
pub use repository::{DueScope, StoreError, StoreResult, StoreTransaction, TicketStore};
pub use slot::{AvailableSlot, DateRange, SlotDefinition, SlotQuery, TimeSlot};
pub use ticket::{Ticket, TicketDraft, TicketStatus};

/// How a failure should be handled by whoever receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or unknown ids. Never retried.
    Validation,
    /// Expected business outcome the end user can act on.
    StateConflict,
    /// Contention or timeouts. Safe to retry.
    Transient,
    /// Configuration or backend defect. Needs an operator.
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Ticket {ticket_id} cannot be redeemed: {reason}")]
    TicketNotRedeemable { ticket_id: Uuid, reason: String },
    #[error("Slot {0} has no remaining seats")]
    SlotFull(Uuid),
    #[error("Slot {0} has already started")]
    SlotClosed(Uuid),
    #[error("Booking {booking_id} is already {status}")]
    BookingAlreadyTerminal { booking_id: Uuid, status: BookingStatus },
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Capacity invariant violated: {0}")]
    CapacityInvariant(String),
    #[error("Expiry policy produced a non-positive window: {0}")]
    InvalidPolicyWindow(String),
    #[error("Reservation did not complete within {0:?}")]
    ReservationTimedOut(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound { entity, id: id.to_string() }
    }

    pub fn not_redeemable(ticket_id: Uuid, reason: impl Into<String>) -> Self {
        CoreError::TicketNotRedeemable { ticket_id, reason: reason.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ValidationError(_) | CoreError::NotFound { .. } => ErrorKind::Validation,
            CoreError::TicketNotRedeemable { .. }
            | CoreError::SlotFull(_)
            | CoreError::SlotClosed(_)
            | CoreError::BookingAlreadyTerminal { .. }
            | CoreError::InvalidTransition { .. } => ErrorKind::StateConflict,
            CoreError::ReservationTimedOut(_) => ErrorKind::Transient,
            CoreError::Store(StoreError::Transient(_)) => ErrorKind::Transient,
            // A uniqueness race surfaces as a conflict the caller can re-read.
            CoreError::Store(StoreError::Conflict(_)) => ErrorKind::Transient,
            CoreError::Store(StoreError::Backend(_))
            | CoreError::CapacityInvariant(_)
            | CoreError::InvalidPolicyWindow(_) => ErrorKind::Fatal,
        }
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ValidationError(_) => "validation_failed",
            CoreError::NotFound { .. } => "not_found",
            CoreError::TicketNotRedeemable { .. } => "ticket_not_redeemable",
            CoreError::SlotFull(_) => "slot_full",
            CoreError::SlotClosed(_) => "slot_closed",
            CoreError::BookingAlreadyTerminal { .. } => "booking_already_terminal",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::CapacityInvariant(_) => "capacity_invariant",
            CoreError::InvalidPolicyWindow(_) => "invalid_policy_window",
            CoreError::ReservationTimedOut(_) => "reservation_timed_out",
            CoreError::Store(StoreError::Transient(_)) | CoreError::Store(StoreError::Conflict(_)) => {
                "store_contention"
            }
            CoreError::Store(StoreError::Backend(_)) => "store_failure",
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_follow_taxonomy() {
        let id = Uuid::new_v4();
        assert_eq!(CoreError::ValidationError("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(CoreError::not_found("Ticket", id).kind(), ErrorKind::Validation);
        assert_eq!(CoreError::SlotFull(id).kind(), ErrorKind::StateConflict);
        assert_eq!(CoreError::not_redeemable(id, "expired").kind(), ErrorKind::StateConflict);
        assert_eq!(
            CoreError::ReservationTimedOut(Duration::from_secs(1)).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            CoreError::Store(StoreError::Transient("40001".into())).kind(),
            ErrorKind::Transient
        );
        assert_eq!(CoreError::InvalidPolicyWindow("0 days".into()).kind(), ErrorKind::Fatal);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::SlotFull(Uuid::nil()).code(), "slot_full");
        assert_eq!(
            CoreError::BookingAlreadyTerminal {
                booking_id: Uuid::nil(),
                status: BookingStatus::Released
            }
            .code(),
            "booking_already_terminal"
        );
    }
}
