use chrono::{DateTime, NaiveDate, Utc};
use furikae_shared::{LifecycleEvent, LifecycleEventKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Ticket status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Issued,
    Reserved,
    Used,
    Expired,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Issued => "issued",
            TicketStatus::Reserved => "reserved",
            TicketStatus::Used => "used",
            TicketStatus::Expired => "expired",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    /// The only legal edges of the ticket state machine.
    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Issued, Reserved) | (Reserved, Used) | (Issued, Expired) | (Reserved, Issued) | (Issued, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Used | TicketStatus::Expired | TicketStatus::Cancelled)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issued" => Ok(TicketStatus::Issued),
            "reserved" => Ok(TicketStatus::Reserved),
            "used" => Ok(TicketStatus::Used),
            "expired" => Ok(TicketStatus::Expired),
            "cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(CoreError::ValidationError(format!("unknown ticket status '{}'", other))),
        }
    }
}

/// Everything the issuer has decided about a ticket before it exists.
#[derive(Debug, Clone)]
pub struct TicketDraft {
    pub student_id: String,
    pub contract_id: String,
    pub origin_lesson_id: String,
    pub brand_id: String,
    pub product_scope: Vec<String>,
    pub absence_date: NaiveDate,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A redeemable credit for one makeup seat, created when a lesson is missed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub student_id: String,
    pub contract_id: String,
    pub origin_lesson_id: String,
    pub brand_id: String,
    pub product_scope: Vec<String>,
    pub absence_date: NaiveDate,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TicketStatus,
    pub booking_id: Option<Uuid>,
    pub used_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(draft: TicketDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: draft.student_id,
            contract_id: draft.contract_id,
            origin_lesson_id: draft.origin_lesson_id,
            brand_id: draft.brand_id,
            product_scope: draft.product_scope,
            absence_date: draft.absence_date,
            issued_at: draft.issued_at,
            expires_at: draft.expires_at,
            status: TicketStatus::Issued,
            booking_id: None,
            used_at: None,
            cancelled_at: None,
            cancel_reason: None,
            updated_at: draft.issued_at,
        }
    }

    /// Whether a slot of `brand_id` falls inside this ticket's product scope.
    pub fn covers(&self, brand_id: &str) -> bool {
        self.product_scope.iter().any(|b| b == brand_id)
    }

    /// An `issued` ticket whose deadline has passed and has not been swept yet.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Issued && now >= self.expires_at
    }

    /// Checks the redemption preconditions, returning the reason on failure.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != TicketStatus::Issued {
            return Err(CoreError::not_redeemable(self.id, format!("ticket is {}", self.status)));
        }
        if now >= self.expires_at {
            return Err(CoreError::not_redeemable(
                self.id,
                format!("ticket expired at {}", self.expires_at.to_rfc3339()),
            ));
        }
        Ok(())
    }

    /// Transition: Issued → Reserved
    pub fn reserve(&mut self, booking_id: Uuid, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(TicketStatus::Reserved, now)?;
        self.booking_id = Some(booking_id);
        Ok(())
    }

    /// Transition: Reserved → Issued. The original deadline is kept.
    pub fn release(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(TicketStatus::Issued, now)?;
        self.booking_id = None;
        Ok(())
    }

    /// Transition: Reserved → Used
    pub fn mark_used(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(TicketStatus::Used, now)?;
        self.used_at = Some(now);
        Ok(())
    }

    /// Transition: Issued → Expired
    pub fn expire(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(TicketStatus::Expired, now)
    }

    /// Transition: Issued → Cancelled
    pub fn cancel(&mut self, reason: String, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(TicketStatus::Cancelled, now)?;
        self.cancelled_at = Some(now);
        self.cancel_reason = Some(reason);
        Ok(())
    }

    pub fn lifecycle_event(
        &self,
        kind: LifecycleEventKind,
        slot_id: Option<Uuid>,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> LifecycleEvent {
        LifecycleEvent {
            kind,
            ticket_id: self.id,
            student_id: self.student_id.clone(),
            booking_id: self.booking_id,
            slot_id,
            reason,
            timestamp: at.timestamp(),
        }
    }

    fn transition(&mut self, next: TicketStatus, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ticket(now: DateTime<Utc>) -> Ticket {
        Ticket::new(TicketDraft {
            student_id: "stu-1".to_string(),
            contract_id: "con-1".to_string(),
            origin_lesson_id: "lesson-1".to_string(),
            brand_id: "math".to_string(),
            product_scope: vec!["math".to_string(), "math-online".to_string()],
            absence_date: now.date_naive(),
            issued_at: now,
            expires_at: now + Duration::days(30),
        })
    }

    #[test]
    fn test_ticket_lifecycle() {
        let now = Utc::now();
        let mut t = ticket(now);
        let booking_id = Uuid::new_v4();

        // Issued → Reserved
        t.reserve(booking_id, now).unwrap();
        assert_eq!(t.status, TicketStatus::Reserved);
        assert_eq!(t.booking_id, Some(booking_id));

        // Reserved → Issued keeps the deadline
        let deadline = t.expires_at;
        t.release(now).unwrap();
        assert_eq!(t.status, TicketStatus::Issued);
        assert_eq!(t.booking_id, None);
        assert_eq!(t.expires_at, deadline);

        // Issued → Reserved → Used
        t.reserve(booking_id, now).unwrap();
        t.mark_used(now).unwrap();
        assert_eq!(t.status, TicketStatus::Used);
        assert_eq!(t.used_at, Some(now));
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        let now = Utc::now();

        let mut used = ticket(now);
        used.reserve(Uuid::new_v4(), now).unwrap();
        used.mark_used(now).unwrap();
        assert!(used.release(now).is_err());
        assert!(used.expire(now).is_err());
        assert!(used.cancel("late".into(), now).is_err());

        let mut expired = ticket(now);
        expired.expire(now).unwrap();
        assert!(expired.release(now).is_err());
        assert!(expired.reserve(Uuid::new_v4(), now).is_err());
    }

    #[test]
    fn test_transition_table() {
        use TicketStatus::*;
        let all = [Issued, Reserved, Used, Expired, Cancelled];
        let legal = [
            (Issued, Reserved),
            (Reserved, Used),
            (Issued, Expired),
            (Reserved, Issued),
            (Issued, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(from.can_transition_to(to), legal.contains(&(from, to)), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_redeemable_checks_status_and_deadline() {
        let now = Utc::now();
        let t = ticket(now);
        assert!(t.check_redeemable(now).is_ok());
        assert!(matches!(
            t.check_redeemable(t.expires_at),
            Err(CoreError::TicketNotRedeemable { .. })
        ));
        assert!(t.is_due(t.expires_at));
        assert!(t.covers("math-online"));
        assert!(!t.covers("english"));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for s in ["issued", "reserved", "used", "expired", "cancelled"] {
            assert_eq!(s.parse::<TicketStatus>().unwrap().as_str(), s);
        }
        assert!("archived".parse::<TicketStatus>().is_err());
    }
}
