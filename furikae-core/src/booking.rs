use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Active,
    Released,
    Confirmed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Active => "active",
            BookingStatus::Released => "released",
            BookingStatus::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(BookingStatus::Active),
            "released" => Ok(BookingStatus::Released),
            "confirmed" => Ok(BookingStatus::Confirmed),
            other => Err(CoreError::ValidationError(format!("unknown booking status '{}'", other))),
        }
    }
}

/// Link between a redeemed ticket and the slot it holds a seat in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub slot_id: Uuid,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<String>,
}

impl Booking {
    pub fn new(ticket_id: Uuid, slot_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            slot_id,
            status: BookingStatus::Active,
            created_at: now,
            confirmed_at: None,
            released_at: None,
            release_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }

    /// Transition: Active → Released
    pub fn release(&mut self, reason: String, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_active()?;
        self.status = BookingStatus::Released;
        self.released_at = Some(now);
        self.release_reason = Some(reason);
        Ok(())
    }

    /// Transition: Active → Confirmed
    pub fn confirm(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_active()?;
        self.status = BookingStatus::Confirmed;
        self.confirmed_at = Some(now);
        Ok(())
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if self.status != BookingStatus::Active {
            return Err(CoreError::BookingAlreadyTerminal {
                booking_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_is_terminal() {
        let now = Utc::now();
        let mut booking = Booking::new(Uuid::new_v4(), Uuid::new_v4(), now);
        booking.release("schedule clash".into(), now).unwrap();
        assert_eq!(booking.status, BookingStatus::Released);
        assert_eq!(booking.release_reason.as_deref(), Some("schedule clash"));

        let err = booking.confirm(now).unwrap_err();
        assert!(matches!(
            err,
            CoreError::BookingAlreadyTerminal { status: BookingStatus::Released, .. }
        ));
        assert!(booking.release("again".into(), now).is_err());
    }

    #[test]
    fn confirm_is_terminal() {
        let now = Utc::now();
        let mut booking = Booking::new(Uuid::new_v4(), Uuid::new_v4(), now);
        booking.confirm(now).unwrap();
        assert!(!booking.is_active());
        assert!(booking.release("too late".into(), now).is_err());
    }
}
