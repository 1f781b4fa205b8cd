use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// A bookable (school, brand, date, time range) unit with fixed seat capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub id: Uuid,
    pub school_id: String,
    pub brand_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
    pub booked_count: i32,
}

impl TimeSlot {
    pub fn remaining(&self) -> i32 {
        self.capacity - self.booked_count
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// Slot times are stored as naive UTC wall-clock values.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at() <= now.naive_utc()
    }

    /// Take one seat. Fails with `SlotFull` when nothing remains.
    pub fn take_seat(&mut self) -> CoreResult<()> {
        if self.remaining() <= 0 {
            return Err(CoreError::SlotFull(self.id));
        }
        self.booked_count += 1;
        Ok(())
    }

    /// Give one seat back.
    pub fn return_seat(&mut self) -> CoreResult<()> {
        if self.booked_count <= 0 {
            return Err(CoreError::CapacityInvariant(format!(
                "slot {} has no booked seats to return",
                self.id
            )));
        }
        self.booked_count -= 1;
        Ok(())
    }
}

/// Slot as shown to someone browsing transfer options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlot {
    #[serde(flatten)]
    pub slot: TimeSlot,
    pub remaining: i32,
}

impl From<TimeSlot> for AvailableSlot {
    fn from(slot: TimeSlot) -> Self {
        let remaining = slot.remaining();
        Self { slot, remaining }
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate, max_days: i64) -> CoreResult<Self> {
        if from > to {
            return Err(CoreError::ValidationError(format!(
                "dateFrom {} is after dateTo {}",
                from, to
            )));
        }
        let span = (to - from).num_days();
        if span > max_days {
            return Err(CoreError::ValidationError(format!(
                "date range spans {} days, at most {} allowed",
                span, max_days
            )));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// Availability filter handed to the store.
#[derive(Debug, Clone)]
pub struct SlotQuery {
    pub brands: Vec<String>,
    pub range: DateRange,
    pub school_id: Option<String>,
    pub starts_after: NaiveDateTime,
}

impl SlotQuery {
    pub fn matches(&self, slot: &TimeSlot) -> bool {
        self.brands.iter().any(|b| *b == slot.brand_id)
            && self.range.contains(slot.date)
            && self.school_id.as_ref().map_or(true, |s| *s == slot.school_id)
            && slot.starts_at() > self.starts_after
            && slot.remaining() > 0
    }
}

/// Slot as published by the timetable side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDefinition {
    pub id: Uuid,
    pub school_id: String,
    pub brand_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
}

impl SlotDefinition {
    pub fn into_slot(self) -> CoreResult<TimeSlot> {
        if self.school_id.trim().is_empty() || self.brand_id.trim().is_empty() {
            return Err(CoreError::ValidationError("schoolId and brandId are required".into()));
        }
        if self.capacity < 1 {
            return Err(CoreError::ValidationError(format!(
                "capacity must be at least 1, got {}",
                self.capacity
            )));
        }
        if self.start_time >= self.end_time {
            return Err(CoreError::ValidationError(format!(
                "startTime {} must be before endTime {}",
                self.start_time, self.end_time
            )));
        }

        Ok(TimeSlot {
            id: self.id,
            school_id: self.school_id,
            brand_id: self.brand_id,
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
            capacity: self.capacity,
            booked_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(capacity: i32) -> TimeSlot {
        SlotDefinition {
            id: Uuid::new_v4(),
            school_id: "school-a".into(),
            brand_id: "math".into(),
            date: NaiveDate::from_ymd_opt(2026, 11, 3).unwrap(),
            start_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            capacity,
        }
        .into_slot()
        .unwrap()
    }

    #[test]
    fn test_seat_accounting() {
        let mut s = slot(2);
        s.take_seat().unwrap();
        s.take_seat().unwrap();
        assert_eq!(s.remaining(), 0);
        assert!(matches!(s.take_seat(), Err(CoreError::SlotFull(_))));
        assert_eq!(s.booked_count, 2);

        s.return_seat().unwrap();
        s.return_seat().unwrap();
        assert!(s.return_seat().is_err());
        assert_eq!(s.booked_count, 0);
    }

    #[test]
    fn test_definition_validation() {
        let mut def = SlotDefinition {
            id: Uuid::new_v4(),
            school_id: "school-a".into(),
            brand_id: "math".into(),
            date: NaiveDate::from_ymd_opt(2026, 11, 3).unwrap(),
            start_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            capacity: 4,
        };
        assert!(def.clone().into_slot().is_err());

        def.end_time = NaiveTime::from_hms_opt(19, 0, 0).unwrap();
        def.capacity = 0;
        assert!(def.clone().into_slot().is_err());

        def.capacity = 4;
        assert_eq!(def.into_slot().unwrap().remaining(), 4);
    }

    #[test]
    fn test_query_matching() {
        let s = slot(1);
        let day = s.date;
        let query = SlotQuery {
            brands: vec!["math".into()],
            range: DateRange::new(day, day, 31).unwrap(),
            school_id: None,
            starts_after: day.and_hms_opt(9, 0, 0).unwrap(),
        };
        assert!(query.matches(&s));

        let late = SlotQuery { starts_after: s.starts_at(), ..query.clone() };
        assert!(!late.matches(&s));

        let other_school = SlotQuery { school_id: Some("school-b".into()), ..query.clone() };
        assert!(!other_school.matches(&s));

        let mut full = s.clone();
        full.take_seat().unwrap();
        assert!(!query.matches(&full));
    }

    #[test]
    fn test_date_range_bounds() {
        let d = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        assert!(DateRange::new(d, d.pred_opt().unwrap(), 31).is_err());
        assert!(DateRange::new(d, d + chrono::Duration::days(40), 31).is_err());
        assert!(DateRange::new(d, d + chrono::Duration::days(31), 31).is_ok());
    }

    #[test]
    fn test_available_slot_flattens() {
        let json = serde_json::to_value(AvailableSlot::from(slot(3))).unwrap();
        assert_eq!(json["remaining"], 3);
        assert_eq!(json["brandId"], "math");
    }
}
