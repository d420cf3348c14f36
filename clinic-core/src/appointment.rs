//! Appointments and the per-doctor slot invariant
//!
//! For one doctor and date the half-open intervals `[start, start + duration)`
//! of live appointments (anything not cancelled or no-show) never overlap.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClinicError, Result};
use crate::impl_record;
use crate::record::RecordMeta;
use crate::tenant::TenantSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Scheduled, CheckedIn)
                | (Scheduled, Cancelled)
                | (Scheduled, NoShow)
                | (CheckedIn, InProgress)
                | (CheckedIn, Cancelled)
                | (InProgress, Completed)
        )
    }

    /// Whether the appointment still occupies its slot
    pub fn is_live(self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentKind {
    #[default]
    Consultation,
    FollowUp,
    Procedure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub patient_id: String,
    pub doctor_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub kind: AppointmentKind,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub tenant_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub kind: AppointmentKind,
    pub reason: Option<String>,
    pub status: AppointmentStatus,
    pub queue_entry_id: Option<String>,
    pub cancel_reason: Option<String>,
    pub meta: RecordMeta,
}

impl_record!(Appointment, "appointments");

fn minute_of_day(t: NaiveTime) -> u32 {
    t.num_seconds_from_midnight() / 60
}

impl Appointment {
    pub fn new(
        id: String,
        tenant_id: String,
        request: AppointmentRequest,
        duration_minutes: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            date: request.date,
            start_time: request.start_time,
            duration_minutes,
            kind: request.kind,
            reason: request.reason,
            status: AppointmentStatus::Scheduled,
            queue_entry_id: None,
            cancel_reason: None,
            meta: RecordMeta::new(now),
        }
    }

    /// Does `[start, start + minutes)` intersect this appointment's slot?
    pub fn overlaps(&self, start: NaiveTime, minutes: u32) -> bool {
        let a_start = minute_of_day(self.start_time);
        let a_end = a_start.saturating_add(self.duration_minutes);
        let b_start = minute_of_day(start);
        let b_end = b_start.saturating_add(minutes);
        a_start < b_end && b_start < a_end
    }

    pub fn transition(&mut self, next: AppointmentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                appointment_id = %self.id,
                from = ?self.status,
                to = ?next,
                "Rejected appointment transition"
            );
            return Err(ClinicError::transition("appointment", self.status, next));
        }
        self.status = next;
        Ok(())
    }
}

/// First live appointment of `doctor_id` on `date` that collides with the slot
pub fn find_conflict<'a>(
    existing: &'a [Appointment],
    doctor_id: &str,
    date: NaiveDate,
    start: NaiveTime,
    minutes: u32,
    exclude_id: Option<&str>,
) -> Option<&'a Appointment> {
    existing.iter().find(|a| {
        a.doctor_id == doctor_id
            && a.date == date
            && a.status.is_live()
            && Some(a.id.as_str()) != exclude_id
            && a.overlaps(start, minutes)
    })
}

/// Free slot start times on the tenant's grid for one doctor and date
pub fn available_slots(
    settings: &TenantSettings,
    existing: &[Appointment],
    doctor_id: &str,
    date: NaiveDate,
) -> Vec<NaiveTime> {
    let step = settings.slot_minutes.max(1);
    let open = minute_of_day(settings.opening_time);
    let close = minute_of_day(settings.closing_time);

    let mut slots = Vec::new();
    let mut minute = open;
    while minute.saturating_add(step) <= close {
        if let Some(start) = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
            && find_conflict(existing, doctor_id, date, start, step, None).is_none()
        {
            slots.push(start);
        }
        minute = minute.saturating_add(step);
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn appt(id: &str, doctor: &str, start: NaiveTime, minutes: u32) -> Appointment {
        Appointment::new(
            id.into(),
            "t".into(),
            AppointmentRequest {
                patient_id: "p".into(),
                doctor_id: doctor.into(),
                date: day(),
                start_time: start,
                duration_minutes: Some(minutes),
                kind: AppointmentKind::Consultation,
                reason: None,
            },
            minutes,
            Utc::now(),
        )
    }

    #[test]
    fn test_overlap_is_half_open() {
        let a = appt("a", "d1", t(10, 0), 30);
        assert!(a.overlaps(t(10, 15), 15));
        assert!(a.overlaps(t(9, 45), 30));
        assert!(!a.overlaps(t(10, 30), 15));
        assert!(!a.overlaps(t(9, 30), 30));
    }

    #[test]
    fn test_overlap_saturates_huge_durations() {
        let a = appt("a", "d1", t(10, 0), 30);
        assert!(a.overlaps(t(9, 0), u32::MAX));
        assert!(!a.overlaps(t(10, 30), u32::MAX));
        let huge = appt("b", "d1", t(9, 0), u32::MAX);
        assert!(huge.overlaps(t(23, 0), 15));
    }

    #[test]
    fn test_find_conflict_ignores_other_doctors_and_dead_slots() {
        let mut cancelled = appt("c", "d1", t(11, 0), 30);
        cancelled.status = AppointmentStatus::Cancelled;
        let existing = vec![appt("a", "d1", t(10, 0), 30), appt("b", "d2", t(11, 0), 30), cancelled];

        assert_eq!(
            find_conflict(&existing, "d1", day(), t(10, 15), 15, None).map(|a| a.id.as_str()),
            Some("a")
        );
        assert!(find_conflict(&existing, "d1", day(), t(11, 0), 30, None).is_none());
        assert!(find_conflict(&existing, "d1", day(), t(10, 0), 30, Some("a")).is_none());
        let other_day = day().succ_opt().unwrap();
        assert!(find_conflict(&existing, "d1", other_day, t(10, 0), 30, None).is_none());
    }

    #[test]
    fn test_status_machine() {
        use AppointmentStatus::*;
        assert!(Scheduled.can_transition_to(CheckedIn));
        assert!(CheckedIn.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Scheduled.can_transition_to(Completed));
        assert!(!NoShow.can_transition_to(CheckedIn));

        let mut a = appt("a", "d1", t(10, 0), 30);
        assert!(a.transition(InProgress).is_err());
        a.transition(CheckedIn).unwrap();
        assert_eq!(a.status, CheckedIn);
    }

    #[test]
    fn test_available_slots() {
        let settings = TenantSettings {
            slot_minutes: 30,
            opening_time: t(9, 0),
            closing_time: t(11, 0),
            ..Default::default()
        };
        let existing = vec![appt("a", "d1", t(9, 30), 45)];
        let slots = available_slots(&settings, &existing, "d1", day());
        assert_eq!(slots, vec![t(9, 0), t(10, 30)]);

        let free = available_slots(&settings, &existing, "d2", day());
        assert_eq!(free, vec![t(9, 0), t(9, 30), t(10, 0), t(10, 30)]);
    }
}
