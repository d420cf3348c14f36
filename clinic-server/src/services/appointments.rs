use chrono::{NaiveDate, NaiveTime};
use clinic_core::{
    appointment::find_conflict, Appointment, AppointmentRequest, AppointmentStatus, ClinicError,
    NewQueueEntry, QueueEntry, QueuePriority, QueueStatus, Result,
};
use clinic_store::TransactionOps;
use serde::Deserialize;

use super::queue::QueueEntryView;
use super::{filter_value, new_id, ClinicService};

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckInRequest {
    #[serde(default)]
    pub priority: QueuePriority,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentQuery {
    pub date: Option<NaiveDate>,
    pub doctor_id: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl ClinicService<'_> {
    fn check_slot(&self, start: NaiveTime, minutes: u32) -> Result<()> {
        if minutes == 0 {
            return Err(ClinicError::invalid_field(
                "duration_minutes",
                "duration must be positive",
            ));
        }
        if minutes > self.settings.open_minutes() {
            return Err(ClinicError::invalid_field(
                "duration_minutes",
                format!(
                    "duration of {} min exceeds the {} min opening window",
                    minutes,
                    self.settings.open_minutes()
                ),
            ));
        }
        if !self.settings.within_hours(start, minutes) {
            return Err(ClinicError::invalid_field(
                "start_time",
                format!(
                    "slot {} (+{} min) is outside opening hours {}-{}",
                    start, minutes, self.settings.opening_time, self.settings.closing_time
                ),
            ));
        }
        Ok(())
    }

    /// Overlap check against the doctor's live appointments, run inside the write
    fn ensure_free(
        &self,
        ops: &TransactionOps<'_>,
        doctor_id: &str,
        date: NaiveDate,
        start: NaiveTime,
        minutes: u32,
        exclude_id: Option<&str>,
    ) -> Result<()> {
        let booked = self.doctor_day(ops, doctor_id, date)?;
        if let Some(clash) = find_conflict(&booked, doctor_id, date, start, minutes, exclude_id) {
            tracing::warn!(
                tenant_id = %self.tenant_id,
                doctor_id = %doctor_id,
                clashing_id = %clash.id,
                "Slot already taken"
            );
            return Err(ClinicError::Conflict(format!(
                "slot overlaps appointment {} at {} ({} min)",
                clash.id, clash.start_time, clash.duration_minutes
            )));
        }
        Ok(())
    }

    pub fn book_appointment(&self, request: AppointmentRequest) -> Result<Appointment> {
        let minutes = request
            .duration_minutes
            .unwrap_or(self.settings.slot_minutes);
        self.check_slot(request.start_time, minutes)?;

        self.write_tx(|ops| {
            self.bookable_patient(ops, &request.patient_id)?;
            self.active_doctor(ops, &request.doctor_id)?;
            self.ensure_free(
                ops,
                &request.doctor_id,
                request.date,
                request.start_time,
                minutes,
                None,
            )?;

            let appointment =
                Appointment::new(new_id(), self.tenant_id.to_string(), request, minutes, self.now);
            ops.insert(&appointment)?;
            tracing::info!(
                tenant_id = %self.tenant_id,
                appointment_id = %appointment.id,
                doctor_id = %appointment.doctor_id,
                date = %appointment.date,
                start = %appointment.start_time,
                "Appointment booked"
            );
            Ok(appointment)
        })
    }

    pub fn get_appointment(&self, id: &str) -> Result<Appointment> {
        Ok(self.store.require::<Appointment>(self.tenant_id, id)?)
    }

    pub fn list_appointments(&self, query: &AppointmentQuery) -> Result<Vec<Appointment>> {
        let date = query.date.map(|d| d.to_string());
        let status = query.status.as_ref().map(filter_value).transpose()?;

        let mut filters: Vec<(&str, &str)> = Vec::new();
        if let Some(ref date) = date {
            filters.push(("date", date));
        }
        if let Some(ref doctor_id) = query.doctor_id {
            filters.push(("doctor_id", doctor_id));
        }
        if let Some(ref status) = status {
            filters.push(("status", status));
        }

        let mut appointments = self
            .store
            .list_by::<Appointment>(self.tenant_id, &filters)?;
        appointments.sort_by_key(|a| (a.date, a.start_time));
        Ok(appointments)
    }

    /// Move a scheduled appointment to another slot
    pub fn reschedule_appointment(&self, id: &str, request: RescheduleRequest) -> Result<Appointment> {
        self.write_tx(|ops| {
            let mut appointment = ops.require::<Appointment>(self.tenant_id, id)?;
            if appointment.status != AppointmentStatus::Scheduled {
                return Err(ClinicError::Conflict(format!(
                    "only scheduled appointments can be rescheduled; this one is {:?}",
                    appointment.status
                )));
            }
            let minutes = request
                .duration_minutes
                .unwrap_or(appointment.duration_minutes);
            self.check_slot(request.start_time, minutes)?;
            self.active_doctor(ops, &appointment.doctor_id)?;
            self.ensure_free(
                ops,
                &appointment.doctor_id,
                request.date,
                request.start_time,
                minutes,
                Some(id),
            )?;

            appointment.date = request.date;
            appointment.start_time = request.start_time;
            appointment.duration_minutes = minutes;
            ops.update(&mut appointment, self.now)?;
            Ok(appointment)
        })
    }

    /// Cancel; a checked-in patient also leaves the queue
    pub fn cancel_appointment(&self, id: &str, request: CancelRequest) -> Result<Appointment> {
        self.write_tx(|ops| {
            let mut appointment = ops.require::<Appointment>(self.tenant_id, id)?;
            appointment.transition(AppointmentStatus::Cancelled)?;
            appointment.cancel_reason = request.reason;

            if let Some(ref entry_id) = appointment.queue_entry_id {
                let entry = ops.require::<QueueEntry>(self.tenant_id, entry_id)?;
                if matches!(entry.status, QueueStatus::Waiting | QueueStatus::Skipped) {
                    let mut queue = self.load_queue(ops, &entry.doctor_id, entry.queue_date)?;
                    queue.cancel(entry_id)?;
                    self.save_queue(ops, &mut queue)?;
                }
            }

            ops.update(&mut appointment, self.now)?;
            tracing::info!(tenant_id = %self.tenant_id, appointment_id = %id, "Appointment cancelled");
            Ok(appointment)
        })
    }

    pub fn mark_no_show(&self, id: &str) -> Result<Appointment> {
        self.write_tx(|ops| {
            let mut appointment = ops.require::<Appointment>(self.tenant_id, id)?;
            appointment.transition(AppointmentStatus::NoShow)?;
            ops.update(&mut appointment, self.now)?;
            Ok(appointment)
        })
    }

    /// Check a patient in for today's appointment and place them in the queue
    pub fn check_in(&self, id: &str, request: CheckInRequest) -> Result<QueueEntryView> {
        self.write_tx(|ops| {
            let mut appointment = ops.require::<Appointment>(self.tenant_id, id)?;
            if appointment.date != self.today() {
                return Err(ClinicError::validation(format!(
                    "appointment is on {}, check-in is only possible on the day",
                    appointment.date
                )));
            }
            appointment.transition(AppointmentStatus::CheckedIn)?;
            let doctor = self.active_doctor(ops, &appointment.doctor_id)?;

            let mut queue = self.load_queue(ops, &doctor.id, appointment.date)?;
            let entry_id = new_id();
            let position = queue.enqueue(
                NewQueueEntry {
                    id: entry_id.clone(),
                    tenant_id: self.tenant_id.to_string(),
                    doctor_id: doctor.id.clone(),
                    patient_id: appointment.patient_id.clone(),
                    appointment_id: Some(appointment.id.clone()),
                    queue_date: appointment.date,
                    priority: request.priority,
                },
                self.now,
            )?;
            self.save_queue(ops, &mut queue)?;

            appointment.queue_entry_id = Some(entry_id.clone());
            ops.update(&mut appointment, self.now)?;

            tracing::info!(
                tenant_id = %self.tenant_id,
                appointment_id = %id,
                queue_entry_id = %entry_id,
                position = position,
                "Patient checked in"
            );
            self.entry_view(&queue, &entry_id, &doctor)
        })
    }

    /// Linked appointment follows its queue entry into consultation
    pub(crate) fn start_appointment(&self, ops: &TransactionOps<'_>, id: &str) -> Result<()> {
        let mut appointment = ops.require::<Appointment>(self.tenant_id, id)?;
        if appointment.status == AppointmentStatus::CheckedIn {
            appointment.transition(AppointmentStatus::InProgress)?;
            ops.update(&mut appointment, self.now)?;
        }
        Ok(())
    }

    /// Close a visit; a checked-in appointment passes through in-progress
    pub(crate) fn finish_appointment(&self, ops: &TransactionOps<'_>, id: &str) -> Result<()> {
        let mut appointment = ops.require::<Appointment>(self.tenant_id, id)?;
        match appointment.status {
            AppointmentStatus::Completed => return Ok(()),
            AppointmentStatus::CheckedIn => {
                appointment.transition(AppointmentStatus::InProgress)?;
            }
            _ => {}
        }
        appointment.transition(AppointmentStatus::Completed)?;
        ops.update(&mut appointment, self.now)?;
        Ok(())
    }

    /// Drop a checked-in appointment whose queue entry went away
    pub(crate) fn release_appointment(
        &self,
        ops: &TransactionOps<'_>,
        id: &str,
        reason: &str,
    ) -> Result<()> {
        let mut appointment = ops.require::<Appointment>(self.tenant_id, id)?;
        if appointment.status == AppointmentStatus::CheckedIn {
            appointment.transition(AppointmentStatus::Cancelled)?;
            appointment.cancel_reason = Some(reason.to_string());
            ops.update(&mut appointment, self.now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;

    #[test]
    fn test_overlapping_booking_conflicts() {
        let state = state();
        let svc = service(&state, monday_morning());
        let d = svc.create_doctor(doctor_input("Dr. A", 0)).unwrap();
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();
        let q = svc.create_patient(patient_input("Ben", "Ode", None)).unwrap();

        let mut long = booking(&p.id, &d.id, 9, 0);
        long.duration_minutes = Some(30);
        svc.book_appointment(long).unwrap();

        let err = svc.book_appointment(booking(&q.id, &d.id, 9, 15)).unwrap_err();
        assert!(matches!(err, ClinicError::Conflict(_)));
        // Half-open interval: 9:30 is free
        assert!(svc.book_appointment(booking(&q.id, &d.id, 9, 30)).is_ok());
    }

    #[test]
    fn test_cancelled_slot_can_be_rebooked() {
        let state = state();
        let svc = service(&state, monday_morning());
        let d = svc.create_doctor(doctor_input("Dr. A", 0)).unwrap();
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();

        let a = svc.book_appointment(booking(&p.id, &d.id, 10, 0)).unwrap();
        let cancelled = svc
            .cancel_appointment(&a.id, CancelRequest { reason: Some("sick".into()) })
            .unwrap();
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("sick"));
        assert!(svc.book_appointment(booking(&p.id, &d.id, 10, 0)).is_ok());
    }

    #[test]
    fn test_booking_rules() {
        let state = state();
        let svc = service(&state, monday_morning());
        let d = svc.create_doctor(doctor_input("Dr. A", 0)).unwrap();
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();

        // Outside opening hours
        assert!(svc.book_appointment(booking(&p.id, &d.id, 8, 0)).is_err());
        let mut zero = booking(&p.id, &d.id, 9, 0);
        zero.duration_minutes = Some(0);
        assert!(svc.book_appointment(zero).is_err());

        // Archived patient
        svc.archive_patient(&p.id).unwrap();
        assert!(svc.book_appointment(booking(&p.id, &d.id, 9, 0)).is_err());

        // Inactive doctor
        let p2 = svc.create_patient(patient_input("Ben", "Ode", None)).unwrap();
        svc.deactivate_doctor(&d.id).unwrap();
        assert!(svc.book_appointment(booking(&p2.id, &d.id, 9, 0)).is_err());
    }

    #[test]
    fn test_slot_duration_cannot_run_past_closing() {
        let state = state();
        let svc = service(&state, monday_morning());
        let d = svc.create_doctor(doctor_input("Dr. A", 0)).unwrap();
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();
        let existing = svc.book_appointment(booking(&p.id, &d.id, 9, 0)).unwrap();

        // 16:00 plus a day and a half hour would wrap to 16:30
        let mut wrapping = booking(&p.id, &d.id, 16, 0);
        wrapping.duration_minutes = Some(1470);
        let err = svc.book_appointment(wrapping).unwrap_err();
        assert!(matches!(err, ClinicError::Validation { .. }));

        let mut huge = booking(&p.id, &d.id, 10, 0);
        huge.duration_minutes = Some(u32::MAX);
        assert!(matches!(
            svc.book_appointment(huge),
            Err(ClinicError::Validation { .. })
        ));

        let err = svc
            .reschedule_appointment(
                &existing.id,
                RescheduleRequest {
                    date: existing.date,
                    start_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                    duration_minutes: Some(1470),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ClinicError::Validation { .. }));

        // The whole opening window is still a valid slot
        let mut all_day = booking(&p.id, &d.id, 9, 0);
        all_day.date = existing.date.succ_opt().unwrap();
        all_day.duration_minutes = Some(480);
        assert!(svc.book_appointment(all_day).is_ok());
    }

    #[test]
    fn test_reschedule_excludes_itself() {
        let state = state();
        let svc = service(&state, monday_morning());
        let d = svc.create_doctor(doctor_input("Dr. A", 0)).unwrap();
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();
        let a = svc.book_appointment(booking(&p.id, &d.id, 9, 0)).unwrap();

        // Shifting by 5 minutes overlaps only with itself
        let moved = svc
            .reschedule_appointment(
                &a.id,
                RescheduleRequest {
                    date: a.date,
                    start_time: NaiveTime::from_hms_opt(9, 5, 0).unwrap(),
                    duration_minutes: None,
                },
            )
            .unwrap();
        assert_eq!(moved.start_time, NaiveTime::from_hms_opt(9, 5, 0).unwrap());
        assert_eq!(moved.duration_minutes, 15);

        svc.mark_no_show(&a.id).unwrap();
        assert!(svc
            .reschedule_appointment(
                &a.id,
                RescheduleRequest {
                    date: a.date,
                    start_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                    duration_minutes: None,
                },
            )
            .is_err());
    }

    #[test]
    fn test_check_in_enqueues_and_cancel_leaves_queue() {
        let state = state();
        let svc = service(&state, monday_morning());
        let d = svc.create_doctor(doctor_input("Dr. A", 0)).unwrap();
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();
        let a = svc.book_appointment(booking(&p.id, &d.id, 9, 0)).unwrap();

        let view = svc.check_in(&a.id, CheckInRequest::default()).unwrap();
        assert_eq!(view.entry.position, Some(1));
        assert_eq!(view.entry.token_number, 1);
        assert_eq!(view.estimated_wait_minutes, Some(0));

        let a = svc.get_appointment(&a.id).unwrap();
        assert_eq!(a.status, AppointmentStatus::CheckedIn);
        assert_eq!(a.queue_entry_id.as_deref(), Some(view.entry.id.as_str()));

        // Checking in twice is rejected by the appointment state machine
        assert!(matches!(
            svc.check_in(&a.id, CheckInRequest::default()),
            Err(ClinicError::InvalidTransition { .. })
        ));

        svc.cancel_appointment(&a.id, CancelRequest::default()).unwrap();
        let entry = svc.get_queue_entry(&view.entry.id).unwrap();
        assert_eq!(entry.entry.status, QueueStatus::Cancelled);
        assert_eq!(entry.entry.position, None);
    }

    #[test]
    fn test_check_in_only_on_the_day() {
        let state = state();
        let svc = service(&state, at("2024-06-02T10:00:00Z"));
        let d = svc.create_doctor(doctor_input("Dr. A", 0)).unwrap();
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();
        let a = svc.book_appointment(booking(&p.id, &d.id, 9, 0)).unwrap();

        assert!(matches!(
            svc.check_in(&a.id, CheckInRequest::default()),
            Err(ClinicError::Validation { .. })
        ));
        // Nothing changed
        assert_eq!(
            svc.get_appointment(&a.id).unwrap().status,
            AppointmentStatus::Scheduled
        );
    }

    #[test]
    fn test_list_filters() {
        let state = state();
        let svc = service(&state, monday_morning());
        let d = svc.create_doctor(doctor_input("Dr. A", 0)).unwrap();
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();
        svc.book_appointment(booking(&p.id, &d.id, 11, 0)).unwrap();
        let early = svc.book_appointment(booking(&p.id, &d.id, 9, 0)).unwrap();
        svc.mark_no_show(&early.id).unwrap();

        let all = svc.list_appointments(&AppointmentQuery::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, early.id);

        let scheduled = svc
            .list_appointments(&AppointmentQuery {
                status: Some(AppointmentStatus::Scheduled),
                doctor_id: Some(d.id.clone()),
                date: Some(early.date),
            })
            .unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].start_time, NaiveTime::from_hms_opt(11, 0, 0).unwrap());
    }
}
