use chrono::NaiveDate;
use clinic_core::{
    ClinicError, Doctor, DoctorQueue, NewQueueEntry, QueueEntry, QueuePriority, QueueSnapshot,
    Result,
};
use clinic_store::TransactionOps;
use serde::{Deserialize, Serialize};

use super::{new_id, ClinicService};

/// A queue entry with its expected wait
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntryView {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub estimated_wait_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WalkInRequest {
    pub patient_id: String,
    pub doctor_id: String,
    #[serde(default)]
    pub priority: QueuePriority,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub position: u32,
}

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub priority: QueuePriority,
}

impl ClinicService<'_> {
    pub(crate) fn load_queue(
        &self,
        ops: &TransactionOps<'_>,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<DoctorQueue> {
        let date_str = date.to_string();
        let entries = ops.list_by::<QueueEntry>(
            self.tenant_id,
            &[("doctor_id", doctor_id), ("queue_date", &date_str)],
        )?;
        Ok(DoctorQueue::new(doctor_id, date, entries))
    }

    /// Persist every entry touched since load
    pub(crate) fn save_queue(&self, ops: &TransactionOps<'_>, queue: &mut DoctorQueue) -> Result<()> {
        for entry in queue.dirty_entries_mut() {
            if ops.get::<QueueEntry>(self.tenant_id, &entry.id)?.is_some() {
                ops.update(entry, self.now)?;
            } else {
                ops.insert(&*entry)?;
            }
        }
        Ok(())
    }

    pub(crate) fn entry_view(
        &self,
        queue: &DoctorQueue,
        id: &str,
        doctor: &Doctor,
    ) -> Result<QueueEntryView> {
        let entry = queue
            .get(id)
            .cloned()
            .ok_or_else(|| ClinicError::not_found("queue_entries", id))?;
        Ok(QueueEntryView {
            estimated_wait_minutes: queue.estimated_wait(
                id,
                doctor.avg_consultation_minutes,
                self.now,
            ),
            entry,
        })
    }

    /// Load the entry's queue, apply `f`, save, and return the entry's view
    fn mutate_entry<F>(&self, id: &str, f: F) -> Result<QueueEntryView>
    where
        F: FnOnce(&mut DoctorQueue, &QueueEntry, &TransactionOps<'_>) -> Result<()>,
    {
        self.write_tx(|ops| {
            let entry = ops.require::<QueueEntry>(self.tenant_id, id)?;
            let doctor = ops.require::<Doctor>(self.tenant_id, &entry.doctor_id)?;
            let mut queue = self.load_queue(ops, &entry.doctor_id, entry.queue_date)?;
            f(&mut queue, &entry, ops)?;
            self.save_queue(ops, &mut queue)?;
            self.entry_view(&queue, id, &doctor)
        })
    }

    /// Add a patient without appointment to today's queue
    pub fn walk_in(&self, request: WalkInRequest) -> Result<QueueEntryView> {
        self.write_tx(|ops| {
            self.bookable_patient(ops, &request.patient_id)?;
            let doctor = self.active_doctor(ops, &request.doctor_id)?;
            let today = self.today();

            let mut queue = self.load_queue(ops, &doctor.id, today)?;
            let id = new_id();
            let position = queue.enqueue(
                NewQueueEntry {
                    id: id.clone(),
                    tenant_id: self.tenant_id.to_string(),
                    doctor_id: doctor.id.clone(),
                    patient_id: request.patient_id,
                    appointment_id: None,
                    queue_date: today,
                    priority: request.priority,
                },
                self.now,
            )?;
            self.save_queue(ops, &mut queue)?;
            tracing::info!(
                tenant_id = %self.tenant_id,
                queue_entry_id = %id,
                doctor_id = %doctor.id,
                position = position,
                "Walk-in queued"
            );
            self.entry_view(&queue, &id, &doctor)
        })
    }

    pub fn get_queue_entry(&self, id: &str) -> Result<QueueEntryView> {
        self.read_tx(|ops| {
            let entry = ops.require::<QueueEntry>(self.tenant_id, id)?;
            let doctor = ops.require::<Doctor>(self.tenant_id, &entry.doctor_id)?;
            let queue = self.load_queue(ops, &entry.doctor_id, entry.queue_date)?;
            self.entry_view(&queue, id, &doctor)
        })
    }

    /// Call the head of today's line into consultation
    pub fn call_next(&self, doctor_id: &str) -> Result<QueueEntryView> {
        self.write_tx(|ops| {
            let doctor = ops.require::<Doctor>(self.tenant_id, doctor_id)?;
            let mut queue = self.load_queue(ops, doctor_id, self.today())?;
            let called = queue.call_next(self.now)?.clone();
            self.save_queue(ops, &mut queue)?;
            if let Some(ref appointment_id) = called.appointment_id {
                self.start_appointment(ops, appointment_id)?;
            }
            tracing::info!(
                tenant_id = %self.tenant_id,
                doctor_id = %doctor_id,
                token = called.token_number,
                "Patient called"
            );
            self.entry_view(&queue, &called.id, &doctor)
        })
    }

    pub fn complete_entry(&self, id: &str) -> Result<QueueEntryView> {
        self.mutate_entry(id, |queue, entry, ops| {
            queue.complete(id, self.now)?;
            if let Some(ref appointment_id) = entry.appointment_id {
                self.finish_appointment(ops, appointment_id)?;
            }
            Ok(())
        })
    }

    pub fn skip_entry(&self, id: &str) -> Result<QueueEntryView> {
        self.mutate_entry(id, |queue, _, _| queue.skip(id))
    }

    pub fn requeue_entry(&self, id: &str) -> Result<QueueEntryView> {
        self.mutate_entry(id, |queue, _, _| queue.requeue(id).map(|_| ()))
    }

    pub fn cancel_entry(&self, id: &str) -> Result<QueueEntryView> {
        self.mutate_entry(id, |queue, entry, ops| {
            queue.cancel(id)?;
            if let Some(ref appointment_id) = entry.appointment_id {
                self.release_appointment(ops, appointment_id, "queue entry cancelled")?;
            }
            Ok(())
        })
    }

    pub fn move_entry(&self, id: &str, request: MoveRequest) -> Result<QueueEntryView> {
        self.mutate_entry(id, |queue, _, _| queue.move_to(id, request.position).map(|_| ()))
    }

    pub fn change_entry_priority(&self, id: &str, request: PriorityRequest) -> Result<QueueEntryView> {
        self.mutate_entry(id, |queue, _, _| {
            queue.change_priority(id, request.priority).map(|_| ())
        })
    }

    /// Waiting line, current consultation and day statistics
    pub fn queue_snapshot(&self, doctor_id: &str, date: Option<NaiveDate>) -> Result<QueueSnapshot> {
        self.read_tx(|ops| {
            let doctor = ops.require::<Doctor>(self.tenant_id, doctor_id)?;
            let queue = self.load_queue(ops, doctor_id, date.unwrap_or_else(|| self.today()))?;
            Ok(queue.snapshot(doctor.avg_consultation_minutes, self.now))
        })
    }
}
