use chrono::{NaiveDate, NaiveTime};
use clinic_core::{
    appointment::available_slots, subscription::LimitedResource, Appointment, Doctor, DoctorInput,
    Result,
};
use clinic_store::TransactionOps;

use super::{new_id, ClinicService};

impl ClinicService<'_> {
    pub fn create_doctor(&self, input: DoctorInput) -> Result<Doctor> {
        input.validate()?;
        self.write_tx(|ops| {
            let usage = self.usage(ops)?;
            self.current_plan(ops)?
                .check_limit(LimitedResource::Doctors, usage.doctors)?;

            let doctor = Doctor::new(new_id(), self.tenant_id.to_string(), input, self.now);
            ops.insert(&doctor)?;
            tracing::info!(tenant_id = %self.tenant_id, doctor_id = %doctor.id, "Doctor added");
            Ok(doctor)
        })
    }

    pub fn get_doctor(&self, id: &str) -> Result<Doctor> {
        Ok(self.store.require::<Doctor>(self.tenant_id, id)?)
    }

    pub fn list_doctors(&self) -> Result<Vec<Doctor>> {
        Ok(self.store.list::<Doctor>(self.tenant_id)?)
    }

    pub fn update_doctor(&self, id: &str, input: DoctorInput) -> Result<Doctor> {
        input.validate()?;
        self.write_tx(|ops| {
            let mut doctor = ops.require::<Doctor>(self.tenant_id, id)?;
            doctor.apply(input);
            ops.update(&mut doctor, self.now)?;
            Ok(doctor)
        })
    }

    /// Inactive doctors keep their history but take no new bookings
    pub fn deactivate_doctor(&self, id: &str) -> Result<Doctor> {
        self.write_tx(|ops| {
            let mut doctor = ops.require::<Doctor>(self.tenant_id, id)?;
            if doctor.active {
                doctor.active = false;
                ops.update(&mut doctor, self.now)?;
                tracing::info!(tenant_id = %self.tenant_id, doctor_id = %id, "Doctor deactivated");
            }
            Ok(doctor)
        })
    }

    /// Load a doctor who accepts patients inside a workflow
    pub(crate) fn active_doctor(&self, ops: &TransactionOps<'_>, id: &str) -> Result<Doctor> {
        let doctor = ops.require::<Doctor>(self.tenant_id, id)?;
        doctor.ensure_active()?;
        Ok(doctor)
    }

    pub(crate) fn doctor_day(
        &self,
        ops: &TransactionOps<'_>,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>> {
        let date = date.to_string();
        Ok(ops.list_by::<Appointment>(
            self.tenant_id,
            &[("doctor_id", doctor_id), ("date", &date)],
        )?)
    }

    pub fn doctor_slots(&self, id: &str, date: NaiveDate) -> Result<Vec<NaiveTime>> {
        self.read_tx(|ops| {
            self.active_doctor(ops, id)?;
            let booked = self.doctor_day(ops, id, date)?;
            Ok(available_slots(self.settings, &booked, id, date))
        })
    }
}
