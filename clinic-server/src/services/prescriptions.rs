use clinic_core::{
    Appointment, AppointmentStatus, ClinicError, Doctor, Invoice, InvoiceStatus, InvoiceView,
    Prescription, PrescriptionInput, PrescriptionUpdate, QueueEntry, Result,
};
use clinic_store::TransactionOps;
use serde::Serialize;

use super::{new_id, ClinicService};

/// Result of closing a visit
#[derive(Debug, Clone, Serialize)]
pub struct FinalizedPrescription {
    pub prescription: Prescription,
    pub invoice: InvoiceView,
}

impl ClinicService<'_> {
    pub fn create_prescription(&self, mut input: PrescriptionInput) -> Result<Prescription> {
        self.write_tx(|ops| {
            self.bookable_patient(ops, &input.patient_id)?;
            self.active_doctor(ops, &input.doctor_id)?;

            if let Some(ref appointment_id) = input.appointment_id {
                let appointment = ops.require::<Appointment>(self.tenant_id, appointment_id)?;
                if appointment.patient_id != input.patient_id
                    || appointment.doctor_id != input.doctor_id
                {
                    return Err(ClinicError::invalid_field(
                        "appointment_id",
                        "appointment belongs to a different patient or doctor",
                    ));
                }
                if input.queue_entry_id.is_none() {
                    input.queue_entry_id = appointment.queue_entry_id.clone();
                }
            }
            if let Some(ref entry_id) = input.queue_entry_id {
                let entry = ops.require::<QueueEntry>(self.tenant_id, entry_id)?;
                if entry.patient_id != input.patient_id || entry.doctor_id != input.doctor_id {
                    return Err(ClinicError::invalid_field(
                        "queue_entry_id",
                        "queue entry belongs to a different patient or doctor",
                    ));
                }
            }

            let prescription =
                Prescription::new(new_id(), self.tenant_id.to_string(), input, self.now)?;
            ops.insert(&prescription)?;
            Ok(prescription)
        })
    }

    pub fn get_prescription(&self, id: &str) -> Result<Prescription> {
        Ok(self.store.require::<Prescription>(self.tenant_id, id)?)
    }

    pub fn update_prescription(&self, id: &str, update: PrescriptionUpdate) -> Result<Prescription> {
        self.write_tx(|ops| {
            let mut prescription = ops.require::<Prescription>(self.tenant_id, id)?;
            prescription.update(update)?;
            ops.update(&mut prescription, self.now)?;
            Ok(prescription)
        })
    }

    /// Finalize, close the visit and raise the draft invoice in one transaction
    pub fn finalize_prescription(&self, id: &str) -> Result<FinalizedPrescription> {
        self.write_tx(|ops| {
            let mut prescription = ops.require::<Prescription>(self.tenant_id, id)?;
            prescription.finalize(self.now)?;
            let doctor = ops.require::<Doctor>(self.tenant_id, &prescription.doctor_id)?;

            if let Some(ref entry_id) = prescription.queue_entry_id {
                self.close_queue_entry(ops, entry_id)?;
            }
            if let Some(ref appointment_id) = prescription.appointment_id {
                let appointment = ops.require::<Appointment>(self.tenant_id, appointment_id)?;
                if matches!(
                    appointment.status,
                    AppointmentStatus::CheckedIn | AppointmentStatus::InProgress
                ) {
                    self.finish_appointment(ops, appointment_id)?;
                }
            }

            let number = ops.next_sequence(self.tenant_id, "invoice")?;
            let mut invoice = Invoice::new(
                new_id(),
                self.tenant_id.to_string(),
                format!("INV-{:06}", number),
                prescription.patient_id.clone(),
                self.settings.currency.clone(),
                self.now,
            );
            invoice.prescription_id = Some(prescription.id.clone());
            invoice.set_items(prescription.billable_lines(&doctor, self.settings.default_tax_rate))?;
            ops.insert(&invoice)?;

            prescription.invoice_id = Some(invoice.id.clone());
            ops.update(&mut prescription, self.now)?;

            tracing::info!(
                tenant_id = %self.tenant_id,
                prescription_id = %id,
                invoice = %invoice.invoice_number,
                lines = invoice.items.len(),
                "Prescription finalized"
            );
            Ok(FinalizedPrescription {
                prescription,
                invoice: invoice.view()?,
            })
        })
    }

    /// Complete an open queue entry; closed entries are left alone
    fn close_queue_entry(&self, ops: &TransactionOps<'_>, entry_id: &str) -> Result<()> {
        let entry = ops.require::<QueueEntry>(self.tenant_id, entry_id)?;
        if !entry.status.is_open() {
            return Ok(());
        }
        let mut queue = self.load_queue(ops, &entry.doctor_id, entry.queue_date)?;
        queue.complete(entry_id, self.now)?;
        self.save_queue(ops, &mut queue)
    }

    /// Cancel; a finalized prescription takes its draft invoice with it
    pub fn cancel_prescription(&self, id: &str) -> Result<Prescription> {
        self.write_tx(|ops| {
            let mut prescription = ops.require::<Prescription>(self.tenant_id, id)?;
            let mut invoice = prescription
                .invoice_id
                .as_deref()
                .map(|invoice_id| ops.require::<Invoice>(self.tenant_id, invoice_id))
                .transpose()?;

            prescription.cancel(invoice.as_ref().map(|i| i.status))?;
            if let Some(ref mut invoice) = invoice
                && invoice.status == InvoiceStatus::Draft
            {
                invoice.void()?;
                ops.update(invoice, self.now)?;
            }
            ops.update(&mut prescription, self.now)?;
            tracing::info!(tenant_id = %self.tenant_id, prescription_id = %id, "Prescription cancelled");
            Ok(prescription)
        })
    }
}
