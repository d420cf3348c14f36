use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::doctor::Doctor;
use crate::error::{ClinicError, Result};
use crate::impl_record;
use crate::invoice::{InvoiceItem, InvoiceStatus, LineKind};
use crate::money::Rate;
use crate::record::RecordMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Drug,
    Lab,
    Procedure,
    Other,
}

impl From<ItemKind> for LineKind {
    fn from(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Drug => LineKind::Drug,
            ItemKind::Lab => LineKind::Lab,
            ItemKind::Procedure => LineKind::Procedure,
            ItemKind::Other => LineKind::Other,
        }
    }
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionItem {
    pub kind: ItemKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<u32>,
    #[serde(default = "one")]
    pub quantity: u32,
    /// Minor units; zero means not billed
    #[serde(default)]
    pub unit_price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl PrescriptionItem {
    pub fn validate(&self, index: usize) -> Result<()> {
        let field = |name: &str| format!("items[{}].{}", index, name);
        if self.name.trim().is_empty() {
            return Err(ClinicError::invalid_field(field("name"), "item name is required"));
        }
        if self.quantity == 0 {
            return Err(ClinicError::invalid_field(
                field("quantity"),
                "quantity must be at least 1",
            ));
        }
        if self.unit_price < 0 {
            return Err(ClinicError::invalid_field(
                field("unit_price"),
                "unit price cannot be negative",
            ));
        }
        if self.kind == ItemKind::Drug
            && self.dosage.as_deref().is_none_or(|d| d.trim().is_empty())
        {
            return Err(ClinicError::invalid_field(
                field("dosage"),
                "drug items need a dosage",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionInput {
    pub patient_id: String,
    pub doctor_id: String,
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub queue_entry_id: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<PrescriptionItem>,
}

/// Editable parts of a draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionUpdate {
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<PrescriptionItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Draft,
    Finalized,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: String,
    pub tenant_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub appointment_id: Option<String>,
    pub queue_entry_id: Option<String>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<PrescriptionItem>,
    pub status: PrescriptionStatus,
    pub invoice_id: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub meta: RecordMeta,
}

impl_record!(Prescription, "prescriptions");

fn validate_items(items: &[PrescriptionItem]) -> Result<()> {
    items
        .iter()
        .enumerate()
        .try_for_each(|(i, item)| item.validate(i))
}

impl Prescription {
    pub fn new(
        id: String,
        tenant_id: String,
        input: PrescriptionInput,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        validate_items(&input.items)?;
        Ok(Self {
            id,
            tenant_id,
            patient_id: input.patient_id,
            doctor_id: input.doctor_id,
            appointment_id: input.appointment_id,
            queue_entry_id: input.queue_entry_id,
            diagnosis: input.diagnosis,
            notes: input.notes,
            items: input.items,
            status: PrescriptionStatus::Draft,
            invoice_id: None,
            finalized_at: None,
            meta: RecordMeta::new(now),
        })
    }

    fn ensure_draft(&self, target: PrescriptionStatus) -> Result<()> {
        if self.status != PrescriptionStatus::Draft {
            return Err(ClinicError::transition("prescription", self.status, target));
        }
        Ok(())
    }

    pub fn update(&mut self, update: PrescriptionUpdate) -> Result<()> {
        self.ensure_draft(PrescriptionStatus::Draft)?;
        validate_items(&update.items)?;
        self.diagnosis = update.diagnosis;
        self.notes = update.notes;
        self.items = update.items;
        Ok(())
    }

    pub fn finalize(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_draft(PrescriptionStatus::Finalized)?;
        if self.items.is_empty() {
            return Err(ClinicError::validation(
                "cannot finalize a prescription without items",
            ));
        }
        self.status = PrescriptionStatus::Finalized;
        self.finalized_at = Some(now);
        Ok(())
    }

    /// Cancel a draft, or a finalized prescription whose invoice is untouched
    pub fn cancel(&mut self, invoice_status: Option<InvoiceStatus>) -> Result<()> {
        match (self.status, invoice_status) {
            (PrescriptionStatus::Draft, _) => {}
            (PrescriptionStatus::Finalized, None | Some(InvoiceStatus::Draft)) => {}
            (PrescriptionStatus::Finalized, Some(status)) => {
                return Err(ClinicError::Conflict(format!(
                    "linked invoice is {:?}; void or refund it first",
                    status
                )));
            }
            (PrescriptionStatus::Cancelled, _) => {
                return Err(ClinicError::transition(
                    "prescription",
                    self.status,
                    PrescriptionStatus::Cancelled,
                ));
            }
        }
        self.status = PrescriptionStatus::Cancelled;
        Ok(())
    }

    /// Invoice lines for a finalized visit: consultation fee plus priced items
    pub fn billable_lines(&self, doctor: &Doctor, tax: Rate) -> Vec<InvoiceItem> {
        let mut lines = Vec::new();
        if doctor.consultation_fee > 0 {
            lines.push(InvoiceItem {
                description: format!("Consultation - {}", doctor.name),
                kind: LineKind::Consultation,
                quantity: 1,
                unit_price: doctor.consultation_fee,
                discount: Rate::ZERO,
                tax,
            });
        }
        for item in self.items.iter().filter(|i| i.unit_price > 0) {
            lines.push(InvoiceItem {
                description: item.name.clone(),
                kind: item.kind.into(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount: Rate::ZERO,
                tax,
            });
        }
        lines
    }
}
