use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClinicError, Result};
use crate::impl_record;
use crate::record::RecordMeta;

pub const DEFAULT_CONSULTATION_MINUTES: u32 = 15;

fn default_consultation_minutes() -> u32 {
    DEFAULT_CONSULTATION_MINUTES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorInput {
    pub name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    /// Minor units of the tenant currency
    #[serde(default)]
    pub consultation_fee: i64,
    #[serde(default = "default_consultation_minutes")]
    pub avg_consultation_minutes: u32,
}

impl DoctorInput {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ClinicError::invalid_field("name", "doctor name is required"));
        }
        if self.consultation_fee < 0 {
            return Err(ClinicError::invalid_field(
                "consultation_fee",
                "consultation fee cannot be negative",
            ));
        }
        if self.avg_consultation_minutes == 0 {
            return Err(ClinicError::invalid_field(
                "avg_consultation_minutes",
                "average consultation time must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub specialization: Option<String>,
    pub consultation_fee: i64,
    pub avg_consultation_minutes: u32,
    pub active: bool,
    pub meta: RecordMeta,
}

impl_record!(Doctor, "doctors");

impl Doctor {
    pub fn new(id: String, tenant_id: String, input: DoctorInput, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id,
            name: input.name.trim().to_string(),
            specialization: input.specialization,
            consultation_fee: input.consultation_fee,
            avg_consultation_minutes: input.avg_consultation_minutes,
            active: true,
            meta: RecordMeta::new(now),
        }
    }

    pub fn apply(&mut self, input: DoctorInput) {
        self.name = input.name.trim().to_string();
        self.specialization = input.specialization;
        self.consultation_fee = input.consultation_fee;
        self.avg_consultation_minutes = input.avg_consultation_minutes;
    }

    pub fn ensure_active(&self) -> Result<()> {
        if !self.active {
            return Err(ClinicError::Conflict(format!(
                "doctor {} is not active",
                self.id
            )));
        }
        Ok(())
    }
}
