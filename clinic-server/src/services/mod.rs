//! Tenant-scoped workflows
//!
//! Every operation that writes more than one record runs inside a single
//! store transaction, so a failure part-way leaves nothing behind.

pub mod appointments;
pub mod doctors;
pub mod invoices;
pub mod patients;
pub mod prescriptions;
pub mod queue;
pub mod subscriptions;

use chrono::{DateTime, NaiveDate, Utc};
use clinic_core::{
    ClinicError, Doctor, PhiCipher, Plan, Result, SealedPatient, Subscription, TenantSettings,
    subscription::Usage,
};
use clinic_store::{SqliteStore, TransactionOps};
use serde::Serialize;

use crate::config::BillingSettings;
use crate::AppState;

/// Operations of one tenant at one instant
pub struct ClinicService<'a> {
    store: &'a SqliteStore,
    cipher: &'a dyn PhiCipher,
    billing: &'a BillingSettings,
    plans: &'a [Plan],
    tenant_id: &'a str,
    settings: &'a TenantSettings,
    now: DateTime<Utc>,
}

impl<'a> ClinicService<'a> {
    pub fn new(state: &'a AppState, tenant_id: &'a str, now: DateTime<Utc>) -> Result<Self> {
        let tenant = state
            .config
            .tenant(tenant_id)
            .ok_or_else(|| ClinicError::Forbidden(format!("unknown tenant {}", tenant_id)))?;
        Ok(Self {
            store: &state.store,
            cipher: state.cipher.as_ref(),
            billing: &state.config.billing,
            plans: &state.plans,
            tenant_id,
            settings: &tenant.settings,
            now,
        })
    }

    pub fn tenant_id(&self) -> &str {
        self.tenant_id
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }

    /// Run a write workflow, refusing it when the subscription is inactive
    fn write_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TransactionOps<'_>) -> Result<T>,
    {
        self.store.in_transaction(|ops| {
            if let Some(subscription) = ops.get::<Subscription>(self.tenant_id, self.tenant_id)? {
                subscription.ensure_writable(self.now, self.billing.grace_days)?;
            }
            f(ops)
        })
    }

    fn read_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TransactionOps<'_>) -> Result<T>,
    {
        self.store.in_transaction(f)
    }

    fn plan(&self, code: &str) -> Result<&'a Plan> {
        self.plans
            .iter()
            .find(|p| p.code == code)
            .ok_or_else(|| ClinicError::invalid_field("plan_code", format!("unknown plan {}", code)))
    }

    /// Plan in force: the subscribed one, else the configured default
    fn current_plan(&self, ops: &TransactionOps<'_>) -> Result<&'a Plan> {
        match ops.get::<Subscription>(self.tenant_id, self.tenant_id)? {
            Some(subscription) => self.plan(&subscription.plan_code),
            None => self.plan(&self.billing.default_plan),
        }
    }

    /// Records counted against plan limits
    fn usage(&self, ops: &TransactionOps<'_>) -> Result<Usage> {
        let doctors = ops
            .list::<Doctor>(self.tenant_id)?
            .iter()
            .filter(|d| d.active)
            .count();
        let patients = ops
            .list::<SealedPatient>(self.tenant_id)?
            .iter()
            .filter(|p| !p.archived)
            .count();
        Ok(Usage { doctors, patients })
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Stored string form of an enum value, for field filters
fn filter_value<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{ServerConfig, TenantConfig};
    use clinic_core::{
        AppointmentRequest, DoctorInput, PatientInput, PlaintextCipher, Rate,
        patient::PatientPhi,
    };
    use clinic_store::AuditLog;
    use std::sync::Arc;

    pub fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    /// 2024-06-03 is a Monday
    pub fn monday_morning() -> DateTime<Utc> {
        at("2024-06-03T08:30:00Z")
    }

    pub fn state() -> AppState {
        let mut config = ServerConfig::default();
        config.tenants[0].settings.default_tax_rate = Rate::from_basis_points(1000).unwrap();
        config.tenants.push(TenantConfig {
            id: "other".to_string(),
            name: "Other Clinic".to_string(),
            settings: Default::default(),
        });
        config.billing.plans[0].max_doctors = Some(2);
        config.billing.plans[0].max_patients = Some(3);
        AppState::new(
            SqliteStore::open(":memory:").unwrap(),
            Arc::new(AuditLog::open(":memory:").unwrap()),
            Arc::new(PlaintextCipher::new("test-index-key").unwrap()),
            config,
        )
        .unwrap()
    }

    pub fn service(state: &AppState, now: DateTime<Utc>) -> ClinicService<'_> {
        ClinicService::new(state, "default", now).unwrap()
    }

    pub fn patient_input(first: &str, last: &str, phone: Option<&str>) -> PatientInput {
        PatientInput {
            first_name: first.into(),
            last_name: last.into(),
            date_of_birth: None,
            gender: Default::default(),
            phi: PatientPhi {
                phone: phone.map(str::to_string),
                ..Default::default()
            },
        }
    }

    pub fn doctor_input(name: &str, fee: i64) -> DoctorInput {
        DoctorInput {
            name: name.into(),
            specialization: None,
            consultation_fee: fee,
            avg_consultation_minutes: 10,
        }
    }

    pub fn booking(patient_id: &str, doctor_id: &str, hh: u32, mm: u32) -> AppointmentRequest {
        AppointmentRequest {
            patient_id: patient_id.into(),
            doctor_id: doctor_id.into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            start_time: chrono::NaiveTime::from_hms_opt(hh, mm, 0).unwrap(),
            duration_minutes: None,
            kind: Default::default(),
            reason: None,
        }
    }
}
