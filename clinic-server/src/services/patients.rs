use clinic_core::{
    phi::normalize_phone, subscription::LimitedResource, ClinicError, Patient, PatientInput,
    Prescription, Result, SealedPatient,
};
use clinic_store::TransactionOps;
use serde::Deserialize;

use super::{new_id, ClinicService};

#[derive(Debug, Default, Deserialize)]
pub struct PatientQuery {
    pub name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

impl ClinicService<'_> {
    pub fn create_patient(&self, input: PatientInput) -> Result<Patient> {
        input.validate(self.today())?;
        self.write_tx(|ops| {
            let usage = self.usage(ops)?;
            self.current_plan(ops)?
                .check_limit(LimitedResource::Patients, usage.patients)?;

            let number = ops.next_sequence(self.tenant_id, "patient")?;
            let patient = Patient::new(
                new_id(),
                self.tenant_id.to_string(),
                format!("P-{:06}", number),
                input,
                self.now,
            );
            ops.insert(&patient.seal(self.cipher)?)?;
            tracing::info!(
                tenant_id = %self.tenant_id,
                patient_id = %patient.id,
                patient_number = %patient.patient_number,
                "Patient registered"
            );
            Ok(patient)
        })
    }

    pub fn get_patient(&self, id: &str) -> Result<Patient> {
        self.store
            .require::<SealedPatient>(self.tenant_id, id)?
            .open(self.cipher)
    }

    /// Load an active patient inside a workflow
    pub(crate) fn bookable_patient(&self, ops: &TransactionOps<'_>, id: &str) -> Result<SealedPatient> {
        let patient = ops.require::<SealedPatient>(self.tenant_id, id)?;
        if patient.archived {
            return Err(ClinicError::invalid_field(
                "patient_id",
                format!("patient {} is archived", patient.patient_number),
            ));
        }
        Ok(patient)
    }

    /// Replace all mutable fields
    pub fn update_patient(&self, id: &str, input: PatientInput) -> Result<Patient> {
        input.validate(self.today())?;
        self.write_tx(|ops| {
            let mut patient = self.bookable_patient(ops, id)?.open(self.cipher)?;
            patient.apply(input);
            self.store_patient(ops, patient)
        })
    }

    /// Apply an RFC 6902 patch to the editable view of a patient
    pub fn patch_patient(&self, id: &str, patch: &json_patch::Patch) -> Result<Patient> {
        self.write_tx(|ops| {
            let mut patient = self.bookable_patient(ops, id)?.open(self.cipher)?;
            let mut doc = serde_json::to_value(patient.to_input())?;
            json_patch::patch(&mut doc, patch)
                .map_err(|e| ClinicError::validation(format!("patch failed: {}", e)))?;
            let input: PatientInput = serde_json::from_value(doc)
                .map_err(|e| ClinicError::validation(format!("patched patient is invalid: {}", e)))?;
            input.validate(self.today())?;
            patient.apply(input);
            self.store_patient(ops, patient)
        })
    }

    /// Soft delete; history and references stay intact
    pub fn archive_patient(&self, id: &str) -> Result<Patient> {
        self.write_tx(|ops| {
            let mut patient = ops
                .require::<SealedPatient>(self.tenant_id, id)?
                .open(self.cipher)?;
            if patient.archived {
                return Ok(patient);
            }
            patient.archived = true;
            let patient = self.store_patient(ops, patient)?;
            tracing::info!(tenant_id = %self.tenant_id, patient_id = %id, "Patient archived");
            Ok(patient)
        })
    }

    fn store_patient(&self, ops: &TransactionOps<'_>, mut patient: Patient) -> Result<Patient> {
        let mut sealed = patient.seal(self.cipher)?;
        ops.update(&mut sealed, self.now)?;
        patient.meta = sealed.meta;
        Ok(patient)
    }

    /// Exact phone lookup through the blind index, else name substring
    pub fn search_patients(&self, query: &PatientQuery) -> Result<Vec<Patient>> {
        let candidates = match query.phone.as_deref() {
            Some(phone) => {
                let index = self
                    .cipher
                    .blind_index(self.tenant_id, &normalize_phone(phone))?;
                self.store
                    .list_by::<SealedPatient>(self.tenant_id, &[("phone_index", &index)])?
            }
            None => self.store.list::<SealedPatient>(self.tenant_id)?,
        };

        candidates
            .into_iter()
            .filter(|p| query.include_archived || !p.archived)
            .filter(|p| query.name.as_deref().is_none_or(|n| p.matches_name(n)))
            .map(|p| p.open(self.cipher))
            .collect()
    }

    pub fn patient_history(&self, id: &str) -> Result<Vec<Patient>> {
        let versions = self.store.history::<SealedPatient>(self.tenant_id, id)?;
        if versions.is_empty() {
            return Err(ClinicError::not_found("patients", id));
        }
        versions.into_iter().map(|p| p.open(self.cipher)).collect()
    }

    pub fn patient_prescriptions(&self, id: &str) -> Result<Vec<Prescription>> {
        self.read_tx(|ops| {
            ops.require::<SealedPatient>(self.tenant_id, id)?;
            Ok(ops.list_by::<Prescription>(self.tenant_id, &[("patient_id", id)])?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;

    #[test]
    fn test_create_assigns_sequential_numbers() {
        let state = state();
        let svc = service(&state, monday_morning());
        let a = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();
        let b = svc.create_patient(patient_input("Ben", "Ode", None)).unwrap();
        assert_eq!(a.patient_number, "P-000001");
        assert_eq!(b.patient_number, "P-000002");
        assert_eq!(svc.get_patient(&a.id).unwrap().first_name, "Aiko");
    }

    #[test]
    fn test_validation_rejects_blank_name() {
        let state = state();
        let svc = service(&state, monday_morning());
        let err = svc.create_patient(patient_input(" ", "Tanaka", None)).unwrap_err();
        assert!(matches!(err, ClinicError::Validation { .. }));
    }

    #[test]
    fn test_patient_limit_from_default_plan() {
        let state = state();
        let svc = service(&state, monday_morning());
        for i in 0..3 {
            svc.create_patient(patient_input("P", &format!("N{}", i), None))
                .unwrap();
        }
        let err = svc.create_patient(patient_input("P", "N4", None)).unwrap_err();
        assert!(matches!(err, ClinicError::LimitExceeded { limit: 3, .. }));

        // Archiving frees a seat
        let first = &svc.search_patients(&PatientQuery::default()).unwrap()[0];
        svc.archive_patient(&first.id).unwrap();
        assert!(svc.create_patient(patient_input("P", "N4", None)).is_ok());
    }

    #[test]
    fn test_search_by_phone_and_name() {
        let state = state();
        let svc = service(&state, monday_morning());
        let aiko = svc
            .create_patient(patient_input("Aiko", "Tanaka", Some("+1 (555) 010-2000")))
            .unwrap();
        svc.create_patient(patient_input("Ben", "Tanabe", Some("555-999-0000")))
            .unwrap();

        let by_phone = svc
            .search_patients(&PatientQuery {
                phone: Some("15550102000".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_phone.len(), 1);
        assert_eq!(by_phone[0].id, aiko.id);

        let by_name = svc
            .search_patients(&PatientQuery {
                name: Some("tana".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_name.len(), 2);
    }

    #[test]
    fn test_patch_and_history() {
        let state = state();
        let svc = service(&state, monday_morning());
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();

        let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
            {"op": "replace", "path": "/last_name", "value": "Sato"},
            {"op": "add", "path": "/email", "value": "aiko@example.com"}
        ]))
        .unwrap();
        let patched = svc.patch_patient(&p.id, &patch).unwrap();
        assert_eq!(patched.last_name, "Sato");
        assert_eq!(patched.phi.email.as_deref(), Some("aiko@example.com"));
        assert_eq!(patched.meta.version, 2);

        let history = svc.patient_history(&p.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].last_name, "Tanaka");
    }

    #[test]
    fn test_archived_excluded_and_not_editable() {
        let state = state();
        let svc = service(&state, monday_morning());
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();
        svc.archive_patient(&p.id).unwrap();

        assert!(svc.search_patients(&PatientQuery::default()).unwrap().is_empty());
        let all = svc
            .search_patients(&PatientQuery {
                include_archived: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(svc
            .update_patient(&p.id, patient_input("Aiko", "Sato", None))
            .is_err());
    }

    #[test]
    fn test_other_tenant_cannot_see_patient() {
        let state = state();
        let svc = service(&state, monday_morning());
        let p = svc.create_patient(patient_input("Aiko", "Tanaka", None)).unwrap();

        let other = ClinicService::new(&state, "other", monday_morning()).unwrap();
        assert!(matches!(
            other.get_patient(&p.id),
            Err(ClinicError::NotFound { .. })
        ));
        assert!(other.search_patients(&PatientQuery::default()).unwrap().is_empty());
    }
}
