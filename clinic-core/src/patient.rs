use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClinicError, Result};
use crate::impl_record;
use crate::phi::{normalize_phone, PhiCipher};
use crate::record::RecordMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
    Other,
    #[default]
    Unknown,
}

/// Fields encrypted at rest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientPhi {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_history: Option<String>,
}

/// Mutable patient fields accepted from clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientInput {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default, flatten)]
    pub phi: PatientPhi,
}

impl PatientInput {
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        if self.first_name.trim().is_empty() {
            return Err(ClinicError::invalid_field("first_name", "first name is required"));
        }
        if self.last_name.trim().is_empty() {
            return Err(ClinicError::invalid_field("last_name", "last name is required"));
        }
        if let Some(dob) = self.date_of_birth
            && dob > today
        {
            return Err(ClinicError::invalid_field(
                "date_of_birth",
                "date of birth is in the future",
            ));
        }
        if let Some(ref email) = self.phi.email
            && !email.contains('@')
        {
            return Err(ClinicError::invalid_field("email", "invalid email address"));
        }
        if let Some(ref phone) = self.phi.phone
            && normalize_phone(phone).len() < 5
        {
            return Err(ClinicError::invalid_field("phone", "invalid phone number"));
        }
        Ok(())
    }
}

/// Decrypted patient as seen by services and API clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub tenant_id: String,
    pub patient_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Gender,
    #[serde(flatten)]
    pub phi: PatientPhi,
    pub archived: bool,
    pub meta: RecordMeta,
}

/// Storage form of a patient: PHI replaced by ciphertext
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedPatient {
    pub id: String,
    pub tenant_id: String,
    pub patient_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Gender,
    pub sealed_phi: String,
    pub phone_index: Option<String>,
    pub archived: bool,
    pub meta: RecordMeta,
}

impl_record!(SealedPatient, "patients");

impl Patient {
    pub fn new(
        id: String,
        tenant_id: String,
        patient_number: String,
        input: PatientInput,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            patient_number,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            date_of_birth: input.date_of_birth,
            gender: input.gender,
            phi: input.phi,
            archived: false,
            meta: RecordMeta::new(now),
        }
    }

    /// Replace the mutable fields
    pub fn apply(&mut self, input: PatientInput) {
        self.first_name = input.first_name.trim().to_string();
        self.last_name = input.last_name.trim().to_string();
        self.date_of_birth = input.date_of_birth;
        self.gender = input.gender;
        self.phi = input.phi;
    }

    pub fn to_input(&self) -> PatientInput {
        PatientInput {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            date_of_birth: self.date_of_birth,
            gender: self.gender,
            phi: self.phi.clone(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn seal(&self, cipher: &dyn PhiCipher) -> Result<SealedPatient> {
        let phi_json = serde_json::to_string(&self.phi)?;
        let phone_index = self
            .phi
            .phone
            .as_deref()
            .map(|p| cipher.blind_index(&self.tenant_id, &normalize_phone(p)))
            .transpose()?;
        Ok(SealedPatient {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            patient_number: self.patient_number.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            date_of_birth: self.date_of_birth,
            gender: self.gender,
            sealed_phi: cipher.encrypt(&phi_json)?,
            phone_index,
            archived: self.archived,
            meta: self.meta.clone(),
        })
    }
}

impl SealedPatient {
    pub fn open(self, cipher: &dyn PhiCipher) -> Result<Patient> {
        let phi_json = cipher.decrypt(&self.sealed_phi)?;
        let phi: PatientPhi = serde_json::from_str(&phi_json)
            .map_err(|e| ClinicError::Crypto(format!("undecodable PHI payload: {}", e)))?;
        Ok(Patient {
            id: self.id,
            tenant_id: self.tenant_id,
            patient_number: self.patient_number,
            first_name: self.first_name,
            last_name: self.last_name,
            date_of_birth: self.date_of_birth,
            gender: self.gender,
            phi,
            archived: self.archived,
            meta: self.meta,
        })
    }

    /// Case-insensitive substring match on "first last"
    pub fn matches_name(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        format!("{} {}", self.first_name, self.last_name)
            .to_lowercase()
            .contains(&needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClinicError;
    use crate::phi::{keyed_blind_index, PlaintextCipher};

    /// Reversible toy cipher so tests can tell sealed text from plaintext
    struct ReverseCipher;

    impl PhiCipher for ReverseCipher {
        fn encrypt(&self, plaintext: &str) -> Result<String> {
            Ok(plaintext.chars().rev().collect())
        }
        fn decrypt(&self, ciphertext: &str) -> Result<String> {
            Ok(ciphertext.chars().rev().collect())
        }
        fn blind_index(&self, tenant_id: &str, value: &str) -> Result<String> {
            keyed_blind_index(b"reverse", tenant_id, value)
        }
    }

    struct BrokenCipher;

    impl PhiCipher for BrokenCipher {
        fn encrypt(&self, _: &str) -> Result<String> {
            Err(ClinicError::Crypto("key unavailable".into()))
        }
        fn decrypt(&self, _: &str) -> Result<String> {
            Err(ClinicError::Crypto("key unavailable".into()))
        }
        fn blind_index(&self, _: &str, _: &str) -> Result<String> {
            Err(ClinicError::Crypto("key unavailable".into()))
        }
    }

    fn plain() -> PlaintextCipher {
        PlaintextCipher::new("index-key").unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn input() -> PatientInput {
        PatientInput {
            first_name: " Jane ".into(),
            last_name: "Doe".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 2, 3),
            gender: Gender::Female,
            phi: PatientPhi {
                phone: Some("+1 555-010-2000".into()),
                email: Some("jane@example.com".into()),
                address: None,
                medical_history: Some("asthma".into()),
            },
        }
    }

    fn patient() -> Patient {
        Patient::new(
            "p1".into(),
            "clinic-a".into(),
            "P-000001".into(),
            input(),
            "2024-06-01T08:00:00Z".parse().unwrap(),
        )
    }

    #[test]
    fn test_validate_input() {
        assert!(input().validate(today()).is_ok());

        let mut bad = input();
        bad.first_name = "  ".into();
        assert!(bad.validate(today()).is_err());

        let mut bad = input();
        bad.date_of_birth = NaiveDate::from_ymd_opt(2030, 1, 1);
        assert!(bad.validate(today()).is_err());

        let mut bad = input();
        bad.phi.email = Some("nope".into());
        assert!(bad.validate(today()).is_err());
    }

    #[test]
    fn test_new_trims_names() {
        let p = patient();
        assert_eq!(p.first_name, "Jane");
        assert_eq!(p.full_name(), "Jane Doe");
        assert_eq!(p.meta.version, 1);
    }

    #[test]
    fn test_seal_hides_phi() {
        let sealed = patient().seal(&ReverseCipher).unwrap();
        assert!(!sealed.sealed_phi.contains("asthma"));
        let stored = serde_json::to_string(&sealed).unwrap();
        assert!(!stored.contains("jane@example.com"));
        assert!(sealed.phone_index.is_some());
    }

    #[test]
    fn test_seal_open_preserves_phi() {
        let original = patient();
        let opened = original.seal(&ReverseCipher).unwrap().open(&ReverseCipher).unwrap();
        assert_eq!(opened.phi, original.phi);
        assert_eq!(opened.patient_number, "P-000001");
    }

    #[test]
    fn test_phone_index_ignores_formatting() {
        let mut other = patient();
        other.phi.phone = Some("15550102000".into());
        let a = patient().seal(&plain()).unwrap();
        let b = other.seal(&plain()).unwrap();
        assert_eq!(a.phone_index, b.phone_index);
    }

    #[test]
    fn test_cipher_failure_propagates() {
        assert!(matches!(
            patient().seal(&BrokenCipher),
            Err(ClinicError::Crypto(_))
        ));
    }

    #[test]
    fn test_matches_name() {
        let sealed = patient().seal(&plain()).unwrap();
        assert!(sealed.matches_name("jane"));
        assert!(sealed.matches_name("E D"));
        assert!(!sealed.matches_name("smith"));
    }
}
