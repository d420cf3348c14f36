//! Protected health information at rest
//!
//! Field-level encryption is delegated to a [`PhiCipher`] supplied by the
//! deployment (KMS, HSM, envelope keys). The store only ever sees the
//! ciphertext plus blind indexes for exact-match lookups.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ClinicError, Result};

type HmacSha256 = Hmac<Sha256>;

pub trait PhiCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;

    /// Deterministic lookup token for an exact-match PHI value
    fn blind_index(&self, tenant_id: &str, value: &str) -> Result<String>;
}

/// Hex HMAC-SHA256 of `tenant:value` under `key`
pub fn keyed_blind_index(key: &[u8], tenant_id: &str, value: &str) -> Result<String> {
    if key.is_empty() {
        return Err(ClinicError::Crypto("blind index key is empty".to_string()));
    }
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ClinicError::Crypto(format!("invalid blind index key: {}", e)))?;
    mac.update(tenant_id.as_bytes());
    mac.update(b":");
    mac.update(value.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Identity cipher for development and tests; lookups are still keyed
#[derive(Clone)]
pub struct PlaintextCipher {
    index_key: Vec<u8>,
}

impl PlaintextCipher {
    pub fn new(index_key: impl Into<Vec<u8>>) -> Result<Self> {
        let index_key = index_key.into();
        if index_key.is_empty() {
            return Err(ClinicError::Crypto("blind index key is empty".to_string()));
        }
        Ok(Self { index_key })
    }
}

impl std::fmt::Debug for PlaintextCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaintextCipher").finish_non_exhaustive()
    }
}

impl PhiCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }

    fn blind_index(&self, tenant_id: &str, value: &str) -> Result<String> {
        keyed_blind_index(&self.index_key, tenant_id, value)
    }
}

/// Keep only the digits of a phone number ("+1 (555) 010-2000" -> "15550102000")
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 010-2000"), "15550102000");
        assert_eq!(normalize_phone("abc"), "");
    }

    #[test]
    fn test_blind_index_is_tenant_scoped() {
        let cipher = PlaintextCipher::new("index-key").unwrap();
        let a = cipher.blind_index("clinic-a", "5550102000").unwrap();
        let b = cipher.blind_index("clinic-b", "5550102000").unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, cipher.blind_index("clinic-a", "5550102000").unwrap());
    }

    #[test]
    fn test_blind_index_depends_on_key() {
        let one = PlaintextCipher::new("key-one").unwrap();
        let two = PlaintextCipher::new("key-two").unwrap();
        assert_ne!(
            one.blind_index("clinic-a", "5550102000").unwrap(),
            two.blind_index("clinic-a", "5550102000").unwrap()
        );
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(matches!(PlaintextCipher::new(""), Err(ClinicError::Crypto(_))));
        assert!(keyed_blind_index(b"", "clinic-a", "555").is_err());
    }
}
