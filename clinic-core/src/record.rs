use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Bookkeeping carried by every stored record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordMeta {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordMeta {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance to the next version
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

/// A tenant-owned document that lives in one store collection
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
    fn tenant_id(&self) -> &str;
    fn meta(&self) -> &RecordMeta;
    fn meta_mut(&mut self) -> &mut RecordMeta;
}

/// Implements [`Record`] for a struct with `id`, `tenant_id` and `meta` fields
#[macro_export]
macro_rules! impl_record {
    ($ty:ty, $collection:expr) => {
        impl $crate::record::Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.id
            }

            fn tenant_id(&self) -> &str {
                &self.tenant_id
            }

            fn meta(&self) -> &$crate::record::RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::record::RecordMeta {
                &mut self.meta
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_bumps_version() {
        let t0 = "2024-01-01T09:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let t1 = "2024-01-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mut meta = RecordMeta::new(t0);
        meta.touch(t1);
        assert_eq!(meta.version, 2);
        assert_eq!(meta.created_at, t0);
        assert_eq!(meta.updated_at, t1);
    }
}
