use clinic_core::ClinicError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Record already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    #[error("Version conflict on {collection}/{id}: expected {expected}, found {found}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: u32,
        found: u32,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for ClinicError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => ClinicError::NotFound { collection, id },
            StoreError::AlreadyExists { .. } | StoreError::VersionConflict { .. } => {
                ClinicError::Conflict(err.to_string())
            }
            other => ClinicError::Storage(other.to_string()),
        }
    }
}
