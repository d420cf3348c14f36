use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClinicError {
    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Plan limit exceeded: {resource} (limit {limit})")]
    LimitExceeded { resource: String, limit: u32 },

    #[error("Subscription inactive: {0}")]
    SubscriptionInactive(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("PHI cipher error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl ClinicError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Validation error pointing at a specific input field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn transition(
        entity: &'static str,
        from: impl std::fmt::Debug,
        to: impl std::fmt::Debug,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClinicError>;
