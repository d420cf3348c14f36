use serde::{Deserialize, Serialize};

use crate::error::ClinicError;

/// JSON error envelope returned by every API route
///
/// `{"error": {"code": "not-found", "message": "...", "field": "..."}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Invalid,
    NotFound,
    Conflict,
    InvalidTransition,
    LimitExceeded,
    SubscriptionInactive,
    Unauthorized,
    Forbidden,
    Exception,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code,
                message: message.into(),
                field: None,
            },
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, message)
    }

    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("Record not found: {}/{}", collection, id),
        )
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Exception, message)
    }

    /// Attach the offending input field
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.error.field = Some(field.into());
        self
    }
}

impl From<&ClinicError> for ErrorBody {
    fn from(err: &ClinicError) -> Self {
        match err {
            ClinicError::NotFound { collection, id } => Self::not_found(collection, id),
            ClinicError::Validation { message, field } => {
                let body = Self::invalid(message.clone());
                match field {
                    Some(f) => body.with_field(f.clone()),
                    None => body,
                }
            }
            ClinicError::InvalidJson(e) => Self::invalid(e.to_string()),
            ClinicError::Conflict(_) => Self::new(ErrorCode::Conflict, err.to_string()),
            ClinicError::InvalidTransition { .. } => {
                Self::new(ErrorCode::InvalidTransition, err.to_string())
            }
            ClinicError::LimitExceeded { .. } => {
                Self::new(ErrorCode::LimitExceeded, err.to_string())
            }
            ClinicError::SubscriptionInactive(_) => {
                Self::new(ErrorCode::SubscriptionInactive, err.to_string())
            }
            ClinicError::Forbidden(msg) => Self::forbidden(msg.clone()),
            ClinicError::Crypto(_) | ClinicError::Storage(_) => {
                Self::storage_error(err.to_string())
            }
        }
    }
}
