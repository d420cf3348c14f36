pub mod appointments;
pub mod doctors;
pub mod invoices;
pub mod metadata;
pub mod patients;
pub mod prescriptions;
pub mod queue;
pub mod subscription;

use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use clinic_core::{ClinicError, ErrorBody};
use http_body_util::BodyExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::audit;
use crate::auth::AuthUser;
use crate::services::ClinicService;
use crate::AppState;

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<Value>);

pub type ApiResult = Result<Response, ApiError>;

pub fn status_for(err: &ClinicError) -> StatusCode {
    match err {
        ClinicError::NotFound { .. } => StatusCode::NOT_FOUND,
        ClinicError::Validation { .. } | ClinicError::InvalidJson(_) => StatusCode::BAD_REQUEST,
        ClinicError::Conflict(_) | ClinicError::InvalidTransition { .. } => StatusCode::CONFLICT,
        ClinicError::LimitExceeded { .. } | ClinicError::SubscriptionInactive(_) => {
            StatusCode::PAYMENT_REQUIRED
        }
        ClinicError::Forbidden(_) => StatusCode::FORBIDDEN,
        ClinicError::Crypto(_) | ClinicError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: &ClinicError) -> ApiError {
    let status = status_for(err);
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }
    (status, Json(json!(ErrorBody::from(err))))
}

fn invalid_body(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!(ErrorBody::invalid(message))),
    )
}

async fn body_bytes(request: Request) -> Result<axum::body::Bytes, ApiError> {
    Ok(request
        .into_body()
        .collect()
        .await
        .map_err(|e| invalid_body(e.to_string()))?
        .to_bytes())
}

/// Deserialize the request body
pub async fn read_json<T: DeserializeOwned>(request: Request) -> Result<T, ApiError> {
    let bytes = body_bytes(request).await?;
    serde_json::from_slice(&bytes).map_err(|e| invalid_body(e.to_string()))
}

/// Like [`read_json`], but an empty body yields the default
pub async fn read_json_or_default<T: DeserializeOwned + Default>(
    request: Request,
) -> Result<T, ApiError> {
    let bytes = body_bytes(request).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| invalid_body(e.to_string()))
}

/// Caller placed in the request by the auth middleware
pub fn current_user(request: &Request) -> Result<AuthUser, ApiError> {
    request.extensions().get::<AuthUser>().cloned().ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!(ErrorBody::unauthorized("Authentication required"))),
        )
    })
}

/// Services bound to the caller's tenant at the current instant
pub fn service<'a>(state: &'a AppState, user: &'a AuthUser) -> Result<ClinicService<'a>, ApiError> {
    ClinicService::new(state, &user.tenant_id, chrono::Utc::now()).map_err(|e| error_response(&e))
}

/// Audit the outcome of a mutation and map its error
pub fn audited<T>(
    state: &AppState,
    user: &AuthUser,
    action: &str,
    entity: &str,
    result: clinic_core::Result<T>,
    entity_id: impl FnOnce(&T) -> String,
) -> Result<T, ApiError> {
    match result {
        Ok(value) => {
            audit::log_operation_success(&state.audit, user, action, entity, &entity_id(&value));
            Ok(value)
        }
        Err(e) => {
            audit::log_operation_error(&state.audit, user, action, entity, None, &e.to_string());
            Err(error_response(&e))
        }
    }
}

pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> ApiResult {
    let body = serde_json::to_value(value)
        .map_err(|e| error_response(&ClinicError::InvalidJson(e)))?;
    Ok((status, Json(body)).into_response())
}

/// Build response with a weak ETag from the record version
pub fn response_with_etag<T: Serialize>(status: StatusCode, value: &T, version: u32) -> ApiResult {
    let body = serde_json::to_value(value)
        .map_err(|e| error_response(&ClinicError::InvalidJson(e)))?;

    let mut headers = HeaderMap::new();
    if let Ok(val) = format!("W/\"{}\"", version).parse() {
        headers.insert(header::ETAG, val);
    }
    Ok((status, headers, Json(body)).into_response())
}
