use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
};
use clinic_core::{Prescription, PrescriptionInput, PrescriptionUpdate};
use std::sync::Arc;

use super::{
    audited, current_user, error_response, json_response, read_json, response_with_etag, service,
    ApiResult,
};
use crate::auth::Role;
use crate::AppState;

const ENTITY: &str = "prescriptions";

fn prescription_response(status: StatusCode, prescription: &Prescription) -> ApiResult {
    response_with_etag(status, prescription, prescription.meta.version)
}

/// Start a draft (POST /prescriptions)
pub async fn create(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Doctor, Role::Admin])?;
    let input: PrescriptionInput = read_json(request).await?;
    let svc = service(&state, &user)?;
    let prescription = audited(&state, &user, "CREATE", ENTITY, svc.create_prescription(input), |p| {
        p.id.clone()
    })?;
    prescription_response(StatusCode::CREATED, &prescription)
}

/// GET /prescriptions/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let prescription = svc.get_prescription(&id).map_err(|e| error_response(&e))?;
    prescription_response(StatusCode::OK, &prescription)
}

/// Edit a draft (PUT /prescriptions/{id})
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Doctor, Role::Admin])?;
    let body: PrescriptionUpdate = read_json(request).await?;
    let svc = service(&state, &user)?;
    let prescription = audited(
        &state,
        &user,
        "UPDATE",
        ENTITY,
        svc.update_prescription(&id, body),
        |p| p.id.clone(),
    )?;
    prescription_response(StatusCode::OK, &prescription)
}

/// Finalize and raise the invoice (POST /prescriptions/{id}/finalize)
pub async fn finalize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Doctor, Role::Admin])?;
    let svc = service(&state, &user)?;
    let done = audited(&state, &user, "FINALIZE", ENTITY, svc.finalize_prescription(&id), |f| {
        f.prescription.id.clone()
    })?;
    json_response(StatusCode::OK, &done)
}

/// POST /prescriptions/{id}/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Doctor, Role::Admin])?;
    let svc = service(&state, &user)?;
    let prescription = audited(&state, &user, "CANCEL", ENTITY, svc.cancel_prescription(&id), |p| {
        p.id.clone()
    })?;
    prescription_response(StatusCode::OK, &prescription)
}
