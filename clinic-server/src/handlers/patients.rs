use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
};
use clinic_core::PatientInput;
use std::sync::Arc;

use super::{
    audited, current_user, error_response, json_response, read_json, response_with_etag, service,
    ApiResult,
};
use crate::services::patients::PatientQuery;
use crate::AppState;

const ENTITY: &str = "patients";

/// Register a patient (POST /patients)
pub async fn create(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    let input: PatientInput = read_json(request).await?;
    let svc = service(&state, &user)?;
    let patient = audited(&state, &user, "CREATE", ENTITY, svc.create_patient(input), |p| {
        p.id.clone()
    })?;
    response_with_etag(StatusCode::CREATED, &patient, patient.meta.version)
}

/// Search by name substring or exact phone (GET /patients)
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PatientQuery>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let patients = audited(&state, &user, "SEARCH", ENTITY, svc.search_patients(&query), |p| {
        format!("{} results", p.len())
    })?;
    json_response(StatusCode::OK, &patients)
}

/// Read a patient (GET /patients/{id})
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let patient = audited(&state, &user, "READ", ENTITY, svc.get_patient(&id), |p| p.id.clone())?;
    response_with_etag(StatusCode::OK, &patient, patient.meta.version)
}

/// Replace a patient's details (PUT /patients/{id})
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let input: PatientInput = read_json(request).await?;
    let svc = service(&state, &user)?;
    let patient = audited(&state, &user, "UPDATE", ENTITY, svc.update_patient(&id, input), |p| {
        p.id.clone()
    })?;
    response_with_etag(StatusCode::OK, &patient, patient.meta.version)
}

/// JSON Patch a patient (PATCH /patients/{id})
pub async fn patch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let patch: json_patch::Patch = read_json(request).await?;
    let svc = service(&state, &user)?;
    let patient = audited(&state, &user, "PATCH", ENTITY, svc.patch_patient(&id, &patch), |p| {
        p.id.clone()
    })?;
    response_with_etag(StatusCode::OK, &patient, patient.meta.version)
}

/// Archive a patient (DELETE /patients/{id})
pub async fn archive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let patient = audited(&state, &user, "ARCHIVE", ENTITY, svc.archive_patient(&id), |p| {
        p.id.clone()
    })?;
    response_with_etag(StatusCode::OK, &patient, patient.meta.version)
}

/// All stored versions (GET /patients/{id}/history)
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let versions = audited(&state, &user, "HISTORY", ENTITY, svc.patient_history(&id), |_| {
        id.clone()
    })?;
    json_response(StatusCode::OK, &versions)
}

/// Prescriptions written for a patient (GET /patients/{id}/prescriptions)
pub async fn prescriptions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let list = svc
        .patient_prescriptions(&id)
        .map_err(|e| error_response(&e))?;
    json_response(StatusCode::OK, &list)
}
