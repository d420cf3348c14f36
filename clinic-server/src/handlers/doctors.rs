use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use clinic_core::DoctorInput;
use serde::Deserialize;
use std::sync::Arc;

use super::{
    audited, current_user, error_response, json_response, read_json, response_with_etag, service,
    ApiResult,
};
use crate::auth::Role;
use crate::AppState;

const ENTITY: &str = "doctors";

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
}

/// Add a doctor (POST /doctors)
pub async fn create(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Admin])?;
    let input: DoctorInput = read_json(request).await?;
    let svc = service(&state, &user)?;
    let doctor = audited(&state, &user, "CREATE", ENTITY, svc.create_doctor(input), |d| {
        d.id.clone()
    })?;
    response_with_etag(StatusCode::CREATED, &doctor, doctor.meta.version)
}

/// List doctors (GET /doctors)
pub async fn list(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let doctors = svc.list_doctors().map_err(|e| error_response(&e))?;
    json_response(StatusCode::OK, &doctors)
}

/// Read a doctor (GET /doctors/{id})
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let doctor = svc.get_doctor(&id).map_err(|e| error_response(&e))?;
    response_with_etag(StatusCode::OK, &doctor, doctor.meta.version)
}

/// Update a doctor (PUT /doctors/{id})
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Admin])?;
    let input: DoctorInput = read_json(request).await?;
    let svc = service(&state, &user)?;
    let doctor = audited(&state, &user, "UPDATE", ENTITY, svc.update_doctor(&id, input), |d| {
        d.id.clone()
    })?;
    response_with_etag(StatusCode::OK, &doctor, doctor.meta.version)
}

/// Stop taking bookings (POST /doctors/{id}/deactivate)
pub async fn deactivate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Admin])?;
    let svc = service(&state, &user)?;
    let doctor = audited(&state, &user, "DEACTIVATE", ENTITY, svc.deactivate_doctor(&id), |d| {
        d.id.clone()
    })?;
    response_with_etag(StatusCode::OK, &doctor, doctor.meta.version)
}

/// Free slots on one day (GET /doctors/{id}/slots?date=)
pub async fn slots(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<SlotQuery>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let slots = svc
        .doctor_slots(&id, query.date)
        .map_err(|e| error_response(&e))?;
    let times: Vec<String> = slots.iter().map(|t| t.format("%H:%M").to_string()).collect();
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "doctor_id": id, "date": query.date, "slots": times }),
    )
}
