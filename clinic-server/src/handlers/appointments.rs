use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
};
use clinic_core::{Appointment, AppointmentRequest};
use std::sync::Arc;

use super::{
    audited, current_user, error_response, json_response, read_json, read_json_or_default,
    response_with_etag, service, ApiResult,
};
use crate::services::appointments::{
    AppointmentQuery, CancelRequest, CheckInRequest, RescheduleRequest,
};
use crate::AppState;

const ENTITY: &str = "appointments";

fn appointment_response(status: StatusCode, appointment: &Appointment) -> ApiResult {
    response_with_etag(status, appointment, appointment.meta.version)
}

/// Book a slot (POST /appointments)
pub async fn book(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    let booking: AppointmentRequest = read_json(request).await?;
    let svc = service(&state, &user)?;
    let appointment = audited(&state, &user, "BOOK", ENTITY, svc.book_appointment(booking), |a| {
        a.id.clone()
    })?;
    appointment_response(StatusCode::CREATED, &appointment)
}

/// List appointments (GET /appointments?date=&doctor_id=&status=)
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AppointmentQuery>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let appointments = svc
        .list_appointments(&query)
        .map_err(|e| error_response(&e))?;
    json_response(StatusCode::OK, &appointments)
}

/// Read an appointment (GET /appointments/{id})
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let appointment = svc.get_appointment(&id).map_err(|e| error_response(&e))?;
    appointment_response(StatusCode::OK, &appointment)
}

/// Move to another slot (POST /appointments/{id}/reschedule)
pub async fn reschedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let body: RescheduleRequest = read_json(request).await?;
    let svc = service(&state, &user)?;
    let appointment = audited(
        &state,
        &user,
        "RESCHEDULE",
        ENTITY,
        svc.reschedule_appointment(&id, body),
        |a| a.id.clone(),
    )?;
    appointment_response(StatusCode::OK, &appointment)
}

/// Cancel (POST /appointments/{id}/cancel)
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let body: CancelRequest = read_json_or_default(request).await?;
    let svc = service(&state, &user)?;
    let appointment = audited(&state, &user, "CANCEL", ENTITY, svc.cancel_appointment(&id, body), |a| {
        a.id.clone()
    })?;
    appointment_response(StatusCode::OK, &appointment)
}

/// Mark as missed (POST /appointments/{id}/no-show)
pub async fn no_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let appointment = audited(&state, &user, "NO_SHOW", ENTITY, svc.mark_no_show(&id), |a| {
        a.id.clone()
    })?;
    appointment_response(StatusCode::OK, &appointment)
}

/// Check in and join the doctor's queue (POST /appointments/{id}/check-in)
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let body: CheckInRequest = read_json_or_default(request).await?;
    let svc = service(&state, &user)?;
    let entry = audited(&state, &user, "CHECK_IN", ENTITY, svc.check_in(&id, body), |_| {
        id.clone()
    })?;
    json_response(StatusCode::CREATED, &entry)
}
