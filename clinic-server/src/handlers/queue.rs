use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use clinic_core::Result;
use serde::Deserialize;
use std::sync::Arc;

use super::{
    audited, current_user, error_response, json_response, read_json, service, ApiResult,
};
use crate::auth::AuthUser;
use crate::services::queue::{MoveRequest, PriorityRequest, QueueEntryView, WalkInRequest};
use crate::AppState;

const ENTITY: &str = "queue_entries";

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    pub date: Option<NaiveDate>,
}

fn entry_response(
    state: &AppState,
    user: &AuthUser,
    action: &str,
    result: Result<QueueEntryView>,
) -> ApiResult {
    let view = audited(state, user, action, ENTITY, result, |v| v.entry.id.clone())?;
    json_response(StatusCode::OK, &view)
}

/// Doctor's line for a day, today by default (GET /doctors/{id}/queue)
pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<String>,
    Query(query): Query<SnapshotQuery>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let snapshot = svc
        .queue_snapshot(&doctor_id, query.date)
        .map_err(|e| error_response(&e))?;
    json_response(StatusCode::OK, &snapshot)
}

/// Call the next patient (POST /doctors/{id}/queue/next)
pub async fn call_next(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    entry_response(&state, &user, "CALL_NEXT", svc.call_next(&doctor_id))
}

/// Queue a walk-in patient (POST /queue)
pub async fn walk_in(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    let body: WalkInRequest = read_json(request).await?;
    let svc = service(&state, &user)?;
    let view = audited(&state, &user, "WALK_IN", ENTITY, svc.walk_in(body), |v| {
        v.entry.id.clone()
    })?;
    json_response(StatusCode::CREATED, &view)
}

/// Entry with its wait estimate (GET /queue/{id})
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let view = svc.get_queue_entry(&id).map_err(|e| error_response(&e))?;
    json_response(StatusCode::OK, &view)
}

/// POST /queue/{id}/complete
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    entry_response(&state, &user, "COMPLETE", svc.complete_entry(&id))
}

/// POST /queue/{id}/skip
pub async fn skip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    entry_response(&state, &user, "SKIP", svc.skip_entry(&id))
}

/// POST /queue/{id}/requeue
pub async fn requeue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    entry_response(&state, &user, "REQUEUE", svc.requeue_entry(&id))
}

/// POST /queue/{id}/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    entry_response(&state, &user, "CANCEL", svc.cancel_entry(&id))
}

/// POST /queue/{id}/move
pub async fn move_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let body: MoveRequest = read_json(request).await?;
    let svc = service(&state, &user)?;
    entry_response(&state, &user, "MOVE", svc.move_entry(&id, body))
}

/// POST /queue/{id}/priority
pub async fn change_priority(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let body: PriorityRequest = read_json(request).await?;
    let svc = service(&state, &user)?;
    entry_response(&state, &user, "PRIORITY", svc.change_entry_priority(&id, body))
}
