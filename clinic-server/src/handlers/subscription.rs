use axum::{
    extract::{Request, State},
    http::StatusCode,
};
use std::sync::Arc;

use super::{
    audited, current_user, error_response, json_response, read_json, read_json_or_default,
    service, ApiResult,
};
use crate::auth::Role;
use crate::services::subscriptions::{
    CancelSubscription, StartSubscription, SubscriptionPaymentRequest,
};
use crate::AppState;

const ENTITY: &str = "subscriptions";

/// Plan, status and usage (GET /subscription)
pub async fn read(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let view = svc.subscription_view().map_err(|e| error_response(&e))?;
    json_response(StatusCode::OK, &view)
}

/// Subscribe or switch plans (POST /subscription)
pub async fn start_or_change(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Admin])?;
    let body: StartSubscription = read_json(request).await?;
    let svc = service(&state, &user)?;
    let tenant_id = user.tenant_id.clone();
    let view = audited(
        &state,
        &user,
        "CHANGE_PLAN",
        ENTITY,
        svc.start_or_change_subscription(body),
        |_| tenant_id,
    )?;
    json_response(StatusCode::OK, &view)
}

/// Record a settled payment (POST /subscription/payments)
pub async fn record_payment(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Admin])?;
    let body: SubscriptionPaymentRequest = read_json(request).await?;
    let svc = service(&state, &user)?;
    let tenant_id = user.tenant_id.clone();
    let view = audited(
        &state,
        &user,
        "PAYMENT",
        ENTITY,
        svc.record_subscription_payment(body),
        |_| tenant_id,
    )?;
    json_response(StatusCode::OK, &view)
}

/// POST /subscription/cancel
pub async fn cancel(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    user.require_role(&[Role::Admin])?;
    let body: CancelSubscription = read_json_or_default(request).await?;
    let svc = service(&state, &user)?;
    let tenant_id = user.tenant_id.clone();
    let view = audited(&state, &user, "CANCEL", ENTITY, svc.cancel_subscription(body), |_| {
        tenant_id
    })?;
    json_response(StatusCode::OK, &view)
}
