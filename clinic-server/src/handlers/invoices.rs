use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
};
use clinic_core::InvoiceView;
use std::sync::Arc;

use super::{
    audited, current_user, error_response, json_response, read_json, response_with_etag, service,
    ApiResult,
};
use crate::services::invoices::{InvoiceQuery, InvoiceRequest, InvoiceUpdate, PaymentRequest};
use crate::AppState;

const ENTITY: &str = "invoices";

fn invoice_response(status: StatusCode, view: &InvoiceView) -> ApiResult {
    response_with_etag(status, view, view.invoice.meta.version)
}

/// Create a draft (POST /invoices)
pub async fn create(State(state): State<Arc<AppState>>, request: Request) -> ApiResult {
    let user = current_user(&request)?;
    let body: InvoiceRequest = read_json(request).await?;
    let svc = service(&state, &user)?;
    let view = audited(&state, &user, "CREATE", ENTITY, svc.create_invoice(body), |v| {
        v.invoice.id.clone()
    })?;
    invoice_response(StatusCode::CREATED, &view)
}

/// GET /invoices?status=&patient_id=
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InvoiceQuery>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let invoices = svc.list_invoices(&query).map_err(|e| error_response(&e))?;
    json_response(StatusCode::OK, &invoices)
}

/// GET /invoices/{id}
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let view = svc.get_invoice(&id).map_err(|e| error_response(&e))?;
    invoice_response(StatusCode::OK, &view)
}

/// Replace a draft's lines (PUT /invoices/{id})
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let body: InvoiceUpdate = read_json(request).await?;
    let svc = service(&state, &user)?;
    let view = audited(&state, &user, "UPDATE", ENTITY, svc.update_invoice(&id, body), |v| {
        v.invoice.id.clone()
    })?;
    invoice_response(StatusCode::OK, &view)
}

/// POST /invoices/{id}/issue
pub async fn issue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let view = audited(&state, &user, "ISSUE", ENTITY, svc.issue_invoice(&id), |v| {
        v.invoice.id.clone()
    })?;
    invoice_response(StatusCode::OK, &view)
}

/// POST /invoices/{id}/payments
pub async fn record_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let body: PaymentRequest = read_json(request).await?;
    let svc = service(&state, &user)?;
    let view = audited(
        &state,
        &user,
        "PAYMENT",
        ENTITY,
        svc.record_invoice_payment(&id, body),
        |v| v.invoice.id.clone(),
    )?;
    invoice_response(StatusCode::OK, &view)
}

/// POST /invoices/{id}/void
pub async fn void(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    let user = current_user(&request)?;
    let svc = service(&state, &user)?;
    let view = audited(&state, &user, "VOID", ENTITY, svc.void_invoice(&id), |v| {
        v.invoice.id.clone()
    })?;
    invoice_response(StatusCode::OK, &view)
}
