use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use clinic_core::{
    Appointment, Doctor, Invoice, Prescription, QueueEntry, Record, SealedPatient, Subscription,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppState;

/// Collections served by the API
pub const COLLECTIONS: &[&str] = &[
    SealedPatient::COLLECTION,
    Doctor::COLLECTION,
    Appointment::COLLECTION,
    QueueEntry::COLLECTION,
    Prescription::COLLECTION,
    Invoice::COLLECTION,
    Subscription::COLLECTION,
];

/// Health check (GET /health)
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Server description (GET /metadata)
pub async fn metadata(State(state): State<Arc<AppState>>) -> Json<Value> {
    let plans: Vec<Value> = state
        .plans
        .iter()
        .map(|p| {
            json!({
                "code": p.code,
                "name": p.name,
                "interval": p.interval,
                "max_doctors": p.max_doctors,
                "max_patients": p.max_patients,
            })
        })
        .collect();

    let mut auth_schemes = Vec::new();
    if state.config.auth.enabled {
        if !state.config.auth.api_keys.is_empty() {
            auth_schemes.push("bearer");
        }
        if !state.config.auth.basic_auth.is_empty() {
            auth_schemes.push("basic");
        }
    } else {
        auth_schemes.push("tenant-header");
    }

    Json(json!({
        "software": {
            "name": "clinic-server",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "collections": COLLECTIONS,
        "plans": plans,
        "default_plan": state.config.billing.default_plan,
        "auth": auth_schemes,
    }))
}
