//! clinic-server - Multi-tenant clinic management API
//!
//! Patients, appointments, doctor queues, prescriptions, invoices and
//! subscription billing over a SQLite document store.

pub mod audit;
pub mod auth;
pub mod config;
pub mod handlers;
pub mod services;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use clinic_core::{AuditSink, PhiCipher, Plan};
use clinic_store::SqliteStore;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

/// Application state
pub struct AppState {
    pub store: SqliteStore,
    pub audit: Arc<dyn AuditSink>,
    pub cipher: Arc<dyn PhiCipher>,
    pub config: config::ServerConfig,
    /// Billing plans with prices in minor units
    pub plans: Vec<Plan>,
}

impl AppState {
    pub fn new(
        store: SqliteStore,
        audit: Arc<dyn AuditSink>,
        cipher: Arc<dyn PhiCipher>,
        config: config::ServerConfig,
    ) -> Result<Self, String> {
        config.validate()?;
        let plans = config.billing.plans()?;
        Ok(Self {
            store,
            audit,
            cipher,
            config,
            plans,
        })
    }
}

/// Build the application router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::metadata::health_check))
        .route("/metadata", get(handlers::metadata::metadata))
        // Patients
        .route(
            "/patients",
            get(handlers::patients::search).post(handlers::patients::create),
        )
        .route(
            "/patients/{id}",
            get(handlers::patients::read)
                .put(handlers::patients::update)
                .patch(handlers::patients::patch)
                .delete(handlers::patients::archive),
        )
        .route("/patients/{id}/history", get(handlers::patients::history))
        .route(
            "/patients/{id}/prescriptions",
            get(handlers::patients::prescriptions),
        )
        // Doctors and their queues
        .route(
            "/doctors",
            get(handlers::doctors::list).post(handlers::doctors::create),
        )
        .route(
            "/doctors/{id}",
            get(handlers::doctors::read).put(handlers::doctors::update),
        )
        .route("/doctors/{id}/deactivate", post(handlers::doctors::deactivate))
        .route("/doctors/{id}/slots", get(handlers::doctors::slots))
        .route("/doctors/{id}/queue", get(handlers::queue::snapshot))
        .route("/doctors/{id}/queue/next", post(handlers::queue::call_next))
        // Appointments
        .route(
            "/appointments",
            get(handlers::appointments::list).post(handlers::appointments::book),
        )
        .route("/appointments/{id}", get(handlers::appointments::read))
        .route(
            "/appointments/{id}/reschedule",
            post(handlers::appointments::reschedule),
        )
        .route("/appointments/{id}/cancel", post(handlers::appointments::cancel))
        .route("/appointments/{id}/no-show", post(handlers::appointments::no_show))
        .route("/appointments/{id}/check-in", post(handlers::appointments::check_in))
        // Queue entries
        .route("/queue", post(handlers::queue::walk_in))
        .route("/queue/{id}", get(handlers::queue::read))
        .route("/queue/{id}/complete", post(handlers::queue::complete))
        .route("/queue/{id}/skip", post(handlers::queue::skip))
        .route("/queue/{id}/requeue", post(handlers::queue::requeue))
        .route("/queue/{id}/cancel", post(handlers::queue::cancel))
        .route("/queue/{id}/move", post(handlers::queue::move_entry))
        .route("/queue/{id}/priority", post(handlers::queue::change_priority))
        // Prescriptions
        .route("/prescriptions", post(handlers::prescriptions::create))
        .route(
            "/prescriptions/{id}",
            get(handlers::prescriptions::read).put(handlers::prescriptions::update),
        )
        .route(
            "/prescriptions/{id}/finalize",
            post(handlers::prescriptions::finalize),
        )
        .route("/prescriptions/{id}/cancel", post(handlers::prescriptions::cancel))
        // Invoices
        .route(
            "/invoices",
            get(handlers::invoices::list).post(handlers::invoices::create),
        )
        .route(
            "/invoices/{id}",
            get(handlers::invoices::read).put(handlers::invoices::update),
        )
        .route("/invoices/{id}/issue", post(handlers::invoices::issue))
        .route("/invoices/{id}/payments", post(handlers::invoices::record_payment))
        .route("/invoices/{id}/void", post(handlers::invoices::void))
        // Subscription billing
        .route(
            "/subscription",
            get(handlers::subscription::read).post(handlers::subscription::start_or_change),
        )
        .route(
            "/subscription/payments",
            post(handlers::subscription::record_payment),
        )
        .route("/subscription/cancel", post(handlers::subscription::cancel))
        // Middleware
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(state.config.server.body_limit_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        build_router(Arc::new(services::test_support::state()))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_needs_no_tenant() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_json_is_bad_request() {
        let response = app()
            .oneshot(
                Request::post("/doctors")
                    .header("x-tenant-id", "default")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "invalid");
    }

    #[tokio::test]
    async fn test_created_doctor_carries_etag() {
        let response = app()
            .oneshot(
                Request::post("/doctors")
                    .header("x-tenant-id", "default")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": "Dr. House", "consultation_fee": 2500}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["etag"], "W/\"1\"");
        let body = body_json(response).await;
        assert_eq!(body["name"], "Dr. House");
    }

    #[tokio::test]
    async fn test_unknown_record_is_not_found() {
        let response = app()
            .oneshot(
                Request::get("/invoices/missing")
                    .header("x-tenant-id", "default")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
