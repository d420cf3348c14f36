//! End-to-end integration test
//!
//! Drives a visit over HTTP:
//! doctor + patient -> booking -> check-in -> consultation -> prescription -> invoice -> payment

use chrono::Utc;
use clinic_core::{PlaintextCipher, TenantSettings};
use clinic_server::{
    build_router,
    config::{ServerConfig, TenantConfig},
    AppState,
};
use clinic_store::{AuditLog, SqliteStore};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;

/// Start a test server on a random port, returns (base_url, _temp_dir)
async fn start_test_server() -> (String, TempDir) {
    let temp_dir = TempDir::new().unwrap();

    let store = SqliteStore::open(temp_dir.path().join("clinic.sqlite")).unwrap();
    let audit = AuditLog::open(temp_dir.path().join("audit.sqlite")).unwrap();

    let mut config = ServerConfig::default();
    config.tenants.push(TenantConfig {
        id: "other".to_string(),
        name: "Other Clinic".to_string(),
        settings: TenantSettings::default(),
    });

    let state = AppState::new(
        store,
        Arc::new(audit),
        Arc::new(PlaintextCipher::new("e2e-index-key").unwrap()),
        config,
    )
    .unwrap();
    let app = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{}", addr), temp_dir)
}

struct Client {
    base_url: String,
    tenant: &'static str,
    http: reqwest::Client,
}

impl Client {
    fn new(base_url: &str, tenant: &'static str) -> Self {
        Self {
            base_url: base_url.to_string(),
            tenant,
            http: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("X-Tenant-Id", self.tenant)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("X-Tenant-Id", self.tenant)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

async fn create_doctor(client: &Client) -> String {
    let (status, doctor) = client
        .post(
            "/doctors",
            json!({"name": "Dr. Grey", "specialization": "General", "consultation_fee": 5000}),
        )
        .await;
    assert_eq!(status, 201, "doctor create failed: {}", doctor);
    doctor["id"].as_str().unwrap().to_string()
}

async fn create_patient(client: &Client) -> String {
    let (status, patient) = client
        .post(
            "/patients",
            json!({"first_name": "Jane", "last_name": "Doe", "gender": "female"}),
        )
        .await;
    assert_eq!(status, 201, "patient create failed: {}", patient);
    patient["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_and_metadata() {
    let (base_url, _dir) = start_test_server().await;
    let client = Client::new(&base_url, "default");

    let resp = reqwest::get(format!("{}/health", base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let (status, meta) = client.get("/metadata").await;
    assert_eq!(status, 200);
    assert_eq!(meta["default_plan"], "free");
    assert!(
        meta["collections"]
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c == "appointments")
    );
}

#[tokio::test]
async fn test_missing_tenant_header_is_rejected() {
    let (base_url, _dir) = start_test_server().await;

    let resp = reqwest::Client::new()
        .get(format!("{}/patients", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = reqwest::Client::new()
        .get(format!("{}/patients", base_url))
        .header("X-Tenant-Id", "nobody")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_full_visit_flow() {
    let (base_url, _dir) = start_test_server().await;
    let client = Client::new(&base_url, "default");
    let today = Utc::now().date_naive().to_string();

    let doctor_id = create_doctor(&client).await;
    let patient_id = create_patient(&client).await;

    // Book and check in
    let (status, appointment) = client
        .post(
            "/appointments",
            json!({
                "patient_id": patient_id,
                "doctor_id": doctor_id,
                "date": today,
                "start_time": "10:00:00",
                "reason": "checkup"
            }),
        )
        .await;
    assert_eq!(status, 201, "booking failed: {}", appointment);
    assert_eq!(appointment["status"], "scheduled");
    let appointment_id = appointment["id"].as_str().unwrap().to_string();

    let (status, entry) = client
        .post(&format!("/appointments/{}/check-in", appointment_id), json!({}))
        .await;
    assert_eq!(status, 201, "check-in failed: {}", entry);
    assert_eq!(entry["token_number"], 1);
    assert_eq!(entry["status"], "waiting");

    let (status, queue) = client.get(&format!("/doctors/{}/queue", doctor_id)).await;
    assert_eq!(status, 200);
    assert_eq!(queue["waiting"].as_array().map(|e| e.len()), Some(1));
    assert_eq!(queue["waiting"][0]["estimated_wait_minutes"], 0);

    // Consultation
    let (status, called) = client
        .post(&format!("/doctors/{}/queue/next", doctor_id), json!({}))
        .await;
    assert_eq!(status, 200, "call next failed: {}", called);
    assert_eq!(called["status"], "in_consultation");

    let (_, appointment) = client.get(&format!("/appointments/{}", appointment_id)).await;
    assert_eq!(appointment["status"], "in_progress");

    // Prescription and invoice
    let (status, prescription) = client
        .post(
            "/prescriptions",
            json!({
                "patient_id": patient_id,
                "doctor_id": doctor_id,
                "appointment_id": appointment_id,
                "diagnosis": "Seasonal allergy",
                "items": [
                    {"kind": "drug", "name": "Cetirizine 10mg", "dosage": "1 tab",
                     "frequency": "daily", "duration_days": 10, "unit_price": 1250}
                ]
            }),
        )
        .await;
    assert_eq!(status, 201, "prescription failed: {}", prescription);
    let prescription_id = prescription["id"].as_str().unwrap().to_string();

    let (status, finalized) = client
        .post(&format!("/prescriptions/{}/finalize", prescription_id), json!({}))
        .await;
    assert_eq!(status, 200, "finalize failed: {}", finalized);
    assert_eq!(finalized["prescription"]["status"], "finalized");
    let invoice = &finalized["invoice"];
    assert_eq!(invoice["status"], "draft");
    assert_eq!(invoice["totals"]["grand_total"], 6250);
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let (_, appointment) = client.get(&format!("/appointments/{}", appointment_id)).await;
    assert_eq!(appointment["status"], "completed");

    // Issue and settle in two payments
    let (status, issued) = client
        .post(&format!("/invoices/{}/issue", invoice_id), json!({}))
        .await;
    assert_eq!(status, 200, "issue failed: {}", issued);
    assert_eq!(issued["status"], "issued");

    let (status, partial) = client
        .post(
            &format!("/invoices/{}/payments", invoice_id),
            json!({"amount": "50.00", "method": "cash"}),
        )
        .await;
    assert_eq!(status, 200, "payment failed: {}", partial);
    assert_eq!(partial["status"], "partially_paid");
    assert_eq!(partial["totals"]["balance_due"], 1250);

    let (status, overpaid) = client
        .post(
            &format!("/invoices/{}/payments", invoice_id),
            json!({"amount": "20.00", "method": "cash"}),
        )
        .await;
    assert_eq!(status, 400, "overpayment should be rejected: {}", overpaid);

    let (_, paid) = client
        .post(
            &format!("/invoices/{}/payments", invoice_id),
            json!({"amount": "12.50", "method": "card"}),
        )
        .await;
    assert_eq!(paid["status"], "paid");
    assert_eq!(paid["display"]["balance_due"], "0.00");

    let (status, list) = client
        .get(&format!("/patients/{}/prescriptions", patient_id))
        .await;
    assert_eq!(status, 200);
    assert_eq!(list.as_array().map(|l| l.len()), Some(1));

    let (status, subscription) = client.get("/subscription").await;
    assert_eq!(status, 200);
    assert_eq!(subscription["plan"]["code"], "free");
    assert_eq!(subscription["allows_writes"], true);
    assert_eq!(subscription["usage"]["doctors"], 1);
    assert_eq!(subscription["usage"]["patients"], 1);
}

#[tokio::test]
async fn test_double_booking_conflicts() {
    let (base_url, _dir) = start_test_server().await;
    let client = Client::new(&base_url, "default");

    let doctor_id = create_doctor(&client).await;
    let patient_id = create_patient(&client).await;
    let booking = json!({
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "date": "2030-01-15",
        "start_time": "11:00:00",
        "duration_minutes": 30
    });

    let (status, _) = client.post("/appointments", booking.clone()).await;
    assert_eq!(status, 201);

    let mut overlapping = booking.clone();
    overlapping["start_time"] = json!("11:15:00");
    let (status, body) = client.post("/appointments", overlapping).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "conflict");

    let mut after_hours = booking;
    after_hours["start_time"] = json!("16:50:00");
    let (status, _) = client.post("/appointments", after_hours).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let (base_url, _dir) = start_test_server().await;
    let home = Client::new(&base_url, "default");
    let other = Client::new(&base_url, "other");

    let patient_id = create_patient(&home).await;

    let (status, _) = home.get(&format!("/patients/{}", patient_id)).await;
    assert_eq!(status, 200);

    let (status, body) = other.get(&format!("/patients/{}", patient_id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not-found");

    let (_, listed) = other.get("/patients").await;
    assert_eq!(listed.as_array().map(|l| l.len()), Some(0));
}

#[tokio::test]
async fn test_walk_in_queue_ordering() {
    let (base_url, _dir) = start_test_server().await;
    let client = Client::new(&base_url, "default");

    let doctor_id = create_doctor(&client).await;
    let first = create_patient(&client).await;
    let second = create_patient(&client).await;

    let (status, a) = client
        .post("/queue", json!({"patient_id": first, "doctor_id": doctor_id}))
        .await;
    assert_eq!(status, 201, "walk-in failed: {}", a);
    let (_, b) = client
        .post(
            "/queue",
            json!({"patient_id": second, "doctor_id": doctor_id, "priority": "urgent"}),
        )
        .await;
    assert_eq!(b["token_number"], 2);

    // Urgent entries are called first
    let (_, called) = client
        .post(&format!("/doctors/{}/queue/next", doctor_id), json!({}))
        .await;
    assert_eq!(called["patient_id"], second.as_str());

    let (status, _) = client
        .post(&format!("/doctors/{}/queue/next", doctor_id), json!({}))
        .await;
    assert_eq!(status, 409);
}
