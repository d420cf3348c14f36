use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clinic_core::ErrorBody;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::{audit, config::ServerConfig, handlers::ApiError, AppState};

/// Header naming the tenant when authentication is disabled
pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Receptionist,
}

/// Authenticated caller, always bound to exactly one tenant
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub auth_type: AuthType,
    pub tenant_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthType {
    ApiKey,
    BasicAuth,
    /// Auth disabled; tenant taken from the request header
    TenantHeader,
}

impl AuthUser {
    pub fn new(user_id: String, auth_type: AuthType, tenant_id: String, role: Role) -> Self {
        Self {
            user_id,
            auth_type,
            tenant_id,
            role,
        }
    }

    /// Fail with 403 unless the caller holds one of `roles`
    pub fn require_role(&self, roles: &[Role]) -> Result<(), ApiError> {
        if roles.contains(&self.role) {
            return Ok(());
        }
        tracing::warn!(
            user_id = %self.user_id,
            tenant_id = %self.tenant_id,
            role = ?self.role,
            "Role not permitted"
        );
        let body = ErrorBody::forbidden(format!(
            "role {:?} may not perform this operation",
            self.role
        ));
        Err((StatusCode::FORBIDDEN, axum::Json(json!(body))))
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, axum::Json(ErrorBody::unauthorized(message))).into_response()
}

/// Authentication and tenant resolution middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    // Allow public endpoints without a tenant
    let path = request.uri().path();
    if path == "/health" || path == "/metadata" {
        return Ok(next.run(request).await);
    }

    let auth_user = resolve_user(&state.config, request.headers())?;

    let client_ip = request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    audit::log_auth_attempt(&client_ip, Some(&auth_user.user_id), true);

    // Insert auth user into request extensions
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

/// Map request credentials (or the tenant header) to a caller
#[allow(clippy::result_large_err)]
pub fn resolve_user(config: &ServerConfig, headers: &HeaderMap) -> Result<AuthUser, Response> {
    if !config.auth.enabled {
        let Some(tenant_id) = headers.get(TENANT_HEADER).and_then(|h| h.to_str().ok()) else {
            return Err(unauthorized("Missing X-Tenant-Id header"));
        };
        if config.tenant(tenant_id).is_none() {
            return Err(unauthorized("Unknown tenant"));
        }
        return Ok(AuthUser::new(
            "anonymous".to_string(),
            AuthType::TenantHeader,
            tenant_id.to_string(),
            Role::Admin,
        ));
    }

    let Some(auth_header) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return Err(unauthorized("Missing Authorization header"));
    };

    let auth_user = if auth_header.starts_with("Bearer ") {
        authenticate_bearer(config, auth_header)?
    } else if auth_header.starts_with("Basic ") {
        authenticate_basic(config, auth_header)?
    } else {
        return Err(unauthorized(
            "Invalid Authorization header format. Use 'Bearer <api-key>' or 'Basic <credentials>'",
        ));
    };

    // Credentials may outlive a tenant removed from config
    if config.tenant(&auth_user.tenant_id).is_none() {
        return Err(unauthorized("Unknown tenant"));
    }
    Ok(auth_user)
}

/// Authenticate using an API key
#[allow(clippy::result_large_err)]
fn authenticate_bearer(config: &ServerConfig, auth_header: &str) -> Result<AuthUser, Response> {
    let token = auth_header.trim_start_matches("Bearer ").trim();

    config
        .auth
        .api_keys
        .iter()
        .find(|k| k.key == token)
        .map(|k| AuthUser::new(k.name.clone(), AuthType::ApiKey, k.tenant_id.clone(), k.role))
        .ok_or_else(|| {
            audit::log_auth_attempt("unknown", None, false);
            unauthorized("Invalid API key")
        })
}

/// Authenticate using Basic authentication
#[allow(clippy::result_large_err)]
fn authenticate_basic(config: &ServerConfig, auth_header: &str) -> Result<AuthUser, Response> {
    let credentials = auth_header.trim_start_matches("Basic ").trim();

    // Decode base64 credentials
    let decoded = STANDARD
        .decode(credentials)
        .map_err(|_| unauthorized("Invalid Base64 encoding in Basic auth"))?;

    let credentials_str = String::from_utf8(decoded)
        .map_err(|_| unauthorized("Invalid UTF-8 in Basic auth credentials"))?;

    // Split username:password
    let Some((username, password)) = credentials_str.split_once(':') else {
        return Err(unauthorized(
            "Invalid Basic auth format. Expected 'username:password'",
        ));
    };

    // Validate credentials
    for user in &config.auth.basic_auth {
        if user.username == username && user.password == password {
            return Ok(AuthUser::new(
                username.to_string(),
                AuthType::BasicAuth,
                user.tenant_id.clone(),
                user.role,
            ));
        }
    }

    audit::log_auth_attempt("unknown", Some(username), false);
    Err(unauthorized("Invalid username or password"))
}
