use clinic_core::{AuditEvent, AuditSink};
use std::sync::Arc;

use crate::auth::AuthUser;

/// Log a successful mutation or PHI read
pub fn log_operation_success(
    sink: &Arc<dyn AuditSink>,
    user: &AuthUser,
    action: &str,
    entity: &str,
    entity_id: &str,
) {
    tracing::info!(
        tenant_id = %user.tenant_id,
        user_id = %user.user_id,
        action = action,
        entity = entity,
        entity_id = entity_id,
        status = "success",
        "Audit: {} {}/{}",
        action,
        entity,
        entity_id
    );

    let event = AuditEvent::success(
        &user.tenant_id,
        &user.user_id,
        action,
        entity,
        Some(entity_id),
    );
    write_in_background(sink, event);
}

/// Log a failed operation
pub fn log_operation_error(
    sink: &Arc<dyn AuditSink>,
    user: &AuthUser,
    action: &str,
    entity: &str,
    entity_id: Option<&str>,
    error: &str,
) {
    tracing::warn!(
        tenant_id = %user.tenant_id,
        user_id = %user.user_id,
        action = action,
        entity = entity,
        entity_id = entity_id.unwrap_or("N/A"),
        status = "error",
        error = error,
        "Audit: {} {} failed: {}",
        action,
        entity,
        error
    );

    let event = AuditEvent::failure(
        &user.tenant_id,
        &user.user_id,
        action,
        entity,
        entity_id,
        error,
    );
    write_in_background(sink, event);
}

/// Log an authentication attempt
pub fn log_auth_attempt(client_ip: &str, user_id: Option<&str>, success: bool) {
    if success {
        tracing::debug!(
            user_id = user_id.unwrap_or("unknown"),
            client_ip = %client_ip,
            status = "success",
            "Audit: Authentication successful"
        );
    } else {
        tracing::warn!(
            user_id = user_id.unwrap_or("unknown"),
            client_ip = %client_ip,
            status = "failed",
            "Audit: Authentication failed"
        );
    }
}

/// SQLite writes block, so they run off the async workers
fn write_in_background(sink: &Arc<dyn AuditSink>, event: AuditEvent) {
    let sink = Arc::clone(sink);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = sink.record(&event) {
            tracing::error!("Failed to write audit log to database: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthType, Role};
    use clinic_core::AuditOutcome;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<AuditEvent>>);

    impl AuditSink for MemorySink {
        fn record(&self, event: &AuditEvent) -> clinic_core::Result<()> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn user() -> AuthUser {
        AuthUser::new("alice".into(), AuthType::ApiKey, "north".into(), Role::Admin)
    }

    #[tokio::test]
    async fn test_events_reach_the_sink() {
        let memory = Arc::new(MemorySink::default());
        let sink: Arc<dyn AuditSink> = memory.clone();

        log_operation_success(&sink, &user(), "create", "patients", "p1");
        log_operation_error(&sink, &user(), "void", "invoices", Some("i1"), "has payments");

        // Background writes land shortly after
        for _ in 0..50 {
            if memory.0.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let events = memory.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        let failure = events.iter().find(|e| e.action == "void").unwrap();
        assert_eq!(failure.outcome, AuditOutcome::Failure);
        assert_eq!(failure.tenant_id, "north");
        assert_eq!(failure.actor, "alice");
    }
}
