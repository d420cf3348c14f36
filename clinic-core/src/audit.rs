//! Audit events emitted by every mutation
//!
//! The sink is opaque to the domain; the store crate provides a SQLite one.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub tenant_id: String,
    pub actor: String,
    /// e.g. `create`, `check_in`, `finalize`
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn success(
        tenant_id: &str,
        actor: &str,
        action: &str,
        entity: &str,
        entity_id: Option<&str>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.map(str::to_string),
            outcome: AuditOutcome::Success,
            detail: None,
        }
    }

    pub fn failure(
        tenant_id: &str,
        actor: &str,
        action: &str,
        entity: &str,
        entity_id: Option<&str>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            outcome: AuditOutcome::Failure,
            detail: Some(detail.into()),
            ..Self::success(tenant_id, actor, action, entity, entity_id)
        }
    }
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> crate::Result<()>;
}
