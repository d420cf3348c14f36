//! SQLite-based audit log
//!
//! Separate file for easy management and rotation.

use crate::error::Result;
use clinic_core::{AuditEvent, AuditSink, ClinicError};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// One stored audit row
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub actor: String,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub outcome: String,
    pub detail: Option<String>,
}

/// Audit log
pub struct AuditLog {
    conn: Mutex<Connection>,
}

#[allow(clippy::result_large_err)]
impl AuditLog {
    /// Open the audit log (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let audit = Self {
            conn: Mutex::new(conn),
        };
        audit.initialize()?;
        Ok(audit)
    }

    /// Initialize tables
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                tenant_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                entity TEXT NOT NULL,
                entity_id TEXT,
                outcome TEXT NOT NULL,
                detail TEXT
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_tenant ON audit_log(tenant_id, timestamp)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(tenant_id, entity, entity_id)",
            [],
        )?;

        Ok(())
    }

    /// Record an audit log entry
    pub fn log(&self, event: &AuditEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            r#"
            INSERT INTO audit_log
            (tenant_id, actor, action, entity, entity_id, outcome, detail)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                event.tenant_id,
                event.actor,
                event.action,
                event.entity,
                event.entity_id,
                event.outcome.as_str(),
                event.detail,
            ],
        )?;
        Ok(())
    }

    /// Get a tenant's recent audit log entries, most recent first
    pub fn recent_entries(&self, tenant_id: &str, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, actor, action, entity, entity_id, outcome, detail
            FROM audit_log
            WHERE tenant_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![tenant_id, limit as i64], |row| {
            Ok(AuditEntry {
                timestamp: row.get(0)?,
                actor: row.get(1)?,
                action: row.get(2)?,
                entity: row.get(3)?,
                entity_id: row.get(4)?,
                outcome: row.get(5)?,
                detail: row.get(6)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: &AuditEvent) -> clinic_core::Result<()> {
        self.log(event).map_err(ClinicError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_log() {
        let audit = AuditLog::open(":memory:").unwrap();

        audit
            .record(&AuditEvent::success("t1", "admin", "create", "patients", Some("123")))
            .unwrap();

        audit
            .record(&AuditEvent::failure(
                "t1",
                "user1",
                "void",
                "invoices",
                Some("999"),
                "invoice has payments",
            ))
            .unwrap();

        // Verify logs were recorded
        let count: i32 = audit
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .unwrap();

        assert_eq!(count, 2);
    }

    #[test]
    fn test_recent_entries_scoped_by_tenant() {
        let audit = AuditLog::open(":memory:").unwrap();

        audit.log(&AuditEvent::success("t1", "a", "create", "patients", Some("p1"))).unwrap();
        audit.log(&AuditEvent::success("t2", "b", "create", "patients", Some("p9"))).unwrap();
        audit
            .log(&AuditEvent::failure("t1", "a", "update", "patients", Some("p2"), "not found"))
            .unwrap();

        let entries = audit.recent_entries("t1", 10).unwrap();
        assert_eq!(entries.len(), 2);
        // Most recent first
        assert_eq!(entries[0].action, "update");
        assert_eq!(entries[0].outcome, "failure");
        assert_eq!(entries[0].detail.as_deref(), Some("not found"));
        assert_eq!(entries[1].entity_id.as_deref(), Some("p1"));
    }
}
