//! SQLite-based document storage
//!
//! Schema:
//!   - documents: Current version only (tenant_id, collection, id)
//!   - document_history: Every written version (tenant_id, collection, id, version)
//!   - sequences: Per-tenant counters for human-readable numbers
//!
//! Every query is scoped by tenant; a record of one tenant is invisible to
//! the others.

use crate::error::{Result, StoreError};
use clinic_core::Record;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// SQLite-based document store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

#[allow(clippy::result_large_err)]
impl SqliteStore {
    /// Open the store (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for read-write concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                tenant_id TEXT NOT NULL,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                version INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (tenant_id, collection, id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS document_history (
                tenant_id TEXT NOT NULL,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                version INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (tenant_id, collection, id, version)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sequences (
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(tenant_id, collection)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute multiple operations atomically within an SQLite transaction
    ///
    /// Any error returned by `f` rolls the whole transaction back. Writers
    /// are serialized on the connection mutex.
    pub fn in_transaction<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&TransactionOps<'_>) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction().map_err(StoreError::from)?;
        let ops = TransactionOps { conn: &tx };
        let result = f(&ops)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(result)
    }

    /// Get a record
    pub fn get<T: Record>(&self, tenant_id: &str, id: &str) -> Result<Option<T>> {
        self.in_transaction(|ops| ops.get(tenant_id, id))
    }

    /// Get a record or fail with NotFound
    pub fn require<T: Record>(&self, tenant_id: &str, id: &str) -> Result<T> {
        self.in_transaction(|ops| ops.require(tenant_id, id))
    }

    /// List a tenant's records of one collection in insertion order
    pub fn list<T: Record>(&self, tenant_id: &str) -> Result<Vec<T>> {
        self.in_transaction(|ops| ops.list(tenant_id))
    }

    /// List records whose top-level string fields equal the given values
    pub fn list_by<T: Record>(&self, tenant_id: &str, filters: &[(&str, &str)]) -> Result<Vec<T>> {
        self.in_transaction(|ops| ops.list_by(tenant_id, filters))
    }

    /// Every stored version of a record, oldest first
    pub fn history<T: Record>(&self, tenant_id: &str, id: &str) -> Result<Vec<T>> {
        self.in_transaction(|ops| ops.history(tenant_id, id))
    }

    /// Record counts per collection for one tenant
    pub fn count_by_collection(&self, tenant_id: &str) -> Result<Vec<(String, i64)>> {
        self.in_transaction(|ops| ops.count_by_collection(tenant_id))
    }
}

/// Operations available within a transaction
pub struct TransactionOps<'a> {
    conn: &'a Connection,
}

#[allow(clippy::result_large_err)]
impl<'a> TransactionOps<'a> {
    pub fn get<T: Record>(&self, tenant_id: &str, id: &str) -> Result<Option<T>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM documents WHERE tenant_id = ? AND collection = ? AND id = ?",
                params![tenant_id, T::COLLECTION, id],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| serde_json::from_str(&v).map_err(StoreError::from))
            .transpose()
    }

    pub fn require<T: Record>(&self, tenant_id: &str, id: &str) -> Result<T> {
        self.get(tenant_id, id)?.ok_or_else(|| StoreError::NotFound {
            collection: T::COLLECTION.to_string(),
            id: id.to_string(),
        })
    }

    /// Store a new record; its current meta version is written as-is
    pub fn insert<T: Record>(&self, record: &T) -> Result<()> {
        if self.stored_version::<T>(record.tenant_id(), record.id())?.is_some() {
            return Err(StoreError::AlreadyExists {
                collection: T::COLLECTION.to_string(),
                id: record.id().to_string(),
            });
        }
        self.write(record)
    }

    /// Store a new version of a loaded record
    ///
    /// Fails with VersionConflict when the stored version moved on since
    /// `record` was read. Bumps the record's version before writing.
    pub fn update<T: Record>(&self, record: &mut T, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let expected = record.meta().version;
        let found = self
            .stored_version::<T>(record.tenant_id(), record.id())?
            .ok_or_else(|| StoreError::NotFound {
                collection: T::COLLECTION.to_string(),
                id: record.id().to_string(),
            })?;
        if found != expected {
            return Err(StoreError::VersionConflict {
                collection: T::COLLECTION.to_string(),
                id: record.id().to_string(),
                expected,
                found,
            });
        }
        record.meta_mut().touch(now);
        self.write(record)
    }

    pub fn list<T: Record>(&self, tenant_id: &str) -> Result<Vec<T>> {
        self.list_by(tenant_id, &[])
    }

    pub fn list_by<T: Record>(&self, tenant_id: &str, filters: &[(&str, &str)]) -> Result<Vec<T>> {
        let mut sql =
            String::from("SELECT value FROM documents WHERE tenant_id = ?1 AND collection = ?2");
        let mut args: Vec<String> = vec![tenant_id.to_string(), T::COLLECTION.to_string()];
        for (field, value) in filters {
            sql.push_str(&format!(
                " AND json_extract(value, ?{}) = ?{}",
                args.len() + 1,
                args.len() + 2
            ));
            args.push(format!("$.{}", field));
            args.push(value.to_string());
        }
        sql.push_str(" ORDER BY rowid");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }

    pub fn history<T: Record>(&self, tenant_id: &str, id: &str) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(
            "SELECT value FROM document_history
             WHERE tenant_id = ? AND collection = ? AND id = ?
             ORDER BY version",
        )?;
        let rows = stmt.query_map(params![tenant_id, T::COLLECTION, id], |row| {
            row.get::<_, String>(0)
        })?;

        let mut versions = Vec::new();
        for row in rows {
            versions.push(serde_json::from_str(&row?)?);
        }
        Ok(versions)
    }

    /// Increment and return a per-tenant counter, starting at 1
    pub fn next_sequence(&self, tenant_id: &str, name: &str) -> Result<u64> {
        let value: i64 = self.conn.query_row(
            "INSERT INTO sequences (tenant_id, name, value) VALUES (?, ?, 1)
             ON CONFLICT (tenant_id, name) DO UPDATE SET value = value + 1
             RETURNING value",
            params![tenant_id, name],
            |row| row.get(0),
        )?;
        Ok(value as u64)
    }

    pub fn count_by_collection(&self, tenant_id: &str) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, COUNT(*) FROM documents WHERE tenant_id = ?
             GROUP BY collection ORDER BY collection",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    fn stored_version<T: Record>(&self, tenant_id: &str, id: &str) -> Result<Option<u32>> {
        Ok(self
            .conn
            .query_row(
                "SELECT version FROM documents WHERE tenant_id = ? AND collection = ? AND id = ?",
                params![tenant_id, T::COLLECTION, id],
                |row| row.get::<_, u32>(0),
            )
            .optional()?)
    }

    fn write<T: Record>(&self, record: &T) -> Result<()> {
        let value = serde_json::to_string(record)?;
        let version = record.meta().version;

        // Upsert keeps the rowid, so list order stays insertion order
        self.conn.execute(
            "INSERT INTO documents (tenant_id, collection, id, version, value)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (tenant_id, collection, id)
             DO UPDATE SET version = excluded.version, value = excluded.value",
            params![record.tenant_id(), T::COLLECTION, record.id(), version, value],
        )?;
        self.conn.execute(
            "INSERT OR REPLACE INTO document_history (tenant_id, collection, id, version, value)
             VALUES (?, ?, ?, ?, ?)",
            params![record.tenant_id(), T::COLLECTION, record.id(), version, value],
        )?;
        Ok(())
    }
}
