pub mod audit;
pub mod connections;
pub mod users;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::PortalError;

/// Portal schema. Applied as an idempotent batch at startup; the audit table
/// is append-only by construction — nothing in this crate issues UPDATE or
/// DELETE against it.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    is_admin      INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    last_login    TEXT
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id            TEXT PRIMARY KEY,
    user_id       INTEGER REFERENCES users(id),
    username      TEXT,
    action        TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_name TEXT NOT NULL,
    namespace     TEXT NOT NULL,
    cluster_alias TEXT NOT NULL,
    status        TEXT NOT NULL,
    command       TEXT NOT NULL,
    output        TEXT NOT NULL,
    source_ip     TEXT,
    user_agent    TEXT,
    timestamp     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_logs_user_id   ON audit_logs(user_id);
CREATE INDEX IF NOT EXISTS idx_audit_logs_status    ON audit_logs(status);
CREATE INDEX IF NOT EXISTS idx_audit_logs_cluster   ON audit_logs(cluster_alias);

CREATE TABLE IF NOT EXISTS cluster_connections (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          INTEGER NOT NULL REFERENCES users(id),
    cluster_alias    TEXT NOT NULL,
    cluster_endpoint TEXT NOT NULL,
    connected_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cluster_connections_user ON cluster_connections(user_id);
"#;

/// Shared sqlite handle. Every write the portal performs is a single-row
/// insert, so one connection behind a mutex is all the locking discipline
/// the storage layer needs.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, PortalError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, PortalError> {
        Self::open(":memory:")
    }

    pub(crate) fn with<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, PortalError> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| PortalError::Internal("database lock poisoned".into()))?;
        f(&guard).map_err(PortalError::from)
    }
}

pub(crate) fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
