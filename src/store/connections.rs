use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{parse_timestamp, Database};
use crate::error::PortalError;

/// Durable log of successful cluster connections, one row per connect. The
/// bearer token is deliberately absent — only the session holds it, and only
/// for the session's lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecord {
    pub id: i64,
    pub user_id: i64,
    pub cluster_alias: String,
    pub cluster_endpoint: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ConnectionLog {
    db: Database,
}

impl ConnectionLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn record(
        &self,
        user_id: i64,
        cluster_alias: &str,
        cluster_endpoint: &str,
    ) -> Result<(), PortalError> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO cluster_connections (user_id, cluster_alias, cluster_endpoint, connected_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    user_id,
                    cluster_alias,
                    cluster_endpoint,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    /// Most recent connections for one user, newest first.
    pub fn recent_for_user(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Vec<ConnectionRecord>, PortalError> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, cluster_alias, cluster_endpoint, connected_at \
                 FROM cluster_connections WHERE user_id = ?1 \
                 ORDER BY connected_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![user_id, limit], |row| {
                let ts_raw: String = row.get(4)?;
                Ok(ConnectionRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    cluster_alias: row.get(2)?,
                    cluster_endpoint: row.get(3)?,
                    connected_at: parse_timestamp(&ts_raw, 4)?,
                })
            })?;
            rows.collect()
        })
    }
}
