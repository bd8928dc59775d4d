//! Append-only audit trail. One row per attempted user action, written
//! synchronously after the action resolves; the store exposes no update or
//! delete surface.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::ToSql;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{parse_timestamp, Database};
use crate::error::PortalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
    /// Rejected before any subprocess started (validation or gate failure).
    Rejected,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, PortalError> {
        match raw {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            other => Err(PortalError::Internal(format!(
                "unknown audit status {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: String,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_name: String,
    pub namespace: String,
    pub cluster_alias: String,
    pub status: AuditStatus,
    pub command: String,
    pub output: String,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Everything a handler knows about an attempted action at record time.
#[derive(Debug, Clone)]
pub struct NewAuditRecord<'a> {
    pub user_id: Option<i64>,
    pub username: Option<&'a str>,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_name: &'a str,
    pub namespace: &'a str,
    pub cluster_alias: &'a str,
    pub status: AuditStatus,
    /// Raw command string or manifest body, truncated on write.
    pub command: &'a str,
    /// Captured output snapshot, truncated on write.
    pub output: &'a str,
    pub source_ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub username: Option<String>,
    pub action: Option<String>,
    pub cluster: Option<String>,
    pub status: Option<AuditStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct AuditStats {
    pub total_actions: u64,
    pub failed_actions: u64,
    pub rejected_actions: u64,
    pub success_rate: f64,
    pub unique_users: u64,
    pub unique_clusters: u64,
}

/// Truncates to a byte budget on a char boundary, marking the cut so a
/// reviewer can tell a short output from a clipped one.
fn truncate_snapshot(raw: &str, max_bytes: usize) -> String {
    if raw.len() <= max_bytes {
        return raw.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !raw.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated {} bytes]", &raw[..cut], raw.len() - cut)
}

#[derive(Clone)]
pub struct AuditStore {
    db: Database,
    snapshot_max_bytes: usize,
    page_size: u32,
}

impl AuditStore {
    pub fn new(db: Database, snapshot_max_bytes: usize, page_size: u32) -> Self {
        Self {
            db,
            snapshot_max_bytes,
            page_size,
        }
    }

    /// Appends one record. A failure here is an `AuditWrite` error, kept
    /// distinct so callers can escalate it without masking the action's own
    /// outcome.
    pub fn record(&self, new: &NewAuditRecord<'_>) -> Result<AuditRecord, PortalError> {
        self.insert(new)
            .map_err(|e| PortalError::AuditWrite(e.to_string()))
    }

    fn insert(&self, new: &NewAuditRecord<'_>) -> Result<AuditRecord, PortalError> {
        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            username: new.username.map(str::to_string),
            action: new.action.to_string(),
            resource_type: new.resource_type.to_string(),
            resource_name: new.resource_name.to_string(),
            namespace: new.namespace.to_string(),
            cluster_alias: new.cluster_alias.to_string(),
            status: new.status,
            command: truncate_snapshot(new.command, self.snapshot_max_bytes),
            output: truncate_snapshot(new.output, self.snapshot_max_bytes),
            source_ip: new.source_ip.map(str::to_string),
            user_agent: new.user_agent.map(str::to_string),
            timestamp: Utc::now(),
        };
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO audit_logs (id, user_id, username, action, resource_type, \
                 resource_name, namespace, cluster_alias, status, command, output, \
                 source_ip, user_agent, timestamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                rusqlite::params![
                    record.id,
                    record.user_id,
                    record.username,
                    record.action,
                    record.resource_type,
                    record.resource_name,
                    record.namespace,
                    record.cluster_alias,
                    record.status.as_str(),
                    record.command,
                    record.output,
                    record.source_ip,
                    record.user_agent,
                    record.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Filtered, newest-first listing with fixed-size pages. `page` is
    /// 1-based.
    pub fn list(&self, filter: &AuditFilter, page: u32) -> Result<AuditPage, PortalError> {
        let page = page.max(1);
        let mut where_sql = String::from(" WHERE 1=1");
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(u) = &filter.username {
            where_sql.push_str(" AND username LIKE ?");
            params.push(Box::new(format!("%{u}%")));
        }
        if let Some(a) = &filter.action {
            where_sql.push_str(" AND action LIKE ?");
            params.push(Box::new(format!("%{a}%")));
        }
        if let Some(c) = &filter.cluster {
            where_sql.push_str(" AND cluster_alias LIKE ?");
            params.push(Box::new(format!("%{c}%")));
        }
        if let Some(s) = filter.status {
            where_sql.push_str(" AND status = ?");
            params.push(Box::new(s.as_str().to_string()));
        }
        if let Some(d) = filter.start_date {
            where_sql.push_str(" AND timestamp >= ?");
            params.push(Box::new(format!("{d}T00:00:00+00:00")));
        }
        if let Some(d) = filter.end_date {
            where_sql.push_str(" AND timestamp <= ?");
            params.push(Box::new(format!("{d}T23:59:59.999999+00:00")));
        }

        let page_size = self.page_size;
        self.db.with(|conn| {
            let total: u64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM audit_logs{where_sql}"),
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                |row| row.get(0),
            )?;

            let offset = u64::from(page - 1) * u64::from(page_size);
            let sql = format!(
                "SELECT id, user_id, username, action, resource_type, resource_name, \
                 namespace, cluster_alias, status, command, output, source_ip, \
                 user_agent, timestamp \
                 FROM audit_logs{where_sql} \
                 ORDER BY timestamp DESC LIMIT {page_size} OFFSET {offset}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                |row| {
                    let status_raw: String = row.get(8)?;
                    let ts_raw: String = row.get(13)?;
                    Ok(AuditRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        action: row.get(3)?,
                        resource_type: row.get(4)?,
                        resource_name: row.get(5)?,
                        namespace: row.get(6)?,
                        cluster_alias: row.get(7)?,
                        status: AuditStatus::parse(&status_raw).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                8,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                        command: row.get(9)?,
                        output: row.get(10)?,
                        source_ip: row.get(11)?,
                        user_agent: row.get(12)?,
                        timestamp: parse_timestamp(&ts_raw, 13)?,
                    })
                },
            )?;
            let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(AuditPage {
                records,
                page,
                page_size,
                total,
            })
        })
    }

    /// Summary block for the audit dashboard.
    pub fn stats(&self) -> Result<AuditStats, PortalError> {
        self.db.with(|conn| {
            let total: u64 =
                conn.query_row("SELECT COUNT(*) FROM audit_logs", [], |row| row.get(0))?;
            let failed: u64 = conn.query_row(
                "SELECT COUNT(*) FROM audit_logs WHERE status = 'failed'",
                [],
                |row| row.get(0),
            )?;
            let rejected: u64 = conn.query_row(
                "SELECT COUNT(*) FROM audit_logs WHERE status = 'rejected'",
                [],
                |row| row.get(0),
            )?;
            let unique_users: u64 = conn.query_row(
                "SELECT COUNT(DISTINCT user_id) FROM audit_logs WHERE user_id IS NOT NULL",
                [],
                |row| row.get(0),
            )?;
            let unique_clusters: u64 = conn.query_row(
                "SELECT COUNT(DISTINCT cluster_alias) FROM audit_logs",
                [],
                |row| row.get(0),
            )?;
            let success_rate = if total > 0 {
                let ok = total - failed - rejected;
                (ok as f64 / total as f64 * 1000.0).round() / 10.0
            } else {
                0.0
            };
            Ok(AuditStats {
                total_actions: total,
                failed_actions: failed,
                rejected_actions: rejected,
                success_rate,
                unique_users,
                unique_clusters,
            })
        })
    }
}
