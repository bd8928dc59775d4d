use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::PortalError;

/// Runtime configuration, sourced from the process environment.
///
/// `SESSION_SECRET` and `DATABASE_URL` have no defaults: a production
/// deployment must supply both explicitly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Path to the sqlite database file (a `sqlite://` prefix is accepted),
    /// or `:memory:`.
    pub database_url: String,
    /// Keys the MAC on issued session tokens; a cookie signed under a
    /// different secret fails verification.
    pub session_secret: String,
    /// Budget for plain kubectl invocations.
    pub command_timeout: Duration,
    /// Budget for manifest application, which routinely takes longer.
    pub apply_timeout: Duration,
    /// Upper bound for command/output snapshots stored per audit record.
    pub audit_snapshot_max_bytes: usize,
    pub audit_page_size: u32,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn required(name: &str) -> Result<String, PortalError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(PortalError::Internal(format!(
            "required environment variable {name} is not set"
        ))),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, PortalError> {
        let bind_addr = env::var("PORTAL_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:5000".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| PortalError::Internal(format!("invalid PORTAL_BIND_ADDR: {e}")))?;

        Ok(Self {
            bind_addr,
            database_url: required("DATABASE_URL")?,
            session_secret: required("SESSION_SECRET")?,
            command_timeout: Duration::from_secs(env_u64("PORTAL_COMMAND_TIMEOUT_SECS", 30)),
            apply_timeout: Duration::from_secs(env_u64("PORTAL_APPLY_TIMEOUT_SECS", 60)),
            audit_snapshot_max_bytes: env_usize("PORTAL_AUDIT_SNAPSHOT_MAX_BYTES", 8 * 1024),
            audit_page_size: 50,
        })
    }

    /// Strips an optional `sqlite://` scheme so operators can pass either a
    /// bare path or a URL-style value.
    pub fn database_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite://")
            .unwrap_or(&self.database_url)
    }
}
