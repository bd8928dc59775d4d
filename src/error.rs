use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request-level error taxonomy. Everything here is recovered at the HTTP
/// boundary and turned into a JSON body; nothing is fatal to the process.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not connected to a cluster")]
    NotConnected,

    #[error("authentication required")]
    Unauthorized,

    #[error("admin privileges required")]
    Forbidden,

    /// The credential context could not be verified against the cluster.
    #[error("cluster connection failed: {0}")]
    Connection(String),

    /// The subprocess ran but exited nonzero in a path where that is not a
    /// normal user-visible outcome (e.g. the connect probe).
    #[error("command failed: {0}")]
    Execution(String),

    #[error("command timed out after {0} seconds")]
    Timeout(u64),

    #[error("audit write failed: {0}")]
    AuditWrite(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// Stable machine-readable tag for response bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotConnected => "not_connected",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Connection(_) => "connection",
            Self::Execution(_) => "execution",
            Self::Timeout(_) => "timeout",
            Self::AuditWrite(_) => "audit_write",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotConnected => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Connection(_) | Self::Execution(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::AuditWrite(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for PortalError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(format!("database error: {e}"))
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}
