pub mod audit;
pub mod auth;
pub mod cluster;
pub mod workloads;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::error;
use uuid::Uuid;

use crate::auth::PasswordVerifier;
use crate::config::AppConfig;
use crate::error::PortalError;
use crate::kube::executor::CommandRunner;
use crate::session::{ClusterSession, SessionRegistry, SessionUser};
use crate::store::audit::{AuditStatus, AuditStore, NewAuditRecord};
use crate::store::connections::ConnectionLog;
use crate::store::users::UserStore;
use crate::store::Database;

pub const SESSION_COOKIE: &str = "portal_session";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: UserStore,
    pub audit: AuditStore,
    pub connections: ConnectionLog,
    pub sessions: SessionRegistry,
    pub runner: Arc<dyn CommandRunner>,
    pub verifier: Arc<dyn PasswordVerifier>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Database,
        runner: Arc<dyn CommandRunner>,
        verifier: Arc<dyn PasswordVerifier>,
    ) -> Self {
        let audit = AuditStore::new(
            db.clone(),
            config.audit_snapshot_max_bytes,
            config.audit_page_size,
        );
        Self {
            config: Arc::new(config),
            users: UserStore::new(db.clone()),
            audit,
            connections: ConnectionLog::new(db),
            sessions: SessionRegistry::new(),
            runner,
            verifier,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .route("/api/logout", post(auth::logout))
        .route("/api/cluster/connect", post(cluster::connect))
        .route("/api/cluster/disconnect", post(cluster::disconnect))
        .route("/api/cluster/health", get(cluster::health))
        .route("/api/cluster/recent", get(cluster::recent))
        .route("/api/deployments", post(workloads::create_deployment))
        .route("/api/services", post(workloads::create_service))
        .route("/api/workloads/scale", post(workloads::scale_workload))
        .route("/api/workloads/delete", post(workloads::delete_resource))
        .route("/api/command", post(workloads::execute_custom))
        .route("/api/manifest", post(workloads::execute_manifest))
        .route("/api/resources", post(workloads::get_resources))
        .route("/api/audit", get(audit::list))
        .route("/api/audit/stats", get(audit::stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── extractors ────────────────────────────────────────────────────────────────

/// Resolves the session token (cookie or bearer header) to a live session.
#[derive(Debug, Clone)]
pub struct SessionAuth {
    pub token: Uuid,
    pub user: SessionUser,
}

/// Issues the wire form of a session token: `<uuid>.<mac>`, where the MAC is
/// keyed by the configured session secret. A forged or tampered credential
/// fails verification before any registry lookup.
pub(crate) fn sign_token(secret: &str, token: Uuid) -> String {
    let mac = crate::auth::sha256_hex(format!("{secret}.{token}").as_bytes());
    format!("{token}.{mac}")
}

fn verify_token(secret: &str, raw: &str) -> Option<Uuid> {
    let (id, _) = raw.split_once('.')?;
    let token: Uuid = id.parse().ok()?;
    if sign_token(secret, token) == raw {
        Some(token)
    } else {
        None
    }
}

fn token_from_parts(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

impl FromRequestParts<AppState> for SessionAuth {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = token_from_parts(parts).ok_or(PortalError::Unauthorized)?;
        let token = verify_token(&state.config.session_secret, &raw)
            .ok_or(PortalError::Unauthorized)?;
        let user = state
            .sessions
            .user(token)?
            .ok_or(PortalError::Unauthorized)?;
        Ok(Self { token, user })
    }
}

/// Request provenance for the audit trail. Best-effort: a missing header is
/// recorded as NULL, never an error.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    pub fn source_ip(&self) -> Option<&str> {
        self.source_ip.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        // Behind the reverse proxy the first X-Forwarded-For entry is the
        // real client.
        let source_ip = header("x-forwarded-for")
            .map(|v| v.split(',').next().unwrap_or("").trim().to_string())
            .filter(|v| !v.is_empty());
        Ok(Self {
            source_ip,
            user_agent: header("user-agent"),
        })
    }
}

// ── shared handler plumbing ───────────────────────────────────────────────────

/// Uniform response for every cluster-mutating endpoint.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    pub output: String,
    pub timed_out: bool,
    /// False when the action completed but its audit write failed. The
    /// failure is escalated in the server log either way.
    pub audit_recorded: bool,
}

/// Appends an audit record, escalating (but not propagating) a write failure:
/// the user still gets the action's own outcome.
pub(crate) fn record_audit(state: &AppState, new: &NewAuditRecord<'_>) -> bool {
    match state.audit.record(new) {
        Ok(_) => true,
        Err(e) => {
            error!(
                action = new.action,
                user = ?new.username,
                "audit write failed: {e}"
            );
            false
        }
    }
}

/// Per-action context threaded through the gate/validate/execute/audit
/// pipeline so every audit record carries the same provenance fields.
pub(crate) struct ActionContext<'a> {
    pub state: &'a AppState,
    pub auth: &'a SessionAuth,
    pub meta: &'a ClientMeta,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_name: &'a str,
    pub namespace: &'a str,
}

impl<'a> ActionContext<'a> {
    fn audit(&self, cluster_alias: &str, status: AuditStatus, command: &str, output: &str) -> bool {
        record_audit(
            self.state,
            &NewAuditRecord {
                user_id: Some(self.auth.user.user_id),
                username: Some(&self.auth.user.username),
                action: self.action,
                resource_type: self.resource_type,
                resource_name: self.resource_name,
                namespace: self.namespace,
                cluster_alias,
                status,
                command,
                output,
                source_ip: self.meta.source_ip(),
                user_agent: self.meta.user_agent(),
            },
        )
    }

    /// The session gate. From Disconnected this audits the rejected attempt
    /// and fails fast; no subprocess is ever reached.
    pub fn require_cluster(&self, command: &str) -> Result<ClusterSession, PortalError> {
        match self.state.sessions.cluster(self.auth.token) {
            Ok(cluster) => Ok(cluster),
            Err(e @ PortalError::NotConnected) => {
                self.audit("none", AuditStatus::Rejected, command, "not connected to a cluster");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Records a validation rejection (input never reached the executor).
    pub fn reject(&self, cluster_alias: &str, command: &str, reason: &str) {
        self.audit(cluster_alias, AuditStatus::Rejected, command, reason);
    }

    /// Records an execution outcome and shapes the response envelope.
    pub fn finish(
        &self,
        cluster_alias: &str,
        command: &str,
        result: &crate::kube::executor::ExecutionResult,
        success_message: String,
    ) -> ActionResponse {
        let status = if result.success {
            AuditStatus::Success
        } else {
            AuditStatus::Failed
        };
        let audit_recorded = self.audit(cluster_alias, status, command, result.audit_output());
        let message = if result.success {
            success_message
        } else if result.timed_out {
            format!("{} timed out", self.action)
        } else {
            format!("{} failed: {}", self.action, result.stderr.trim())
        };
        ActionResponse {
            success: result.success,
            message,
            output: result.audit_output().to_string(),
            timed_out: result.timed_out,
            audit_recorded,
        }
    }

    /// Records an execution-path error (spawn failure and the like) before
    /// the error propagates to the response layer.
    pub fn fail(&self, cluster_alias: &str, command: &str, error: &PortalError) {
        self.audit(cluster_alias, AuditStatus::Failed, command, &error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_tokens_round_trip() {
        let token = Uuid::new_v4();
        let signed = sign_token("secret", token);
        assert_eq!(verify_token("secret", &signed), Some(token));
    }

    #[test]
    fn tampered_or_unsigned_tokens_fail_verification() {
        let token = Uuid::new_v4();
        let signed = sign_token("secret", token);

        // Wrong key.
        assert_eq!(verify_token("other-secret", &signed), None);
        // Flipped signature byte ('x' is never a hex digit).
        let tampered = format!("{}x", &signed[..signed.len() - 1]);
        assert_eq!(verify_token("secret", &tampered), None);
        // Bare uuid with no signature at all.
        assert_eq!(verify_token("secret", &token.to_string()), None);
        assert_eq!(verify_token("secret", "not-a-token"), None);
    }
}
