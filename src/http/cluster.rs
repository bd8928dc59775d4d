use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{ActionContext, ActionResponse, AppState, ClientMeta, SessionAuth};
use crate::error::PortalError;
use crate::kube::context::{ClusterCredentials, ContextHandle};
use crate::session::ClusterSession;
use crate::store::audit::AuditStatus;
use crate::store::connections::ConnectionRecord;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub endpoint: String,
    pub alias: String,
    pub token: String,
}

/// Builds and verifies a credential context, then flips the session to
/// Connected. The verification probe is one read-only `get namespaces`
/// through the session's own kubeconfig artifact.
pub async fn connect(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ActionResponse>, PortalError> {
    let ctx = ActionContext {
        state: &state,
        auth: &auth,
        meta: &meta,
        action: "connect_cluster",
        resource_type: "cluster",
        resource_name: &req.alias,
        namespace: "system",
    };
    // The token never goes into the audit trail.
    let command = format!("connect {} at {}", req.alias, req.endpoint);

    let creds = match ClusterCredentials::new(&req.endpoint, &req.alias, &req.token) {
        Ok(c) => c,
        Err(e) => {
            ctx.reject(&req.alias, &command, &e.to_string());
            return Err(e);
        }
    };
    let handle = ContextHandle::materialize(&creds)?;

    let probe_args: Vec<String> = vec!["get".into(), "namespaces".into()];
    let result = match state
        .runner
        .run(&handle, &probe_args, state.config.command_timeout)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            ctx.fail(&creds.alias, &command, &e);
            return Err(e);
        }
    };

    if !result.success {
        ctx.fail(
            &creds.alias,
            &command,
            &PortalError::Connection(result.audit_output().trim().to_string()),
        );
        return Err(if result.timed_out {
            PortalError::Timeout(state.config.command_timeout.as_secs())
        } else {
            PortalError::Connection(result.stderr.trim().to_string())
        });
    }

    let cluster = ClusterSession {
        alias: creds.alias.clone(),
        endpoint: creds.endpoint.as_str().trim_end_matches('/').to_string(),
        context: Arc::new(handle),
        connected_at: Utc::now(),
    };
    if let Err(e) = state.sessions.connect(auth.token, cluster) {
        ctx.fail(&creds.alias, &command, &e);
        return Err(e);
    }
    // The connection history is best-effort; a write failure there must not
    // abort a connect that already succeeded or suppress its audit record.
    if let Err(e) = state
        .connections
        .record(auth.user.user_id, &creds.alias, creds.endpoint.as_str())
    {
        error!(alias = %creds.alias, "connection log write failed: {e}");
    }
    info!(alias = %creds.alias, user = %auth.user.username, "cluster connected");

    Ok(Json(ctx.finish(
        &creds.alias,
        &command,
        &result,
        format!("connected to cluster {}", creds.alias),
    )))
}

pub async fn disconnect(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
) -> Result<Json<ActionResponse>, PortalError> {
    let ctx = ActionContext {
        state: &state,
        auth: &auth,
        meta: &meta,
        action: "disconnect_cluster",
        resource_type: "cluster",
        resource_name: "session",
        namespace: "system",
    };
    match state.sessions.disconnect(auth.token)? {
        Some(cluster) => {
            let recorded = super::record_audit(
                &state,
                &crate::store::audit::NewAuditRecord {
                    user_id: Some(auth.user.user_id),
                    username: Some(&auth.user.username),
                    action: "disconnect_cluster",
                    resource_type: "cluster",
                    resource_name: &cluster.alias,
                    namespace: "system",
                    cluster_alias: &cluster.alias,
                    status: AuditStatus::Success,
                    command: &format!("disconnect from {}", cluster.alias),
                    output: "cluster disconnected",
                    source_ip: meta.source_ip(),
                    user_agent: meta.user_agent(),
                },
            );
            Ok(Json(ActionResponse {
                success: true,
                message: format!("disconnected from cluster {}", cluster.alias),
                output: String::new(),
                timed_out: false,
                audit_recorded: recorded,
            }))
        }
        None => {
            ctx.reject("none", "disconnect", "not connected to a cluster");
            Err(PortalError::NotConnected)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub endpoint: String,
}

/// Pings `<endpoint>/healthz` on the connected cluster:
/// - "healthy"      — responded in < 1.5 s
/// - "slow"         — responded in 1.5 – 5 s
/// - "unreachable"  — timed out or connection refused
///
/// Accepts invalid / self-signed TLS certs because many clusters use them.
pub async fn health(
    State(state): State<AppState>,
    auth: SessionAuth,
) -> Result<Json<HealthResponse>, PortalError> {
    let cluster = state.sessions.cluster(auth.token)?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| PortalError::Internal(format!("http client: {e}")))?;

    let url = format!("{}/healthz", cluster.endpoint.trim_end_matches('/'));
    let started = Instant::now();
    let status = match client.get(&url).send().await {
        Ok(_) => {
            if started.elapsed() > Duration::from_millis(1500) {
                "slow"
            } else {
                "healthy"
            }
        }
        Err(_) => "unreachable",
    };
    Ok(Json(HealthResponse {
        status,
        endpoint: cluster.endpoint,
    }))
}

/// The user's recent successful connections (without tokens), for the
/// connect form's quick-pick list.
pub async fn recent(
    State(state): State<AppState>,
    auth: SessionAuth,
) -> Result<Json<Vec<ConnectionRecord>>, PortalError> {
    let rows = state.connections.recent_for_user(auth.user.user_id, 10)?;
    Ok(Json(rows))
}
