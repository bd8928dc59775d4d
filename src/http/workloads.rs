//! Cluster-mutating endpoints. Every handler follows the same pipeline:
//! session gate → validate → execute → audit → respond. Validation and gate
//! rejections are audited before any subprocess is reached.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use super::{ActionContext, ActionResponse, AppState, ClientMeta, SessionAuth};
use crate::error::PortalError;
use crate::kube::command;
use crate::kube::manifest::{self, DeploymentParams, ServiceParams};

pub async fn create_deployment(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
    Json(params): Json<DeploymentParams>,
) -> Result<Json<ActionResponse>, PortalError> {
    let ctx = ActionContext {
        state: &state,
        auth: &auth,
        meta: &meta,
        action: "create_deployment",
        resource_type: "deployment",
        resource_name: &params.name,
        namespace: &params.namespace,
    };
    let summary = format!(
        "create deployment {} image={} replicas={}",
        params.name, params.image, params.replicas
    );
    let cluster = ctx.require_cluster(&summary)?;

    let manifest_yaml = match manifest::generate_deployment(&params) {
        Ok(m) => m,
        Err(e) => {
            ctx.reject(&cluster.alias, &summary, &e.to_string());
            return Err(e);
        }
    };

    let result = match state
        .runner
        .apply(
            &cluster.context,
            &manifest_yaml,
            Some(&params.namespace),
            state.config.apply_timeout,
        )
        .await
    {
        Ok(r) => r,
        Err(e) => {
            ctx.fail(&cluster.alias, &manifest_yaml, &e);
            return Err(e);
        }
    };

    Ok(Json(ctx.finish(
        &cluster.alias,
        &manifest_yaml,
        &result,
        format!("deployment {} created", params.name),
    )))
}

pub async fn create_service(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
    Json(params): Json<ServiceParams>,
) -> Result<Json<ActionResponse>, PortalError> {
    let ctx = ActionContext {
        state: &state,
        auth: &auth,
        meta: &meta,
        action: "create_service",
        resource_type: "service",
        resource_name: &params.name,
        namespace: &params.namespace,
    };
    let summary = format!(
        "create service {} port={} target={} type={}",
        params.name, params.port, params.target_port, params.service_type
    );
    let cluster = ctx.require_cluster(&summary)?;

    let manifest_yaml = match manifest::generate_service(&params) {
        Ok(m) => m,
        Err(e) => {
            ctx.reject(&cluster.alias, &summary, &e.to_string());
            return Err(e);
        }
    };

    let result = match state
        .runner
        .apply(
            &cluster.context,
            &manifest_yaml,
            Some(&params.namespace),
            state.config.apply_timeout,
        )
        .await
    {
        Ok(r) => r,
        Err(e) => {
            ctx.fail(&cluster.alias, &manifest_yaml, &e);
            return Err(e);
        }
    };

    Ok(Json(ctx.finish(
        &cluster.alias,
        &manifest_yaml,
        &result,
        format!("service {} created", params.name),
    )))
}

#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub resource_type: String,
    pub name: String,
    pub replicas: u32,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

pub async fn scale_workload(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
    Json(req): Json<ScaleRequest>,
) -> Result<Json<ActionResponse>, PortalError> {
    let ctx = ActionContext {
        state: &state,
        auth: &auth,
        meta: &meta,
        action: "scale_workload",
        resource_type: &req.resource_type,
        resource_name: &req.name,
        namespace: &req.namespace,
    };
    let summary = format!(
        "scale {}/{} to {} replicas",
        req.resource_type, req.name, req.replicas
    );
    let cluster = ctx.require_cluster(&summary)?;

    let args = match command::scale(&req.resource_type, &req.name, req.replicas, &req.namespace) {
        Ok(a) => a,
        Err(e) => {
            ctx.reject(&cluster.alias, &summary, &e.to_string());
            return Err(e);
        }
    };

    let result = match state
        .runner
        .run(&cluster.context, &args, state.config.command_timeout)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            ctx.fail(&cluster.alias, &summary, &e);
            return Err(e);
        }
    };

    Ok(Json(ctx.finish(
        &cluster.alias,
        &summary,
        &result,
        format!("{} scaled to {} replicas", req.name, req.replicas),
    )))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub resource_type: String,
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

pub async fn delete_resource(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<ActionResponse>, PortalError> {
    let ctx = ActionContext {
        state: &state,
        auth: &auth,
        meta: &meta,
        action: "delete_resource",
        resource_type: &req.resource_type,
        resource_name: &req.name,
        namespace: &req.namespace,
    };
    let summary = format!("delete {} {}", req.resource_type, req.name);
    let cluster = ctx.require_cluster(&summary)?;

    let args = match command::delete(&req.resource_type, &req.name, &req.namespace) {
        Ok(a) => a,
        Err(e) => {
            ctx.reject(&cluster.alias, &summary, &e.to_string());
            return Err(e);
        }
    };

    let result = match state
        .runner
        .run(&cluster.context, &args, state.config.command_timeout)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            ctx.fail(&cluster.alias, &summary, &e);
            return Err(e);
        }
    };

    Ok(Json(ctx.finish(
        &cluster.alias,
        &summary,
        &result,
        format!("{} {} deleted", req.resource_type, req.name),
    )))
}

#[derive(Debug, Deserialize)]
pub struct CustomCommandRequest {
    pub command: String,
}

pub async fn execute_custom(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
    Json(req): Json<CustomCommandRequest>,
) -> Result<Json<ActionResponse>, PortalError> {
    let ctx = ActionContext {
        state: &state,
        auth: &auth,
        meta: &meta,
        action: "execute_custom",
        resource_type: "command",
        resource_name: "custom_kubectl",
        namespace: "system",
    };
    let cluster = ctx.require_cluster(&req.command)?;

    // The raw string is audited verbatim even when rejected, so the trail
    // shows exactly what was attempted.
    let args = match command::parse_custom_command(&req.command) {
        Ok(a) => a,
        Err(e) => {
            ctx.reject(&cluster.alias, &req.command, &e.to_string());
            return Err(e);
        }
    };

    let result = match state
        .runner
        .run(&cluster.context, &args, state.config.command_timeout)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            ctx.fail(&cluster.alias, &req.command, &e);
            return Err(e);
        }
    };

    Ok(Json(ctx.finish(
        &cluster.alias,
        &req.command,
        &result,
        "command executed".to_string(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct ManifestRequest {
    pub manifest: String,
    pub namespace: Option<String>,
}

pub async fn execute_manifest(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
    Json(req): Json<ManifestRequest>,
) -> Result<Json<ActionResponse>, PortalError> {
    let ctx = ActionContext {
        state: &state,
        auth: &auth,
        meta: &meta,
        action: "execute_yaml",
        resource_type: "manifest",
        resource_name: "custom_yaml",
        namespace: req.namespace.as_deref().unwrap_or("default"),
    };
    let cluster = ctx.require_cluster(&req.manifest)?;

    if let Err(e) = validate_manifest_body(&req.manifest, req.namespace.as_deref()) {
        ctx.reject(&cluster.alias, &req.manifest, &e.to_string());
        return Err(e);
    }

    let result = match state
        .runner
        .apply(
            &cluster.context,
            &req.manifest,
            req.namespace.as_deref(),
            state.config.apply_timeout,
        )
        .await
    {
        Ok(r) => r,
        Err(e) => {
            ctx.fail(&cluster.alias, &req.manifest, &e);
            return Err(e);
        }
    };

    Ok(Json(ctx.finish(
        &cluster.alias,
        &req.manifest,
        &result,
        "manifest applied".to_string(),
    )))
}

/// A manifest must be parseable YAML before it is streamed anywhere.
/// Multi-document bodies are allowed, matching `kubectl apply` semantics.
fn validate_manifest_body(body: &str, namespace: Option<&str>) -> Result<(), PortalError> {
    if body.trim().is_empty() {
        return Err(PortalError::Validation("manifest body is empty".into()));
    }
    if let Some(ns) = namespace {
        crate::kube::validate_dns_label(ns, "namespace")?;
    }
    use serde::de::Deserialize as _;
    for doc in serde_yaml::Deserializer::from_str(body) {
        serde_yaml::Value::deserialize(doc)
            .map_err(|e| PortalError::Validation(format!("invalid YAML manifest: {e}")))?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ResourceQuery {
    pub resource_type: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Quick read-only listing: `kubectl get <kind> -o json`.
pub async fn get_resources(
    State(state): State<AppState>,
    auth: SessionAuth,
    meta: ClientMeta,
    Json(req): Json<ResourceQuery>,
) -> Result<Json<ActionResponse>, PortalError> {
    let ctx = ActionContext {
        state: &state,
        auth: &auth,
        meta: &meta,
        action: "get_resources",
        resource_type: &req.resource_type,
        resource_name: "list",
        namespace: &req.namespace,
    };
    let summary = format!("get {} -n {}", req.resource_type, req.namespace);
    let cluster = ctx.require_cluster(&summary)?;

    let args = match command::get_resources(&req.resource_type, &req.namespace) {
        Ok(a) => a,
        Err(e) => {
            ctx.reject(&cluster.alias, &summary, &e.to_string());
            return Err(e);
        }
    };

    let result = match state
        .runner
        .run(&cluster.context, &args, state.config.command_timeout)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            ctx.fail(&cluster.alias, &summary, &e);
            return Err(e);
        }
    };

    Ok(Json(ctx.finish(
        &cluster.alias,
        &summary,
        &result,
        format!("{} listed", req.resource_type),
    )))
}
