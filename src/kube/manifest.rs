//! Deterministic manifest rendering. Fields are validated before any document
//! is built; identical input always yields byte-identical YAML, so audit
//! snapshots are reproducible.

use serde::Deserialize;
use serde_json::json;

use super::validate_dns_label;
use crate::error::PortalError;

const MAX_REPLICAS: u32 = 500;

fn default_replicas() -> u32 {
    1
}

fn default_port() -> u32 {
    80
}

fn default_namespace() -> String {
    "default".to_string()
}

fn validate_port(port: u32, what: &str) -> Result<(), PortalError> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(PortalError::Validation(format!(
            "{what} must be in 1–65535, got {port}"
        )))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentParams {
    pub name: String,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default = "default_port")]
    pub port: u32,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl DeploymentParams {
    fn validate(&self) -> Result<(), PortalError> {
        validate_dns_label(&self.name, "deployment name")?;
        validate_dns_label(&self.namespace, "namespace")?;
        let image = self.image.trim();
        if image.is_empty() {
            return Err(PortalError::Validation("container image is empty".into()));
        }
        if image.chars().any(char::is_whitespace) {
            return Err(PortalError::Validation(format!(
                "container image must not contain whitespace: {image:?}"
            )));
        }
        if self.replicas == 0 || self.replicas > MAX_REPLICAS {
            return Err(PortalError::Validation(format!(
                "replica count must be in 1–{MAX_REPLICAS}, got {}",
                self.replicas
            )));
        }
        validate_port(self.port, "container port")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceParams {
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u32,
    #[serde(default = "default_port")]
    pub target_port: u32,
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

impl ServiceParams {
    fn validate(&self) -> Result<(), PortalError> {
        validate_dns_label(&self.name, "service name")?;
        validate_dns_label(&self.namespace, "namespace")?;
        if !matches!(
            self.service_type.as_str(),
            "ClusterIP" | "NodePort" | "LoadBalancer"
        ) {
            return Err(PortalError::Validation(format!(
                "service type must be ClusterIP, NodePort, or LoadBalancer, got {:?}",
                self.service_type
            )));
        }
        validate_port(self.port, "service port")?;
        validate_port(self.target_port, "target port")
    }
}

/// Renders an apps/v1 Deployment. Pure: no clocks, no randomness, no IO.
pub fn generate_deployment(params: &DeploymentParams) -> Result<String, PortalError> {
    params.validate()?;
    let doc = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": params.name,
            "namespace": params.namespace,
        },
        "spec": {
            "replicas": params.replicas,
            "selector": {
                "matchLabels": { "app": params.name },
            },
            "template": {
                "metadata": {
                    "labels": { "app": params.name },
                },
                "spec": {
                    "containers": [{
                        "name": params.name,
                        "image": params.image.trim(),
                        "ports": [{ "containerPort": params.port }],
                    }],
                },
            },
        },
    });
    serde_yaml::to_string(&doc)
        .map_err(|e| PortalError::Internal(format!("failed to render deployment manifest: {e}")))
}

/// Renders a v1 Service selecting pods labeled `app: <name>`.
pub fn generate_service(params: &ServiceParams) -> Result<String, PortalError> {
    params.validate()?;
    let doc = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": params.name,
            "namespace": params.namespace,
        },
        "spec": {
            "selector": { "app": params.name },
            "ports": [{
                "port": params.port,
                "targetPort": params.target_port,
            }],
            "type": params.service_type,
        },
    });
    serde_yaml::to_string(&doc)
        .map_err(|e| PortalError::Internal(format!("failed to render service manifest: {e}")))
}
