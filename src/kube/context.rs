use std::io::Write;
use std::path::Path;

use serde_json::json;
use tempfile::NamedTempFile;
use url::Url;

use super::validate_dns_label;
use crate::error::PortalError;

/// Validated cluster credentials supplied by the user at connect time.
#[derive(Debug, Clone)]
pub struct ClusterCredentials {
    pub endpoint: Url,
    pub alias: String,
    pub token: String,
}

impl ClusterCredentials {
    pub fn new(endpoint: &str, alias: &str, token: &str) -> Result<Self, PortalError> {
        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| PortalError::Validation(format!("invalid cluster endpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(PortalError::Validation(format!(
                "cluster endpoint must be http(s), got {:?}",
                endpoint.scheme()
            )));
        }
        validate_dns_label(alias, "cluster alias")?;
        let token = token.trim();
        if token.is_empty() {
            return Err(PortalError::Validation("cluster token is empty".into()));
        }
        Ok(Self {
            endpoint,
            alias: alias.to_string(),
            token: token.to_string(),
        })
    }
}

/// One session's ephemeral kubeconfig, written to its own temp file.
///
/// Every connect materializes an independent file, so concurrent sessions
/// never race on shared kubectl configuration the way a global
/// `kubectl config set-context` sequence would. The file is removed when the
/// last handle is dropped.
#[derive(Debug)]
pub struct ContextHandle {
    file: NamedTempFile,
    context_name: String,
}

impl ContextHandle {
    /// Renders a minimal single-context kubeconfig for `creds` and writes it
    /// to a fresh temp file. Pure with respect to the credentials: no global
    /// state is read or touched.
    pub fn materialize(creds: &ClusterCredentials) -> Result<Self, PortalError> {
        let user_name = format!("{}-user", creds.alias);
        // Token-only auth against a user-supplied endpoint; the original
        // portal skips TLS verification because lab clusters routinely run
        // self-signed certs.
        let doc = json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{
                "name": creds.alias,
                "cluster": {
                    "server": creds.endpoint.as_str().trim_end_matches('/'),
                    "insecure-skip-tls-verify": true,
                },
            }],
            "users": [{
                "name": user_name,
                "user": { "token": creds.token },
            }],
            "contexts": [{
                "name": creds.alias,
                "context": { "cluster": creds.alias, "user": user_name },
            }],
            "current-context": creds.alias,
        });

        let yaml = serde_yaml::to_string(&doc)
            .map_err(|e| PortalError::Internal(format!("failed to render kubeconfig: {e}")))?;

        let mut file = tempfile::Builder::new()
            .prefix("portal-kubeconfig-")
            .suffix(".yaml")
            .tempfile()
            .map_err(|e| PortalError::Internal(format!("failed to create kubeconfig file: {e}")))?;
        file.write_all(yaml.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| PortalError::Internal(format!("failed to write kubeconfig file: {e}")))?;

        Ok(Self {
            file,
            context_name: creds.alias.clone(),
        })
    }

    pub fn kubeconfig_path(&self) -> &Path {
        self.file.path()
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }
}
