//! Validation layer between user intent and the executor. Free-form commands
//! pass an explicit allow-list check; structured operations are built from
//! fixed argv shapes with every user value validated before embedding.

use super::validate_dns_label;
use crate::error::PortalError;

/// The single tool this portal is allowed to invoke.
pub const TOOL: &str = "kubectl";

/// Flags that would re-point an invocation at a different cluster, identity,
/// or kubeconfig than the session's own context. Rejected up front so the
/// per-session `--kubeconfig`/`--context` the executor appends stays
/// authoritative.
const FORBIDDEN_FLAGS: &[&str] = &[
    "--kubeconfig",
    "--context",
    "--cluster",
    "--server",
    // shorthand for --server
    "-s",
    "--token",
    "--user",
    "--username",
    "--password",
    "--as",
    "--as-group",
    "--as-uid",
    "--client-certificate",
    "--client-key",
    "--certificate-authority",
    "--insecure-skip-tls-verify",
    "--tls-server-name",
];

/// Resource kinds the quick `get` surface will fetch.
const QUERYABLE_KINDS: &[&str] = &[
    "pods",
    "deployments",
    "services",
    "replicasets",
    "statefulsets",
    "daemonsets",
    "configmaps",
    "ingresses",
    "jobs",
    "cronjobs",
    "events",
    "namespaces",
    "nodes",
];

/// Kinds that `kubectl scale` accepts.
const SCALABLE_KINDS: &[&str] = &["deployment", "statefulset", "replicaset"];

/// Kinds the delete surface will remove.
const DELETABLE_KINDS: &[&str] = &[
    "pod",
    "deployment",
    "service",
    "replicaset",
    "statefulset",
    "daemonset",
    "configmap",
    "ingress",
    "job",
    "cronjob",
];

const MAX_REPLICAS: u32 = 500;

fn require_kind(kind: &str, allowed: &'static [&'static str]) -> Result<(), PortalError> {
    if allowed.contains(&kind) {
        Ok(())
    } else {
        Err(PortalError::Validation(format!(
            "resource kind {kind:?} is not supported (expected one of {allowed:?})"
        )))
    }
}

/// Parses a free-form command string into an argument vector for the
/// executor. The leading `kubectl` token is required and stripped — the
/// executor supplies the binary itself, so the user string never names the
/// program that actually runs.
///
/// Tokenization uses shell-words rules for quoting only; the result is passed
/// as an argv, never to a shell.
pub fn parse_custom_command(raw: &str) -> Result<Vec<String>, PortalError> {
    let tokens = shell_words::split(raw.trim())
        .map_err(|e| PortalError::Validation(format!("unparseable command: {e}")))?;

    match tokens.first().map(String::as_str) {
        None => return Err(PortalError::Validation("command is empty".into())),
        Some(TOOL) => {}
        Some(other) => {
            return Err(PortalError::Validation(format!(
                "only {TOOL} commands are allowed, got {other:?}"
            )));
        }
    }

    let args: Vec<String> = tokens[1..].to_vec();
    if args.is_empty() {
        return Err(PortalError::Validation(format!(
            "{TOOL} requires a subcommand"
        )));
    }
    for arg in &args {
        // `--flag=value` and `--flag value` both start with the bare flag.
        let flag = arg.split('=').next().unwrap_or(arg);
        if FORBIDDEN_FLAGS.contains(&flag) {
            return Err(PortalError::Validation(format!(
                "flag {flag} is not allowed; commands run against the session's connected cluster"
            )));
        }
    }
    Ok(args)
}

/// `kubectl get <kind> -n <namespace> -o json`
pub fn get_resources(kind: &str, namespace: &str) -> Result<Vec<String>, PortalError> {
    require_kind(kind, QUERYABLE_KINDS)?;
    validate_dns_label(namespace, "namespace")?;
    Ok(vec![
        "get".into(),
        kind.into(),
        "-n".into(),
        namespace.into(),
        "-o".into(),
        "json".into(),
    ])
}

/// `kubectl scale <kind>/<name> --replicas=<n> -n <namespace>`
pub fn scale(
    kind: &str,
    name: &str,
    replicas: u32,
    namespace: &str,
) -> Result<Vec<String>, PortalError> {
    require_kind(kind, SCALABLE_KINDS)?;
    validate_dns_label(name, "resource name")?;
    validate_dns_label(namespace, "namespace")?;
    if replicas > MAX_REPLICAS {
        return Err(PortalError::Validation(format!(
            "replica count {replicas} exceeds the maximum of {MAX_REPLICAS}"
        )));
    }
    Ok(vec![
        "scale".into(),
        format!("{kind}/{name}"),
        format!("--replicas={replicas}"),
        "-n".into(),
        namespace.into(),
    ])
}

/// `kubectl delete <kind> <name> -n <namespace>`
pub fn delete(kind: &str, name: &str, namespace: &str) -> Result<Vec<String>, PortalError> {
    require_kind(kind, DELETABLE_KINDS)?;
    validate_dns_label(name, "resource name")?;
    validate_dns_label(namespace, "namespace")?;
    Ok(vec![
        "delete".into(),
        kind.into(),
        name.into(),
        "-n".into(),
        namespace.into(),
    ])
}
