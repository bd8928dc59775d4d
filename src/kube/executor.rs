//! Subprocess execution with a hard time budget. Invocations are argument
//! vectors only — user data is passed as argv values or streamed to stdin,
//! never re-parsed by a shell.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::command::TOOL;
use super::context::ContextHandle;
use crate::error::PortalError;

/// Outcome of one subprocess invocation. Immutable once produced; stdout and
/// stderr are kept separate so audit records can distinguish diagnostics from
/// primary output.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecutionResult {
    /// The snapshot worth keeping in the audit trail: primary output on
    /// success, diagnostics on failure.
    pub fn audit_output(&self) -> &str {
        if self.success || self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Seam between request handlers and the external tool. Handlers depend on
/// this trait so tests can observe exactly which invocations would have been
/// spawned without launching anything.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `kubectl <args>` against the session's context.
    async fn run(
        &self,
        ctx: &ContextHandle,
        args: &[String],
        timeout: Duration,
    ) -> Result<ExecutionResult, PortalError>;

    /// Runs `kubectl apply -f -` with the manifest streamed to stdin.
    async fn apply(
        &self,
        ctx: &ContextHandle,
        manifest: &str,
        namespace: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecutionResult, PortalError>;
}

/// The real executor: spawns the kubectl binary found on PATH.
pub struct KubectlRunner {
    binary: PathBuf,
}

impl KubectlRunner {
    /// Locates kubectl on PATH, falling back to the bare name so a PATH
    /// lookup at spawn time still has a chance.
    pub fn discover() -> Self {
        let binary = which::which(TOOL).unwrap_or_else(|_| PathBuf::from(TOOL));
        Self { binary }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn spawn_and_wait(
        &self,
        ctx: &ContextHandle,
        args: &[String],
        stdin_payload: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecutionResult, PortalError> {
        let kubeconfig_flag = format!("--kubeconfig={}", ctx.kubeconfig_path().display());
        let context_flag = format!("--context={}", ctx.context_name());
        debug!(
            binary = %self.binary.display(),
            context = ctx.context_name(),
            ?args,
            "spawning cluster command"
        );

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .arg(&kubeconfig_flag)
            .arg(&context_flag)
            .stdin(if stdin_payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // If the timeout fires, dropping the wait future tears the
            // child down rather than leaking it.
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| PortalError::Internal(format!("failed to spawn {TOOL}: {e}")))?;

        if let Some(payload) = stdin_payload {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| PortalError::Internal("child stdin not captured".into()))?;
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| PortalError::Internal(format!("failed to stream manifest: {e}")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| PortalError::Internal(format!("failed to close stdin: {e}")))?;
        }

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code();
                Ok(ExecutionResult {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code,
                    duration_ms: started.elapsed().as_millis() as u64,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(PortalError::Internal(format!(
                "failed to collect {TOOL} output: {e}"
            ))),
            Err(_) => Ok(ExecutionResult {
                success: false,
                stdout: String::new(),
                stderr: format!("command timed out after {} seconds", timeout.as_secs()),
                exit_code: None,
                duration_ms: started.elapsed().as_millis() as u64,
                timed_out: true,
            }),
        }
    }
}

#[async_trait]
impl CommandRunner for KubectlRunner {
    async fn run(
        &self,
        ctx: &ContextHandle,
        args: &[String],
        timeout: Duration,
    ) -> Result<ExecutionResult, PortalError> {
        self.spawn_and_wait(ctx, args, None, timeout).await
    }

    async fn apply(
        &self,
        ctx: &ContextHandle,
        manifest: &str,
        namespace: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecutionResult, PortalError> {
        let mut args = vec!["apply".to_string(), "-f".to_string(), "-".to_string()];
        if let Some(ns) = namespace {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        self.spawn_and_wait(ctx, &args, Some(manifest), timeout)
            .await
    }
}
