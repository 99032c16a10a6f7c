//! `pct` CLI backend for [`ContainerControl`].
use super::{ContainerControl, ContainerStatus, ExecResult, StartOutput};
use crate::config::RuntimeConfig;
use crate::error::LifecycleError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Proxmox container control through the `pct` command.
#[derive(Debug, Clone)]
pub struct PctLifecycle {
    binary: String,
    stop_timeout: Duration,
}

struct CommandOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

impl PctLifecycle {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            stop_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(runtime: &RuntimeConfig) -> Self {
        Self::new(runtime.pct_binary.clone()).with_stop_timeout(runtime.stop_timeout())
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str], extra: &[String]) -> Result<CommandOutput, LifecycleError> {
        let command_line = format!("{} {}", self.binary, args.join(" "));
        tracing::debug!("[PctLifecycle] Running: {} {:?}", command_line, extra);

        let output = Command::new(&self.binary)
            .args(args)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| LifecycleError::Spawn {
                command: command_line,
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl ContainerControl for PctLifecycle {
    async fn start(&self, id: &str) -> Result<StartOutput, LifecycleError> {
        tracing::info!("[PctLifecycle] Starting container {}", id);
        let output = self.run(&["start", id], &[]).await?;
        if !output.success {
            tracing::warn!(
                "[PctLifecycle] pct start {} exited with {:?}",
                id,
                output.code
            );
        }
        Ok(StartOutput {
            exit_ok: output.success,
            combined_output: output.combined(),
        })
    }

    async fn stop(&self, id: &str) -> Result<(), LifecycleError> {
        tracing::info!("[PctLifecycle] Stopping container {}", id);
        let output = tokio::time::timeout(self.stop_timeout, self.run(&["stop", id], &[]))
            .await
            .map_err(|_| LifecycleError::Timeout {
                command: format!("{} stop {}", self.binary, id),
                timeout: self.stop_timeout,
            })??;

        if output.success || is_not_running(&output.combined()) {
            Ok(())
        } else {
            Err(LifecycleError::Runtime(format!(
                "pct stop {} failed (exit {:?}): {}",
                id,
                output.code,
                output.combined().trim()
            )))
        }
    }

    async fn status(&self, id: &str) -> Result<ContainerStatus, LifecycleError> {
        let output = self.run(&["status", id], &[]).await?;
        if !output.success {
            return Err(LifecycleError::Runtime(format!(
                "pct status {} failed (exit {:?}): {}",
                id,
                output.code,
                output.combined().trim()
            )));
        }
        Ok(parse_status(&output.stdout))
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecResult, LifecycleError> {
        let output = self.run(&["exec", id, "--"], cmd).await?;
        Ok(ExecResult {
            exit_code: output.code.unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn host_path_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Parse `pct status` output, e.g. `status: running`.
pub fn parse_status(stdout: &str) -> ContainerStatus {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("status:"))
        .map(|value| match value.trim() {
            "running" => ContainerStatus::Running,
            "stopped" => ContainerStatus::Stopped,
            _ => ContainerStatus::Unknown,
        })
        .next()
        .unwrap_or(ContainerStatus::Unknown)
}

fn is_not_running(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("not running") || lower.contains("already stopped")
}
