//! Container control interface
//!
//! The negotiation engine only talks to containers through [`ContainerControl`].
//! [`PctLifecycle`] drives Proxmox system containers through the `pct` CLI.

pub mod pct;

pub use pct::PctLifecycle;

use crate::error::LifecycleError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;

/// What a start attempt printed, and whether the runtime called it a success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOutput {
    pub exit_ok: bool,
    /// stdout and stderr of the start command, merged
    pub combined_output: String,
}

impl StartOutput {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            exit_ok: true,
            combined_output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            exit_ok: false,
            combined_output: output.into(),
        }
    }

    /// The last `max_lines` non-empty lines of output.
    pub fn excerpt(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self
            .combined_output
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();
        let skip = lines.len().saturating_sub(max_lines);
        lines[skip..].join("\n")
    }
}

/// Execution result from a command run inside a container
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Unknown,
}

/// Container control operations used during negotiation.
#[async_trait]
pub trait ContainerControl: Send + Sync {
    /// Start a container, capturing everything it prints.
    ///
    /// A non-zero exit is reported through [`StartOutput::exit_ok`], not as an
    /// error. Timeouts are the caller's business.
    async fn start(&self, id: &str) -> Result<StartOutput, LifecycleError>;

    /// Stop a container. Stopping a stopped container is not an error.
    async fn stop(&self, id: &str) -> Result<(), LifecycleError>;

    async fn status(&self, id: &str) -> Result<ContainerStatus, LifecycleError>;

    /// Execute a command inside a running container
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecResult, LifecycleError>;

    /// Whether a path exists on the host (device nodes, device directories)
    async fn host_path_exists(&self, path: &Path) -> bool;
}
