//! Hand-off to the provisioning layer that runs after a configuration is committed.

use crate::config_store::atomic_write;
use crate::error::ProvisionError;
use crate::negotiation::NegotiationReport;
use async_trait::async_trait;
use std::path::PathBuf;

/// Post-commit provisioning step.
///
/// Receives the granted capabilities so software paths for excluded devices
/// can be skipped, and the attempt log for operator diagnostics.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, report: &NegotiationReport) -> Result<(), ProvisionError>;
}

/// Writes the negotiation report as pretty JSON, atomically.
pub struct JsonReportWriter {
    path: PathBuf,
}

impl JsonReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Provisioner for JsonReportWriter {
    async fn provision(&self, report: &NegotiationReport) -> Result<(), ProvisionError> {
        let mut json = serde_json::to_string_pretty(report)?;
        json.push('\n');
        atomic_write(&self.path, &json)?;
        tracing::info!("[JsonReportWriter] Wrote negotiation report to {:?}", self.path);
        Ok(())
    }
}
