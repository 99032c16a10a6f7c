//! Progress types for negotiation sessions.

use serde::{Deserialize, Serialize};

/// Progress of a negotiation session.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct NegotiationProgress {
    pub percentage: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

impl NegotiationProgress {
    pub fn new(container_id: Option<String>, percentage: u32, message: String) -> Self {
        Self {
            percentage,
            message,
            phase: None,
            container_id,
            capability: None,
        }
    }
}

/// Progress reporter for negotiation sessions.
pub trait ProgressReporter: Send + Sync + 'static {
    fn emit(&self, percentage: u32, message: String);

    /// Emit progress with phase and capability metadata.
    fn emit_detailed(
        &self,
        percentage: u32,
        message: String,
        _phase: Option<String>,
        _capability: Option<String>,
    ) {
        self.emit(percentage, message);
    }
}

/// Reporter that drops everything.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn emit(&self, _percentage: u32, _message: String) {}
}

/// Channel-based progress reporter.
pub struct ChannelProgressReporter {
    sender: tokio::sync::mpsc::Sender<NegotiationProgress>,
    container_id: Option<String>,
}

impl ChannelProgressReporter {
    pub fn new(sender: tokio::sync::mpsc::Sender<NegotiationProgress>) -> Self {
        Self {
            sender,
            container_id: None,
        }
    }

    pub fn with_container_id(
        sender: tokio::sync::mpsc::Sender<NegotiationProgress>,
        container_id: String,
    ) -> Self {
        Self {
            sender,
            container_id: Some(container_id),
        }
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn emit(&self, percentage: u32, message: String) {
        self.emit_detailed(percentage, message, None, None);
    }

    fn emit_detailed(
        &self,
        percentage: u32,
        message: String,
        phase: Option<String>,
        capability: Option<String>,
    ) {
        let mut progress = NegotiationProgress::new(self.container_id.clone(), percentage, message);
        progress.phase = phase;
        progress.capability = capability;
        let _ = self.sender.try_send(progress);
    }
}

/// Log every update received until all senders are dropped.
///
/// Returns the number of updates seen.
pub async fn log_progress(
    mut receiver: tokio::sync::mpsc::Receiver<NegotiationProgress>,
) -> usize {
    let mut seen = 0;
    while let Some(progress) = receiver.recv().await {
        match &progress.capability {
            Some(capability) => tracing::info!(
                "[{:>3}%] {} ({})",
                progress.percentage,
                progress.message,
                capability
            ),
            None => tracing::info!("[{:>3}%] {}", progress.percentage, progress.message),
        }
        seen += 1;
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_reporter_tags_container() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let reporter = ChannelProgressReporter::with_container_id(tx, "105".to_string());
        reporter.emit_detailed(
            40,
            "Trying card-device".to_string(),
            Some("extending".to_string()),
            Some("card-device".to_string()),
        );
        let progress = rx.recv().await.unwrap();
        assert_eq!(progress.percentage, 40);
        assert_eq!(progress.container_id.as_deref(), Some("105"));
        assert_eq!(progress.capability.as_deref(), Some("card-device"));
    }

    #[tokio::test]
    async fn test_log_progress_drains_until_senders_drop() {
        let (tx, rx) = tokio::sync::mpsc::channel::<NegotiationProgress>(4);
        let task = tokio::spawn(log_progress(rx));

        let reporter = ChannelProgressReporter::new(tx);
        reporter.emit(5, "Booting baseline configuration".to_string());
        reporter.emit(100, "Device configuration committed".to_string());
        drop(reporter);

        assert_eq!(task.await.unwrap(), 2);
    }
}
