//! Liveness polling for a freshly started container.
use crate::config::ProbeConfig;
use crate::lifecycle::ContainerControl;
use std::time::Duration;
use tokio::time::Instant;

/// Polls a container until a probe command succeeds inside it.
///
/// Every call to [`ReadinessProbe::wait`] opens its own timeout window.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    command: Vec<String>,
    interval: Duration,
}

impl ReadinessProbe {
    pub fn new(command: Vec<String>, interval: Duration) -> Self {
        Self { command, interval }
    }

    pub fn from_config(probe: &ProbeConfig) -> Self {
        Self::new(probe.command.clone(), probe.interval())
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Returns `true` once the probe command exits 0, `false` when `timeout` elapses.
    pub async fn wait(&self, control: &dyn ContainerControl, id: &str, timeout: Duration) -> bool {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut polls = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            polls += 1;
            match tokio::time::timeout(remaining, control.exec(id, &self.command)).await {
                Ok(Ok(result)) if result.success() => {
                    tracing::info!(
                        "[ReadinessProbe] Container {} live after {}ms ({} polls)",
                        id,
                        started.elapsed().as_millis(),
                        polls
                    );
                    return true;
                }
                Ok(Ok(result)) => {
                    tracing::debug!(
                        "[ReadinessProbe] Container {} not live yet (exit {}): {}",
                        id,
                        result.exit_code,
                        result.stderr.trim()
                    );
                }
                Ok(Err(e)) => {
                    tracing::debug!("[ReadinessProbe] Probe exec on {} failed: {}", id, e);
                }
                Err(_) => break,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.interval.min(remaining)).await;
        }

        tracing::warn!(
            "[ReadinessProbe] Container {} not live within {:?} ({} polls)",
            id,
            timeout,
            polls
        );
        false
    }
}
