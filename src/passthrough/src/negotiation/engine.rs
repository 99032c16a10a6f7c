//! Progressive capability negotiation with rollback.
//!
//! The engine boots a baseline (no optional capabilities), then tries each
//! optional capability on its own: append its fragment, restart, classify.
//! A rejected capability is removed again and the container is restarted on
//! the last configuration known to boot before the next one is tried.

use super::state::{
    AttemptOutcome, AttemptRecord, AttemptStage, NegotiationPhase, NegotiationReport,
    NegotiationState,
};
use crate::capability::{CapabilityCatalog, CapabilityEntry, PreconditionCheck};
use crate::classifier::{FailureClassifier, Outcome};
use crate::config::NegotiatorConfig;
use crate::config_store::{append_fragment, remove_fragment, ContainerConfigStore};
use crate::error::{ConfigError, NegotiationError, SessionAborted, StoreError};
use crate::lifecycle::{ContainerControl, ContainerStatus, StartOutput};
use crate::progress::{NoopProgress, ProgressReporter};
use crate::provisioner::Provisioner;
use crate::readiness::ReadinessProbe;
use std::sync::Arc;
use std::time::Duration;

/// Number of output lines kept per attempt in the log.
const EXCERPT_LINES: usize = 5;

/// Timeouts applied to every boot attempt.
#[derive(Debug, Clone, Copy)]
pub struct NegotiationTimeouts {
    pub start: Duration,
    pub probe: Duration,
}

impl Default for NegotiationTimeouts {
    fn default() -> Self {
        Self {
            start: Duration::from_secs(60),
            probe: Duration::from_secs(30),
        }
    }
}

pub struct NegotiationEngine {
    control: Arc<dyn ContainerControl>,
    store: ContainerConfigStore,
    catalog: CapabilityCatalog,
    classifier: FailureClassifier,
    probe: ReadinessProbe,
    timeouts: NegotiationTimeouts,
    progress: Arc<dyn ProgressReporter>,
    provisioner: Option<Arc<dyn Provisioner>>,
}

impl NegotiationEngine {
    pub fn new(
        control: Arc<dyn ContainerControl>,
        store: ContainerConfigStore,
        catalog: CapabilityCatalog,
        classifier: FailureClassifier,
        probe: ReadinessProbe,
    ) -> Self {
        Self {
            control,
            store,
            catalog,
            classifier,
            probe,
            timeouts: NegotiationTimeouts::default(),
            progress: Arc::new(NoopProgress),
            provisioner: None,
        }
    }

    /// Wire an engine for one container from the negotiator configuration.
    pub fn from_config(
        config: &NegotiatorConfig,
        control: Arc<dyn ContainerControl>,
        container_id: &str,
    ) -> Result<Self, ConfigError> {
        let classifier = FailureClassifier::from_config(&config.classifier, &config.signatures)?;
        Ok(Self::new(
            control,
            ContainerConfigStore::new(config.container_config_path(container_id)),
            CapabilityCatalog::from_devices(&config.devices),
            classifier,
            ReadinessProbe::from_config(&config.probe),
        )
        .with_timeouts(NegotiationTimeouts {
            start: config.runtime.start_timeout(),
            probe: config.probe.timeout(),
        }))
    }

    pub fn with_timeouts(mut self, timeouts: NegotiationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Provisioning step run once the final configuration is committed.
    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &ContainerConfigStore {
        &self.store
    }

    /// Run one negotiation session for `container_id`.
    pub async fn negotiate(&self, container_id: &str) -> Result<NegotiationReport, SessionAborted> {
        let session_start = std::time::Instant::now();
        tracing::info!(
            "[NegotiationEngine] Negotiating device pass-through for container {} ({:?})",
            container_id,
            self.store.path()
        );

        let initial = match self.store.snapshot() {
            Ok(text) => text,
            Err(e) => {
                return Err(SessionAborted {
                    container_id: container_id.to_string(),
                    error: e.into(),
                    attempts: Vec::new(),
                })
            }
        };

        let mut state = NegotiationState::new(initial.clone());
        match self.run(container_id, &initial, &mut state).await {
            Ok(()) => {
                state.enter(NegotiationPhase::Committed);
                let report = state.into_report(container_id);
                tracing::info!(
                    "[NegotiationEngine] Container {} committed in {}ms: granted {:?}, excluded {:?}",
                    container_id,
                    session_start.elapsed().as_millis(),
                    report.granted,
                    report.excluded
                );
                self.progress.emit_detailed(
                    100,
                    "Device configuration committed".to_string(),
                    Some("committed".to_string()),
                    None,
                );

                if let Some(provisioner) = &self.provisioner {
                    if let Err(e) = provisioner.provision(&report).await {
                        tracing::error!(
                            "[NegotiationEngine] Provisioning after commit failed for {}: {}",
                            container_id,
                            e
                        );
                        return Err(SessionAborted {
                            container_id: container_id.to_string(),
                            error: e.into(),
                            attempts: report.attempts,
                        });
                    }
                }
                Ok(report)
            }
            Err(error) => {
                state.enter(NegotiationPhase::Aborted);
                tracing::error!(
                    "[NegotiationEngine] Negotiation for container {} aborted after {}ms: {}",
                    container_id,
                    session_start.elapsed().as_millis(),
                    error
                );
                self.progress.emit_detailed(
                    100,
                    format!("Aborted: {}", error),
                    Some("aborted".to_string()),
                    None,
                );
                Err(SessionAborted {
                    container_id: container_id.to_string(),
                    error,
                    attempts: state.into_attempts(),
                })
            }
        }
    }

    async fn run(
        &self,
        id: &str,
        initial: &str,
        state: &mut NegotiationState,
    ) -> Result<(), NegotiationError> {
        // Baseline: no managed fragments at all, then the required ones.
        let mut baseline = initial.to_string();
        for entry in self.catalog.entries() {
            if let Some(stripped) = remove_fragment(&baseline, &entry.marker())? {
                baseline = stripped;
            }
        }

        for entry in self.catalog.required() {
            if let PreconditionCheck::Unmet { reason } =
                self.catalog.evaluate(entry, self.control.as_ref(), &[]).await
            {
                tracing::error!(
                    "[NegotiationEngine] Required capability '{}' unavailable: {}",
                    entry.name,
                    reason
                );
                state.exclude(&entry.name);
                state.record(AttemptRecord {
                    capability: entry.name.clone(),
                    stage: AttemptStage::Baseline,
                    outcome: AttemptOutcome::PreconditionUnmet {
                        reason: reason.clone(),
                    },
                    excerpt: reason.clone(),
                });
                return Err(NegotiationError::RequiredCapabilityMissing {
                    capability: entry.name.clone(),
                    reason,
                });
            }
            if let Some(extended) = append_fragment(&baseline, &entry.marker(), &entry.config_fragment) {
                baseline = extended;
            }
        }

        state.enter(NegotiationPhase::BaselineProbe);
        self.progress.emit_detailed(
            5,
            "Booting baseline configuration".to_string(),
            Some("baseline".to_string()),
            None,
        );
        self.store.restore(&baseline)?;
        self.stop_quietly(id).await;

        let (outcome, excerpt) = self.boot(id).await;
        state.record(AttemptRecord {
            capability: "baseline".to_string(),
            stage: AttemptStage::Baseline,
            outcome: AttemptOutcome::Classified {
                outcome: outcome.clone(),
            },
            excerpt: excerpt.clone(),
        });
        if !outcome.is_ok() {
            tracing::error!(
                "[NegotiationEngine] Baseline for container {} failed ({}), restoring initial configuration",
                id,
                outcome
            );
            self.stop_quietly(id).await;
            self.store.restore(initial)?;
            return Err(NegotiationError::BaselineFailed { outcome, excerpt });
        }

        state.confirm_good(baseline.clone());
        for entry in self.catalog.required() {
            state.commit(&entry.name, baseline.clone());
        }

        let optional: Vec<&CapabilityEntry> = self.catalog.optional().collect();
        let total = optional.len().max(1) as u32;
        for (index, entry) in optional.into_iter().enumerate() {
            let percentage = 10 + 85 * index as u32 / total;
            self.extend(id, entry, state, percentage).await?;
        }

        Ok(())
    }

    /// Try one optional capability; failures are recovered here.
    async fn extend(
        &self,
        id: &str,
        entry: &CapabilityEntry,
        state: &mut NegotiationState,
        percentage: u32,
    ) -> Result<(), NegotiationError> {
        if state.is_excluded(&entry.name) {
            return Ok(());
        }

        let granted = state.committed_fragments().to_vec();
        if let PreconditionCheck::Unmet { reason } =
            self.catalog.evaluate(entry, self.control.as_ref(), &granted).await
        {
            tracing::info!(
                "[NegotiationEngine] Skipping '{}': {}",
                entry.name,
                reason
            );
            state.exclude(&entry.name);
            state.record(AttemptRecord {
                capability: entry.name.clone(),
                stage: AttemptStage::Extend,
                outcome: AttemptOutcome::PreconditionUnmet {
                    reason: reason.clone(),
                },
                excerpt: reason,
            });
            return Ok(());
        }

        state.enter(NegotiationPhase::Extending(entry.name.clone()));
        self.progress.emit_detailed(
            percentage,
            format!("Trying {}", entry.name),
            Some("extending".to_string()),
            Some(entry.name.clone()),
        );
        tracing::info!("[NegotiationEngine] Trying capability '{}'", entry.name);

        let marker = entry.marker();
        if !self.store.append(&marker, &entry.config_fragment)? {
            tracing::info!(
                "[NegotiationEngine] All directives of '{}' already present, testing as-is",
                entry.name
            );
        }

        self.stop_quietly(id).await;
        let (outcome, excerpt) = self.boot(id).await;
        state.record(AttemptRecord {
            capability: entry.name.clone(),
            stage: AttemptStage::Extend,
            outcome: AttemptOutcome::Classified {
                outcome: outcome.clone(),
            },
            excerpt: excerpt.clone(),
        });

        if outcome.is_ok() {
            tracing::info!("[NegotiationEngine] Capability '{}' granted", entry.name);
            let snapshot = self.store.snapshot()?;
            state.commit(&entry.name, snapshot);
            return Ok(());
        }

        tracing::warn!(
            "[NegotiationEngine] Capability '{}' rejected ({}): {}",
            entry.name,
            outcome,
            excerpt
        );
        self.roll_back(id, entry, state).await
    }

    /// Return to the last known good configuration and prove it still boots.
    async fn roll_back(
        &self,
        id: &str,
        entry: &CapabilityEntry,
        state: &mut NegotiationState,
    ) -> Result<(), NegotiationError> {
        let good = state.last_known_good_snapshot().to_string();

        match self.store.remove(&entry.marker()) {
            Ok(_) => {}
            Err(StoreError::MarkerAmbiguous { reason, .. }) => {
                tracing::warn!(
                    "[NegotiationEngine] Cannot remove '{}' by marker ({}), restoring snapshot",
                    entry.name,
                    reason
                );
            }
            Err(e) => return Err(e.into()),
        }
        if self.store.snapshot()? != good {
            tracing::warn!(
                "[NegotiationEngine] Configuration after removing '{}' differs from last known good, restoring snapshot",
                entry.name
            );
            self.store.restore(&good)?;
        }
        state.exclude(&entry.name);

        self.stop_quietly(id).await;
        let (outcome, excerpt) = self.boot(id).await;
        state.record(AttemptRecord {
            capability: entry.name.clone(),
            stage: AttemptStage::Rollback,
            outcome: AttemptOutcome::Classified {
                outcome: outcome.clone(),
            },
            excerpt: excerpt.clone(),
        });

        if !outcome.is_ok() {
            tracing::error!(
                "[NegotiationEngine] Container {} does not boot after rolling back '{}' ({})",
                id,
                entry.name,
                outcome
            );
            return Err(NegotiationError::UnrecoverableRollback {
                capability: entry.name.clone(),
                outcome,
                excerpt,
            });
        }

        tracing::info!(
            "[NegotiationEngine] Rolled back '{}', container {} boots again",
            entry.name,
            id
        );
        Ok(())
    }

    /// Start the container, probe it, and classify the attempt.
    async fn boot(&self, id: &str) -> (Outcome, String) {
        let attempt_start = std::time::Instant::now();
        let start = match tokio::time::timeout(self.timeouts.start, self.control.start(id)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => StartOutput::failed(e.to_string()),
            Err(_) => StartOutput::failed(format!(
                "start of container {} did not complete within {:?}",
                id, self.timeouts.start
            )),
        };

        let live = if start.exit_ok {
            Some(self.probe.wait(self.control.as_ref(), id, self.timeouts.probe).await)
        } else {
            None
        };

        let outcome = self.classifier.classify(&start, live);
        let mut excerpt = start.excerpt(EXCERPT_LINES);
        if outcome == Outcome::NotResponsive && excerpt.is_empty() {
            excerpt = format!("liveness probe timed out after {:?}", self.timeouts.probe);
        }

        tracing::info!(
            "[TIMING] Boot attempt on {} classified as {} after {}ms",
            id,
            outcome,
            attempt_start.elapsed().as_millis()
        );
        (outcome, excerpt)
    }

    /// Stop the container if it may be running; failures are only logged.
    async fn stop_quietly(&self, id: &str) {
        match self.control.status(id).await {
            Ok(ContainerStatus::Stopped) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("[NegotiationEngine] Status of {} unknown: {}", id, e);
            }
        }
        if let Err(e) = self.control.stop(id).await {
            tracing::warn!("[NegotiationEngine] Failed to stop container {}: {}", id, e);
        }
    }
}
