//! Per-session negotiation state and the report handed to provisioning.
use crate::classifier::Outcome;
use serde::Serialize;
use std::collections::BTreeSet;

/// Where the engine is in its state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "capability", rename_all = "snake_case")]
pub enum NegotiationPhase {
    Init,
    BaselineProbe,
    Extending(String),
    Committed,
    Aborted,
}

/// Which step of the protocol an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    /// Base configuration plus required capabilities
    Baseline,
    /// Trial of one optional capability
    Extend,
    /// Restart after removing a rejected capability
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Skipped without touching the container
    PreconditionUnmet { reason: String },
    Classified { outcome: Outcome },
}

impl AttemptOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, AttemptOutcome::Classified { outcome } if outcome.is_ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub capability: String,
    pub stage: AttemptStage,
    pub outcome: AttemptOutcome,
    /// Tail of the start output, or the reason for a skip
    pub excerpt: String,
}

/// Mutable record of one negotiation session, owned by the engine.
#[derive(Debug, Clone)]
pub struct NegotiationState {
    phase: NegotiationPhase,
    committed_fragments: Vec<String>,
    excluded_capabilities: BTreeSet<String>,
    last_known_good_snapshot: String,
    attempt_log: Vec<AttemptRecord>,
}

impl NegotiationState {
    pub fn new(initial_snapshot: String) -> Self {
        Self {
            phase: NegotiationPhase::Init,
            committed_fragments: Vec::new(),
            excluded_capabilities: BTreeSet::new(),
            last_known_good_snapshot: initial_snapshot,
            attempt_log: Vec::new(),
        }
    }

    pub fn committed_fragments(&self) -> &[String] {
        &self.committed_fragments
    }

    pub fn last_known_good_snapshot(&self) -> &str {
        &self.last_known_good_snapshot
    }

    pub fn is_excluded(&self, capability: &str) -> bool {
        self.excluded_capabilities.contains(capability)
    }

    pub(crate) fn enter(&mut self, phase: NegotiationPhase) {
        tracing::debug!("[NegotiationState] {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Mark the current configuration as confirmed live.
    pub(crate) fn confirm_good(&mut self, snapshot: String) {
        self.last_known_good_snapshot = snapshot;
    }

    /// Record a capability as granted; the list only ever grows.
    pub(crate) fn commit(&mut self, capability: &str, snapshot: String) {
        debug_assert!(!self.is_excluded(capability));
        if !self.committed_fragments.iter().any(|c| c == capability) {
            self.committed_fragments.push(capability.to_string());
        }
        self.last_known_good_snapshot = snapshot;
    }

    pub(crate) fn exclude(&mut self, capability: &str) {
        self.excluded_capabilities.insert(capability.to_string());
    }

    pub(crate) fn record(&mut self, record: AttemptRecord) {
        self.attempt_log.push(record);
    }

    pub(crate) fn into_attempts(self) -> Vec<AttemptRecord> {
        self.attempt_log
    }

    pub(crate) fn into_report(self, container_id: &str) -> NegotiationReport {
        NegotiationReport {
            container_id: container_id.to_string(),
            granted: self.committed_fragments,
            excluded: self.excluded_capabilities.into_iter().collect(),
            attempts: self.attempt_log,
        }
    }
}

/// Result of a committed session, consumed by later provisioning steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegotiationReport {
    pub container_id: String,
    /// Granted capabilities in attempt order
    pub granted: Vec<String>,
    pub excluded: Vec<String>,
    pub attempts: Vec<AttemptRecord>,
}

impl NegotiationReport {
    pub fn is_granted(&self, capability: &str) -> bool {
        self.granted.iter().any(|g| g == capability)
    }
}
