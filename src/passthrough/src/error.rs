//! Error types for configuration, the config store, the container lifecycle and the engine.
use crate::classifier::Outcome;
use crate::negotiation::AttemptRecord;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading the negotiator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid failure signature '{name}': {source}")]
    Signature {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the persisted container configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Container configuration not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Ambiguous fragment markers for '{capability}': {reason}")]
    MarkerAmbiguous { capability: String, reason: String },

    #[error("IO error on {path:?} ({context}): {source}")]
    Io {
        path: PathBuf,
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, context: &'static str, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            context,
            source,
        }
    }
}

/// Errors raised by the container control interface.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Error type for the post-commit provisioning layer.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Provisioning error: {0}")]
    Provision(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Terminating errors of a negotiation session.
///
/// Capability-level failures while extending are recovered by rollback and
/// never show up here.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("Required capability '{capability}' is unavailable: {reason}")]
    RequiredCapabilityMissing { capability: String, reason: String },

    #[error("Baseline configuration failed ({outcome}): {excerpt}")]
    BaselineFailed { outcome: Outcome, excerpt: String },

    #[error("Rollback after '{capability}' did not return to a bootable state ({outcome}): {excerpt}")]
    UnrecoverableRollback {
        capability: String,
        outcome: Outcome,
        excerpt: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// A session that ended without committing, together with everything it tried.
#[derive(Debug, Error)]
#[error("Negotiation for container {container_id} aborted: {error}")]
pub struct SessionAborted {
    pub container_id: String,
    #[source]
    pub error: NegotiationError,
    pub attempts: Vec<AttemptRecord>,
}
