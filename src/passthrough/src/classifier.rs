//! Start-attempt classification.
//!
//! The container runtime reports "started" as soon as the init process is
//! launched, even when the environment inside is unusable. An attempt is
//! therefore judged on two channels together: the merged text the start
//! command printed, and the result of an active liveness probe.

use crate::config::{ClassifierConfig, SignatureConfig};
use crate::error::ConfigError;
use crate::lifecycle::StartOutput;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of one start attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Started and answered the liveness probe in time.
    Ok,
    /// Started, but the output carries a known bad signature.
    StartupUnstable { signature: String },
    /// Started without a bad signature, but never became live.
    NotResponsive,
    /// The start command itself failed.
    HardFailure,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok => write!(f, "ok"),
            Outcome::StartupUnstable { signature } => write!(f, "startup unstable ({})", signature),
            Outcome::NotResponsive => write!(f, "not responsive"),
            Outcome::HardFailure => write!(f, "hard failure"),
        }
    }
}

/// A recognisable failure pattern in start output.
pub trait FailureSignature: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, output: &str) -> bool;
}

/// Signature backed by a regular expression.
#[derive(Debug, Clone)]
pub struct PatternSignature {
    name: String,
    pattern: Regex,
}

impl PatternSignature {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
        })
    }
}

impl FailureSignature for PatternSignature {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, output: &str) -> bool {
        self.pattern.is_match(output)
    }
}

pub struct FailureClassifier {
    signatures: Vec<Box<dyn FailureSignature>>,
    confirm_unstable_with_probe: bool,
}

impl fmt::Debug for FailureClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureClassifier")
            .field(
                "signatures",
                &self.signatures.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("confirm_unstable_with_probe", &self.confirm_unstable_with_probe)
            .finish()
    }
}

impl FailureClassifier {
    pub fn new() -> Self {
        Self {
            signatures: Vec::new(),
            confirm_unstable_with_probe: false,
        }
    }

    /// Build from configuration; disabled signatures are dropped.
    pub fn from_config(
        classifier: &ClassifierConfig,
        signatures: &[SignatureConfig],
    ) -> Result<Self, ConfigError> {
        let mut built = Self::new().confirm_unstable_with_probe(classifier.confirm_unstable_with_probe);
        for signature in signatures.iter().filter(|s| s.enabled) {
            let pattern = PatternSignature::new(signature.name.clone(), &signature.pattern).map_err(
                |source| ConfigError::Signature {
                    name: signature.name.clone(),
                    source,
                },
            )?;
            built = built.with_signature(pattern);
        }
        Ok(built)
    }

    pub fn with_signature(mut self, signature: impl FailureSignature + 'static) -> Self {
        self.signatures.push(Box::new(signature));
        self
    }

    /// When set, a signature match is only a failure if the probe also failed.
    pub fn confirm_unstable_with_probe(mut self, confirm: bool) -> Self {
        self.confirm_unstable_with_probe = confirm;
        self
    }

    /// First signature found in `output`.
    pub fn matching_signature(&self, output: &str) -> Option<&str> {
        self.signatures
            .iter()
            .find(|s| s.matches(output))
            .map(|s| s.name())
    }

    /// Classify a start attempt.
    ///
    /// `live` is the readiness probe result; `None` means no probe was run
    /// because the start itself failed.
    pub fn classify(&self, start: &StartOutput, live: Option<bool>) -> Outcome {
        if !start.exit_ok {
            return Outcome::HardFailure;
        }

        if let Some(signature) = self.matching_signature(&start.combined_output) {
            if self.confirm_unstable_with_probe && live == Some(true) {
                tracing::warn!(
                    "[FailureClassifier] Signature '{}' matched but container answered the probe, accepting",
                    signature
                );
            } else {
                return Outcome::StartupUnstable {
                    signature: signature.to_string(),
                };
            }
        }

        match live {
            Some(true) => Outcome::Ok,
            _ => Outcome::NotResponsive,
        }
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}
