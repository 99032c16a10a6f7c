//! GPU and input device pass-through negotiation for system containers
//!
//! Grants a container the host render node, card node, input tree and uinput
//! device one capability at a time, keeping only what lets the container boot
//! and rolling back to the last bootable configuration otherwise.

pub mod capability;
pub mod classifier;
pub mod config;
pub mod config_store;
pub mod error;
pub mod lifecycle;
pub mod negotiation;
pub mod progress;
pub mod provisioner;
pub mod readiness;
pub mod system_check;

pub use capability::{CapabilityCatalog, CapabilityEntry, Precondition, PreconditionCheck};
pub use classifier::{FailureClassifier, FailureSignature, Outcome, PatternSignature};
pub use config::NegotiatorConfig;
pub use config_store::{ContainerConfigStore, FragmentMarker};
pub use error::{
    ConfigError, LifecycleError, NegotiationError, ProvisionError, SessionAborted, StoreError,
};
pub use lifecycle::{ContainerControl, ContainerStatus, ExecResult, PctLifecycle, StartOutput};
pub use negotiation::{
    AttemptOutcome, AttemptRecord, AttemptStage, NegotiationEngine, NegotiationPhase,
    NegotiationReport, NegotiationState, NegotiationTimeouts,
};
pub use progress::{ChannelProgressReporter, NegotiationProgress, NoopProgress, ProgressReporter};
pub use provisioner::{JsonReportWriter, Provisioner};
pub use readiness::ReadinessProbe;
pub use system_check::{check_host, CheckItem, SystemCheckResult};
