//! Negotiation engine and session state.
pub mod engine;
pub mod state;

pub use engine::{NegotiationEngine, NegotiationTimeouts};
pub use state::{
    AttemptOutcome, AttemptRecord, AttemptStage, NegotiationPhase, NegotiationReport,
    NegotiationState,
};
