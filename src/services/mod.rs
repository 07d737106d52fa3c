//! Service layer for the budget store
//!
//! The orchestrator sits on top of the storage layer and is what the rest
//! of the application talks to.

pub mod debounce;
pub mod orchestrator;

pub use debounce::Debouncer;
pub use orchestrator::{
    OrchestratorOptions, OrchestratorState, StorageOrchestrator, SwitchOutcome, DEFAULT_DEBOUNCE,
};
