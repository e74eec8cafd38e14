//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the async trait interfaces the orchestration core
//! consumes from its collaborators:
//! - SimulationEngine: the stochastic simulation black box
//! - RunStore: persistence keyed by spec fingerprint
//! - IntentClassifier: probabilistic routing fallback
//! - Tool: named operations executed through the tool invoker

pub mod errors;
pub mod intent_classifier;
pub mod run_store;
pub mod simulation_engine;
pub mod tool;

pub use errors::{ClassifierError, EngineError, StoreError, ToolError};
pub use intent_classifier::{Classification, IntentClassifier};
pub use run_store::RunStore;
pub use simulation_engine::{SimulationEngine, SimulationOutcome};
pub use tool::Tool;
