//! Simulation engine adapters.
//!
//! - [`CommandSimulationEngine`]: runs an external executable per call
//! - [`SyntheticSimulationEngine`]: deterministic stand-in with 1/sqrt(N) noise
//! - [`ScriptedSimulationEngine`]: queued outcomes for tests

pub mod command;
pub mod scripted;
pub mod synthetic;

pub use command::CommandSimulationEngine;
pub use scripted::ScriptedSimulationEngine;
pub use synthetic::SyntheticSimulationEngine;
