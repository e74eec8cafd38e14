//! Domain layer for the simroute orchestration core
//!
//! This module contains the data model, the collaborator ports and the
//! error taxonomy. It has no knowledge of concrete adapters.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{OrchestrationError, OrchestrationResult, ToolExecutionError};
