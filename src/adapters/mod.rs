//! Infrastructure adapters for external systems.

pub mod classifier;
pub mod memory_store;
pub mod simulation;
pub mod sqlite;
