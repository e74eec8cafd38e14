//! Infrastructure layer module
//!
//! Process-wide concerns that are not collaborators of the pipeline:
//! - Configuration loading, validation and hot reload
//! - Logging infrastructure

pub mod config;
pub mod logging;
