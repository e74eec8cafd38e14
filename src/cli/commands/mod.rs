//! CLI command implementations.

pub mod config;
pub mod fingerprint;
pub mod run;
