//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - YAML file loading
//! - Environment variable overrides
//! - Configuration validation
//! - Hot reload through [`ConfigHandle`]

pub mod handle;
pub mod loader;

pub use handle::ConfigHandle;
pub use loader::{ConfigError, ConfigLoader};
