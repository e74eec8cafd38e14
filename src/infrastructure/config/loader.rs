use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;
use crate::services::templates;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("Invalid target_uncertainty_pcm: {0}. Must be positive")]
    InvalidTargetUncertainty(f64),

    #[error("Invalid stable_delta_pcm: {0}. Cannot be negative")]
    InvalidStableDelta(f64),

    #[error("Invalid {field}: {value}. Must be at least 1")]
    InvalidLimit { field: &'static str, value: u64 },

    #[error("Invalid max_growth_factor: {0}. Must be at least 1")]
    InvalidGrowthFactor(f64),

    #[error("Invalid sweep_parallelism: 0. Must be at least 1")]
    InvalidSweepParallelism,

    #[error("Invalid significance_z: {0}. Must be positive")]
    InvalidSignificance(f64),

    #[error("Invalid channel_capacity: 0. Must be at least 1")]
    InvalidChannelCapacity,

    #[error("Invalid retained_requests: 0. Must be at least 1")]
    InvalidRetainedRequests,

    #[error("Invalid classifier_timeout_ms: 0. Must be positive")]
    InvalidClassifierTimeout,

    #[error("Invalid min_classifier_confidence: {0}. Must be within [0, 1]")]
    InvalidClassifierConfidence(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid template for '{tool}': {reason}")]
    InvalidTemplate { tool: String, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Load(Box::new(e))
    }
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .simroute/config.yaml (project config)
    /// 3. .simroute/local.yaml (project local overrides, optional)
    /// 4. Environment variables (SIMROUTE_* prefix, `__` for nesting)
    pub fn load() -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".simroute/config.yaml"))
            .merge(Yaml::file(".simroute/local.yaml"))
            .merge(Env::prefixed("SIMROUTE_").split("__"))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file on top of the defaults
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let convergence = &config.convergence;
        if convergence.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(convergence.max_iterations));
        }
        if convergence.target_uncertainty_pcm.is_nan() || convergence.target_uncertainty_pcm <= 0.0 {
            return Err(ConfigError::InvalidTargetUncertainty(
                convergence.target_uncertainty_pcm,
            ));
        }
        if convergence.stable_delta_pcm.is_nan() || convergence.stable_delta_pcm < 0.0 {
            return Err(ConfigError::InvalidStableDelta(convergence.stable_delta_pcm));
        }
        for (field, value) in [
            ("max_particles", convergence.max_particles),
            ("max_batches", u64::from(convergence.max_batches)),
            ("batches_step", u64::from(convergence.batches_step)),
            ("particles_min_step", convergence.particles_min_step),
            ("initial_particles", convergence.initial_particles),
            ("initial_batches", u64::from(convergence.initial_batches)),
            ("max_wall_time_secs", convergence.max_wall_time_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidLimit { field, value });
            }
        }
        if convergence.max_growth_factor.is_nan() || convergence.max_growth_factor < 1.0 {
            return Err(ConfigError::InvalidGrowthFactor(convergence.max_growth_factor));
        }

        if config.dispatch.sweep_parallelism == 0 {
            return Err(ConfigError::InvalidSweepParallelism);
        }
        if config.dispatch.significance_z.is_nan() || config.dispatch.significance_z <= 0.0 {
            return Err(ConfigError::InvalidSignificance(config.dispatch.significance_z));
        }
        if config.events.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity);
        }
        if config.events.retained_requests == 0 {
            return Err(ConfigError::InvalidRetainedRequests);
        }

        if config.routing.classifier_timeout_ms == 0 {
            return Err(ConfigError::InvalidClassifierTimeout);
        }
        if !(0.0..=1.0).contains(&config.routing.min_classifier_confidence) {
            return Err(ConfigError::InvalidClassifierConfidence(
                config.routing.min_classifier_confidence,
            ));
        }

        if config.database.url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        for (tool, template) in &config.templates {
            templates::validate(template).map_err(|reason| ConfigError::InvalidTemplate {
                tool: tool.clone(),
                reason,
            })?;
        }

        Ok(())
    }
}
