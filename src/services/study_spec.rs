//! Validated simulation study input.

use serde_json::Value;

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{json_path, ConvergenceConfig, SpecFingerprint};
use crate::services::fingerprint::Fingerprinter;

/// Paths searched, in order, for the nominal particle count.
const PARTICLE_PATHS: [&str; 2] = ["settings.particles", "particles"];
/// Paths searched, in order, for the nominal batch count.
const BATCH_PATHS: [&str; 2] = ["settings.batches", "batches"];

/// A fingerprinted spec with its nominal particle and batch counts.
#[derive(Debug, Clone, PartialEq)]
pub struct StudySpec {
    pub spec: Value,
    pub fingerprint: SpecFingerprint,
    pub particles: u64,
    pub batches: u32,
}

impl StudySpec {
    /// Validate and fingerprint `spec`.
    ///
    /// Counts missing from the spec fall back to the configured initial
    /// values; counts present must be positive integers.
    pub fn from_spec(
        spec: Value,
        fingerprinter: &Fingerprinter,
        config: &ConvergenceConfig,
    ) -> OrchestrationResult<Self> {
        let fingerprint = fingerprinter.fingerprint(&spec)?;
        let particles = match find_count(&spec, &PARTICLE_PATHS)? {
            Some(n) => n,
            None => config.initial_particles,
        };
        let batches = match find_count(&spec, &BATCH_PATHS)? {
            Some(n) => u32::try_from(n).map_err(|_| {
                OrchestrationError::InvalidSpec(format!("batch count {n} is too large"))
            })?,
            None => config.initial_batches,
        };
        Ok(Self {
            spec,
            fingerprint,
            particles,
            batches,
        })
    }
}

fn find_count(spec: &Value, paths: &[&str]) -> OrchestrationResult<Option<u64>> {
    for path in paths {
        if let Some(value) = json_path::value_at(spec, path) {
            return positive_integer(value)
                .map(Some)
                .ok_or_else(|| {
                    OrchestrationError::InvalidSpec(format!(
                        "'{path}' must be a positive integer, got {value}"
                    ))
                });
        }
    }
    Ok(None)
}

fn positive_integer(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return (n > 0).then_some(n);
    }
    // Accept integral floats such as `1e6`.
    let f = value.as_f64()?;
    (f >= 1.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}
