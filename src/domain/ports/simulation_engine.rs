use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::EngineError;

/// Estimate and one-sigma statistical uncertainty from one simulation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub estimate: f64,
    pub uncertainty_pcm: f64,
}

impl SimulationOutcome {
    pub fn new(estimate: f64, uncertainty_pcm: f64) -> Self {
        Self {
            estimate,
            uncertainty_pcm,
        }
    }

    /// Finite estimate and a finite, non-negative uncertainty.
    pub fn is_well_formed(&self) -> bool {
        self.estimate.is_finite() && self.uncertainty_pcm.is_finite() && self.uncertainty_pcm >= 0.0
    }
}

/// Black-box stochastic simulation.
///
/// May take seconds to minutes per call. Only ever invoked through the
/// tool invoker so identical calls are deduplicated.
#[async_trait]
pub trait SimulationEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Run `spec` with the given particle and batch counts.
    async fn run(
        &self,
        spec: &serde_json::Value,
        particles: u64,
        batches: u32,
    ) -> Result<SimulationOutcome, EngineError>;
}
