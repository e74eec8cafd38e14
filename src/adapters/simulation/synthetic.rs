//! Deterministic stand-in engine for demos and local runs.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::ports::{EngineError, SimulationEngine, SimulationOutcome};

/// Produces a spec-dependent "true" value plus noise whose one-sigma width
/// shrinks as `1/sqrt(particles * batches)`.
///
/// The same inputs always give the same outcome.
#[derive(Debug, Clone)]
pub struct SyntheticSimulationEngine {
    /// One-sigma uncertainty in pcm for a single history.
    sigma_per_history_pcm: f64,
}

impl Default for SyntheticSimulationEngine {
    fn default() -> Self {
        Self {
            sigma_per_history_pcm: 50_000.0,
        }
    }
}

impl SyntheticSimulationEngine {
    pub fn new(sigma_per_history_pcm: f64) -> Self {
        Self {
            sigma_per_history_pcm,
        }
    }

    fn digest(spec: &serde_json::Value, salt: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(spec.to_string().as_bytes());
        hasher.update(salt);
        hasher.finalize().into()
    }

    /// Map the first 8 bytes of `bytes` onto `[0, 1)`.
    fn unit(bytes: &[u8; 32]) -> f64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[async_trait]
impl SimulationEngine for SyntheticSimulationEngine {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn run(
        &self,
        spec: &serde_json::Value,
        particles: u64,
        batches: u32,
    ) -> Result<SimulationOutcome, EngineError> {
        let histories = particles.saturating_mul(u64::from(batches));
        if histories == 0 {
            return Err(EngineError::Failed("no histories requested".to_string()));
        }

        let truth = 0.9 + 0.2 * Self::unit(&Self::digest(spec, b"truth"));
        let sigma_pcm = self.sigma_per_history_pcm / (histories as f64).sqrt();

        let mut salt = particles.to_be_bytes().to_vec();
        salt.extend_from_slice(&batches.to_be_bytes());
        let noise = 2.0 * Self::unit(&Self::digest(spec, &salt)) - 1.0;

        Ok(SimulationOutcome::new(
            truth + noise * sigma_pcm * 1e-5,
            sigma_pcm,
        ))
    }
}
