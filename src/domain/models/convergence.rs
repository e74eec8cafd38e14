//! Convergence loop state and configuration.

use serde::{Deserialize, Serialize};

/// Parts-per-hundred-thousand.
pub const PCM: f64 = 1.0e5;

/// Convergence run status.
///
/// `Running` is the only non-terminal state. `Converged`: the uncertainty
/// target was met. `Plateaued`: the estimate stopped moving without meeting
/// it. `Exhausted`: no iterations, particle/batch headroom or wall-clock time
/// left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvergenceStatus {
    Running,
    Converged,
    Plateaued,
    Exhausted,
}

impl ConvergenceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Converged => "converged",
            Self::Plateaued => "plateaued",
            Self::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConvergenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "converged" => Ok(Self::Converged),
            "plateaued" => Ok(Self::Plateaued),
            "exhausted" => Ok(Self::Exhausted),
            other => Err(format!("unknown convergence status: {other}")),
        }
    }
}

/// Snapshot of the convergence loop after one simulation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceState {
    /// 1-based count of completed simulation calls.
    pub iteration: u32,
    pub particles: u64,
    pub batches: u32,
    pub estimate: f64,
    pub uncertainty_pcm: f64,
    /// `|estimate - previous_estimate|` in pcm; `None` on the first iteration.
    pub delta_pcm: Option<f64>,
    pub status: ConvergenceStatus,
}

/// Convergence loop parameters.
///
/// Read as an immutable snapshot at the start of every `converge()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConvergenceConfig {
    /// When false, studies run exactly once at their nominal counts.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_target_uncertainty_pcm")]
    pub target_uncertainty_pcm: f64,

    #[serde(default = "default_stable_delta_pcm")]
    pub stable_delta_pcm: f64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_particles")]
    pub max_particles: u64,

    #[serde(default = "default_max_batches")]
    pub max_batches: u32,

    #[serde(default = "default_batches_step")]
    pub batches_step: u32,

    #[serde(default = "default_particles_min_step")]
    pub particles_min_step: u64,

    /// Upper bound on the per-iteration particle multiplier.
    #[serde(default = "default_max_growth_factor")]
    pub max_growth_factor: f64,

    /// Wall-clock ceiling for one convergence run; expiry ends it as exhausted.
    #[serde(default = "default_max_wall_time_secs")]
    pub max_wall_time_secs: u64,

    /// Particle count used when the spec does not carry one.
    #[serde(default = "default_initial_particles")]
    pub initial_particles: u64,

    /// Batch count used when the spec does not carry one.
    #[serde(default = "default_initial_batches")]
    pub initial_batches: u32,
}

const fn default_enabled() -> bool {
    true
}

const fn default_target_uncertainty_pcm() -> f64 {
    50.0
}

const fn default_stable_delta_pcm() -> f64 {
    5.0
}

const fn default_max_iterations() -> u32 {
    8
}

const fn default_max_particles() -> u64 {
    1_000_000
}

const fn default_max_batches() -> u32 {
    500
}

const fn default_batches_step() -> u32 {
    50
}

const fn default_particles_min_step() -> u64 {
    10_000
}

const fn default_max_growth_factor() -> f64 {
    4.0
}

const fn default_max_wall_time_secs() -> u64 {
    3600
}

const fn default_initial_particles() -> u64 {
    10_000
}

const fn default_initial_batches() -> u32 {
    100
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            target_uncertainty_pcm: default_target_uncertainty_pcm(),
            stable_delta_pcm: default_stable_delta_pcm(),
            max_iterations: default_max_iterations(),
            max_particles: default_max_particles(),
            max_batches: default_max_batches(),
            batches_step: default_batches_step(),
            particles_min_step: default_particles_min_step(),
            max_growth_factor: default_max_growth_factor(),
            max_wall_time_secs: default_max_wall_time_secs(),
            initial_particles: default_initial_particles(),
            initial_batches: default_initial_batches(),
        }
    }
}
