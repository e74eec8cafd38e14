//! Adaptive convergence loop.
//!
//! Re-runs the simulation with escalating particle and batch counts until the
//! statistical uncertainty meets its target (`converged`), successive estimates
//! stop moving (`plateaued`), or there is nothing left to spend: iterations,
//! particle/batch headroom or wall-clock time (`exhausted`). Stopping checks
//! run in that order, so an iteration that satisfies both the target and the
//! plateau condition reports `converged`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use crate::domain::errors::{OrchestrationError, OrchestrationResult, ToolExecutionError};
use crate::domain::models::{ConvergenceConfig, ConvergenceState, ConvergenceStatus, PCM};
use crate::domain::ports::SimulationOutcome;
use crate::services::context::RequestContext;
use crate::services::event_bus::EventPayload;
use crate::services::study_spec::StudySpec;
use crate::services::tool_invoker::ToolInvoker;
use crate::services::tools::{decode_outcome, RUN_SIMULATION};

/// Outcome of one `converge()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceRun {
    /// Terminal state.
    pub final_state: ConvergenceState,
    /// Every iteration in order; the last entry equals `final_state`.
    pub trace: Vec<ConvergenceState>,
}

/// Drives repeated `run_simulation` calls through the tool invoker.
pub struct ConvergenceController {
    invoker: Arc<ToolInvoker>,
}

impl ConvergenceController {
    pub fn new(invoker: Arc<ToolInvoker>) -> Self {
        Self { invoker }
    }

    /// Run `study` to a terminal state under `config`.
    ///
    /// `config` is a snapshot; reloads during the run are not observed.
    /// A failed simulation call fails the whole run.
    pub async fn converge(
        &self,
        ctx: &RequestContext,
        study: &StudySpec,
        config: &ConvergenceConfig,
    ) -> OrchestrationResult<ConvergenceRun> {
        if !config.enabled {
            return self.run_once(ctx, study).await;
        }

        let deadline = Instant::now() + Duration::from_secs(config.max_wall_time_secs);
        let mut particles = study.particles;
        let mut batches = study.batches;
        let mut previous_estimate: Option<f64> = None;
        let mut trace: Vec<ConvergenceState> = Vec::new();

        for iteration in 1..=config.max_iterations {
            if iteration > 1 && Instant::now() >= deadline {
                tracing::info!(request_id = %ctx.request_id, iteration, "convergence wall-clock limit reached");
                return exhaust(ctx, trace);
            }

            let call = self.simulate(ctx, study, particles, batches, iteration);
            let outcome = if iteration == 1 {
                call.await?
            } else {
                match tokio::time::timeout_at(deadline, call).await {
                    Ok(result) => result?,
                    Err(_) => {
                        tracing::info!(
                            request_id = %ctx.request_id,
                            iteration,
                            "convergence wall-clock limit reached mid-iteration"
                        );
                        return exhaust(ctx, trace);
                    }
                }
            };

            let delta_pcm = previous_estimate.map(|prev| (outcome.estimate - prev).abs() * PCM);
            let status = stopping_status(
                iteration,
                particles,
                batches,
                outcome.uncertainty_pcm,
                delta_pcm,
                config,
            );
            let state = ConvergenceState {
                iteration,
                particles,
                batches,
                estimate: outcome.estimate,
                uncertainty_pcm: outcome.uncertainty_pcm,
                delta_pcm,
                status,
            };
            tracing::info!(
                request_id = %ctx.request_id,
                fingerprint = %study.fingerprint.short(),
                iteration,
                particles,
                batches,
                estimate = outcome.estimate,
                uncertainty_pcm = outcome.uncertainty_pcm,
                delta_pcm = ?delta_pcm,
                status = %status,
                "convergence iteration"
            );
            ctx.publish(EventPayload::ConvergenceIteration(state.clone()));
            trace.push(state.clone());

            if status.is_terminal() {
                return Ok(ConvergenceRun {
                    final_state: state,
                    trace,
                });
            }

            (particles, batches) = escalate(&state, config);
            previous_estimate = Some(outcome.estimate);
        }

        // Only reachable with max_iterations == 0, which validation rejects.
        Err(OrchestrationError::InvalidRequest(
            "convergence requires at least one iteration".to_string(),
        ))
    }

    /// Convergence disabled: one call at nominal counts, reported as converged.
    async fn run_once(
        &self,
        ctx: &RequestContext,
        study: &StudySpec,
    ) -> OrchestrationResult<ConvergenceRun> {
        let outcome = self
            .simulate(ctx, study, study.particles, study.batches, 1)
            .await?;
        let state = ConvergenceState {
            iteration: 1,
            particles: study.particles,
            batches: study.batches,
            estimate: outcome.estimate,
            uncertainty_pcm: outcome.uncertainty_pcm,
            delta_pcm: None,
            status: ConvergenceStatus::Converged,
        };
        ctx.publish(EventPayload::ConvergenceIteration(state.clone()));
        Ok(ConvergenceRun {
            final_state: state.clone(),
            trace: vec![state],
        })
    }

    async fn simulate(
        &self,
        ctx: &RequestContext,
        study: &StudySpec,
        particles: u64,
        batches: u32,
        iteration: u32,
    ) -> OrchestrationResult<SimulationOutcome> {
        let args = simulation_args(&study.spec, particles, batches);
        let value = self
            .invoker
            .invoke_labeled(ctx, RUN_SIMULATION, args, Some(&study.fingerprint), Some(iteration))
            .await?;
        decode_outcome(&value).map_err(|e| {
            ToolExecutionError::new(RUN_SIMULATION, format!("malformed result: {e}")).into()
        })
    }
}

pub(crate) fn simulation_args(spec: &Value, particles: u64, batches: u32) -> Value {
    json!({
        "spec": spec,
        "particles": particles,
        "batches": batches,
    })
}

/// Terminal status for an iteration, or `Running` to keep going.
fn stopping_status(
    iteration: u32,
    particles: u64,
    batches: u32,
    uncertainty_pcm: f64,
    delta_pcm: Option<f64>,
    config: &ConvergenceConfig,
) -> ConvergenceStatus {
    if uncertainty_pcm <= config.target_uncertainty_pcm {
        ConvergenceStatus::Converged
    } else if delta_pcm.is_some_and(|delta| delta <= config.stable_delta_pcm) {
        ConvergenceStatus::Plateaued
    } else if particles >= config.max_particles && batches >= config.max_batches {
        ConvergenceStatus::Exhausted
    } else if iteration >= config.max_iterations {
        ConvergenceStatus::Exhausted
    } else {
        ConvergenceStatus::Running
    }
}

/// Mark the last completed iteration exhausted after running out of time.
fn exhaust(
    ctx: &RequestContext,
    mut trace: Vec<ConvergenceState>,
) -> OrchestrationResult<ConvergenceRun> {
    let Some(last) = trace.last_mut() else {
        return Err(OrchestrationError::InvalidRequest(
            "wall-clock limit reached before the first iteration completed".to_string(),
        ));
    };
    last.status = ConvergenceStatus::Exhausted;
    let final_state = last.clone();
    ctx.publish(EventPayload::ConvergenceIteration(final_state.clone()));
    Ok(ConvergenceRun { final_state, trace })
}

/// Particle and batch counts for the next iteration.
///
/// Batches grow by `batches_step`. Particles follow the σ ∝ 1/√N law: project
/// the total histories needed to reach the target, spread them over the next
/// batch count, and clamp the result to `[particles + particles_min_step,
/// particles * max_growth_factor]` within `max_particles`. Neither count ever
/// decreases.
pub fn escalate(state: &ConvergenceState, config: &ConvergenceConfig) -> (u64, u32) {
    let next_batches = state
        .batches
        .saturating_add(config.batches_step)
        .min(config.max_batches)
        .max(state.batches);

    let ratio = state.uncertainty_pcm / config.target_uncertainty_pcm;
    let histories = state.particles as f64 * f64::from(state.batches) * ratio * ratio;
    let projected = histories / f64::from(next_batches.max(1));
    let ceiling = state.particles as f64 * config.max_growth_factor.max(1.0);
    let proposal = projected.min(ceiling);
    let proposal = if proposal.is_finite() {
        proposal.ceil() as u64
    } else {
        u64::MAX
    };

    let next_particles = proposal
        .max(state.particles.saturating_add(config.particles_min_step))
        .min(config.max_particles)
        .max(state.particles);
    (next_particles, next_batches)
}
