//! Single-study dispatcher: validate the spec, drive it to convergence and
//! record the run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{format_estimate, Dispatcher};
use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{
    AgentKind, ConvergenceConfig, ConvergenceState, ConvergenceStatus, DispatchOutput, DispatchResult, Request,
    RoutingDecision, RunId, RunRecord,
};
use crate::domain::ports::RunStore;
use crate::services::context::RequestContext;
use crate::services::convergence_controller::ConvergenceController;
use crate::services::fingerprint::Fingerprinter;
use crate::services::study_spec::StudySpec;
use crate::services::tools::RUN_SIMULATION;

pub struct StudiesDispatcher {
    controller: Arc<ConvergenceController>,
    store: Arc<dyn RunStore>,
}

impl StudiesDispatcher {
    pub fn new(controller: Arc<ConvergenceController>, store: Arc<dyn RunStore>) -> Self {
        Self { controller, store }
    }

    async fn previous_run(&self, study: &StudySpec) -> Option<RunRecord> {
        match self.store.get(&study.fingerprint).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(fingerprint = %study.fingerprint.short(), error = %e, "run store lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl Dispatcher for StudiesDispatcher {
    fn agent(&self) -> AgentKind {
        AgentKind::Studies
    }

    fn tools(&self) -> &'static [&'static str] {
        &[RUN_SIMULATION]
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        _request: &Request,
        _routing: &RoutingDecision,
    ) -> OrchestrationResult<DispatchResult> {
        let spec = ctx.payload.spec.clone().ok_or_else(|| {
            OrchestrationError::InvalidRequest("a study needs a simulation spec".to_string())
        })?;
        let fingerprinter = Fingerprinter::from_config(&ctx.config.invoker);
        let study = StudySpec::from_spec(spec, &fingerprinter, &ctx.config.convergence)?;
        let previous = self.previous_run(&study).await;

        let run = self
            .controller
            .converge(ctx, &study, &ctx.config.convergence)
            .await?;
        let final_state = run.final_state.clone();

        let record = RunRecord {
            run_id: RunId::new(),
            fingerprint: study.fingerprint.clone(),
            spec: study.spec.clone(),
            estimate: final_state.estimate,
            uncertainty_pcm: final_state.uncertainty_pcm,
            particles: final_state.particles,
            batches: final_state.batches,
            convergence: Some(final_state.status),
            iterations: Some(final_state.iteration),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.put(&study.fingerprint, record.clone()).await {
            tracing::warn!(
                request_id = %ctx.request_id,
                run_id = %record.run_id,
                error = %e,
                "failed to persist study result"
            );
        }

        let summary = summarize(&study, &final_state);
        let suggestions = suggest(&final_state, &record, previous.as_ref(), &ctx.config.convergence);

        Ok(DispatchResult {
            convergence: Some(final_state),
            convergence_trace: run.trace,
            output: Some(DispatchOutput::Study { record }),
            summary: Some(summary),
            suggestions,
        })
    }
}

fn summarize(study: &StudySpec, state: &ConvergenceState) -> String {
    format!(
        "Study {}: estimate {} ± {:.1} pcm after {} iteration(s) at {} particles x {} batches ({}).",
        study.fingerprint.short(),
        format_estimate(state.estimate),
        state.uncertainty_pcm,
        state.iteration,
        state.particles,
        state.batches,
        state.status
    )
}

fn suggest(
    state: &ConvergenceState,
    record: &RunRecord,
    previous: Option<&RunRecord>,
    config: &ConvergenceConfig,
) -> Vec<String> {
    let mut suggestions = Vec::new();
    match state.status {
        ConvergenceStatus::Converged => {}
        ConvergenceStatus::Plateaued => suggestions.push(format!(
            "Estimate is stable but uncertainty {:.1} pcm is above the {:.1} pcm target; raise convergence.max_particles or accept the result.",
            state.uncertainty_pcm, config.target_uncertainty_pcm
        )),
        ConvergenceStatus::Exhausted => suggestions.push(format!(
            "Gave up at {:.1} pcm (target {:.1} pcm); raise convergence.max_iterations, max_particles or max_batches.",
            state.uncertainty_pcm, config.target_uncertainty_pcm
        )),
        ConvergenceStatus::Running => {}
    }
    if let Some(previous) = previous {
        suggestions.push(format!(
            "This spec was run before as run-{}; compare with: compare run-{} run-{}",
            previous.run_id, previous.run_id, record.run_id
        ));
    }
    suggestions
}
