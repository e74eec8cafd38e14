//! Parameter sweep dispatcher.
//!
//! Substitutes each value into the base spec, runs one simulation per value
//! with bounded parallelism and only computes statistics once every point has
//! finished. One failed point fails the sweep.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;

use super::{format_estimate, Dispatcher};
use crate::domain::errors::{OrchestrationError, OrchestrationResult, ToolExecutionError};
use crate::domain::models::{
    json_path, AgentKind, DispatchOutput, DispatchResult, EstimateStatistics, Request,
    RoutingDecision, RunId, RunRecord, SweepParameters, SweepPoint,
};
use crate::domain::ports::{RunStore, SimulationOutcome};
use crate::services::context::RequestContext;
use crate::services::convergence_controller::simulation_args;
use crate::services::fingerprint::Fingerprinter;
use crate::services::study_spec::StudySpec;
use crate::services::tool_invoker::ToolInvoker;
use crate::services::tools::{decode_outcome, RUN_SIMULATION};

pub struct SweepDispatcher {
    invoker: Arc<ToolInvoker>,
    store: Arc<dyn RunStore>,
}

impl SweepDispatcher {
    pub fn new(invoker: Arc<ToolInvoker>, store: Arc<dyn RunStore>) -> Self {
        Self { invoker, store }
    }

    /// Build and validate every point before anything runs.
    fn plan(&self, ctx: &RequestContext) -> OrchestrationResult<(SweepParameters, Vec<StudySpec>)> {
        let sweep = ctx.payload.sweep.clone().ok_or_else(|| {
            OrchestrationError::InvalidRequest(
                "a sweep needs a parameter and a list of values".to_string(),
            )
        })?;
        if sweep.values.len() < 2 {
            return Err(OrchestrationError::InvalidRequest(format!(
                "a sweep needs at least 2 values, got {}",
                sweep.values.len()
            )));
        }
        let base = ctx.payload.spec.clone().ok_or_else(|| {
            OrchestrationError::InvalidRequest("a sweep needs a base simulation spec".to_string())
        })?;

        let fingerprinter = Fingerprinter::from_config(&ctx.config.invoker);
        let points = sweep
            .values
            .iter()
            .map(|value| {
                let mut spec = base.clone();
                json_path::set_at(&mut spec, &sweep.parameter, value.clone()).map_err(|e| {
                    OrchestrationError::InvalidRequest(format!(
                        "cannot set '{}': {e}",
                        sweep.parameter
                    ))
                })?;
                StudySpec::from_spec(spec, &fingerprinter, &ctx.config.convergence)
            })
            .collect::<OrchestrationResult<Vec<_>>>()?;
        Ok((sweep, points))
    }

    async fn run_point(
        &self,
        ctx: &RequestContext,
        permits: &Semaphore,
        study: &StudySpec,
    ) -> OrchestrationResult<SimulationOutcome> {
        let _permit = permits
            .acquire()
            .await
            .map_err(|_| OrchestrationError::Cancelled)?;
        let args = simulation_args(&study.spec, study.particles, study.batches);
        let value = self
            .invoker
            .invoke(ctx, RUN_SIMULATION, args, Some(&study.fingerprint))
            .await?;
        decode_outcome(&value).map_err(|e| {
            ToolExecutionError::new(RUN_SIMULATION, format!("malformed result: {e}")).into()
        })
    }

    async fn persist(&self, ctx: &RequestContext, study: &StudySpec, outcome: &SimulationOutcome) -> Option<RunId> {
        let record = RunRecord {
            run_id: RunId::new(),
            fingerprint: study.fingerprint.clone(),
            spec: study.spec.clone(),
            estimate: outcome.estimate,
            uncertainty_pcm: outcome.uncertainty_pcm,
            particles: study.particles,
            batches: study.batches,
            convergence: None,
            iterations: None,
            created_at: Utc::now(),
        };
        let run_id = record.run_id;
        match self.store.put(&study.fingerprint, record).await {
            Ok(()) => Some(run_id),
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id, error = %e, "failed to persist sweep point");
                None
            }
        }
    }
}

#[async_trait]
impl Dispatcher for SweepDispatcher {
    fn agent(&self) -> AgentKind {
        AgentKind::Sweep
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
        let (sweep, studies) = self.plan(ctx)?;
        let parallelism = ctx.config.dispatch.sweep_parallelism.max(1);
        tracing::info!(
            request_id = %ctx.request_id,
            parameter = %sweep.parameter,
            points = studies.len(),
            parallelism,
            "starting sweep"
        );

        let permits = Semaphore::new(parallelism);
        // Barrier: every point finishes (or fails) before anything is aggregated.
        let outcomes = join_all(
            studies
                .iter()
                .map(|study| self.run_point(ctx, &permits, study)),
        )
        .await;

        let mut points = Vec::with_capacity(studies.len());
        for ((value, study), outcome) in sweep.values.iter().zip(&studies).zip(outcomes) {
            let outcome = outcome?;
            points.push((value.clone(), study, outcome));
        }

        let mut sweep_points = Vec::with_capacity(points.len());
        for (value, study, outcome) in points {
            let run_id = self.persist(ctx, study, &outcome).await;
            sweep_points.push(SweepPoint {
                value,
                fingerprint: study.fingerprint.clone(),
                estimate: outcome.estimate,
                uncertainty_pcm: outcome.uncertainty_pcm,
                run_id,
            });
        }

        let estimates: Vec<f64> = sweep_points.iter().map(|p| p.estimate).collect();
        let statistics = EstimateStatistics::from_estimates(&estimates).ok_or_else(|| {
            OrchestrationError::InvalidRequest("sweep produced no points".to_string())
        })?;

        let summary = format!(
            "Swept {} over {} values: mean estimate {} (min {}, max {}, spread {:.1} pcm).",
            sweep.parameter,
            statistics.count,
            format_estimate(statistics.mean),
            format_estimate(statistics.min),
            format_estimate(statistics.max),
            statistics.spread_pcm
        );
        let suggestions = suggest(&sweep.parameter, &sweep_points);

        Ok(DispatchResult {
            convergence: None,
            convergence_trace: Vec::new(),
            output: Some(DispatchOutput::Sweep {
                parameter: sweep.parameter,
                points: sweep_points,
                statistics,
            }),
            summary: Some(summary),
            suggestions,
        })
    }
}

fn suggest(parameter: &str, points: &[SweepPoint]) -> Vec<String> {
    let peak = points.iter().max_by(|a, b| a.estimate.total_cmp(&b.estimate));
    let noisiest = points
        .iter()
        .max_by(|a, b| a.uncertainty_pcm.total_cmp(&b.uncertainty_pcm));
    let mut suggestions = Vec::new();
    if let Some(peak) = peak {
        suggestions.push(format!(
            "Run a converged study at {parameter}={} (highest estimate).",
            peak.value
        ));
    }
    if let (Some(peak), Some(noisiest)) = (peak, noisiest) {
        if noisiest.value != peak.value {
            suggestions.push(format!(
                "Point {parameter}={} is the least precise ({:.1} pcm); refine it before drawing trends.",
                noisiest.value, noisiest.uncertainty_pcm
            ));
        }
    }
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SpecFingerprint;
    use serde_json::json;

    fn point(value: i64, estimate: f64, uncertainty_pcm: f64) -> SweepPoint {
        SweepPoint {
            value: json!(value),
            fingerprint: SpecFingerprint::from_hex("01".repeat(32)),
            estimate,
            uncertainty_pcm,
            run_id: None,
        }
    }

    #[test]
    fn test_suggestions_point_at_peak_and_noisiest() {
        let points = vec![point(3, 0.98, 40.0), point(4, 1.02, 35.0), point(5, 1.01, 90.0)];
        let suggestions = suggest("enrichment", &points);
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions[0].contains("enrichment=4"));
        assert!(suggestions[1].contains("enrichment=5"));
    }
}
