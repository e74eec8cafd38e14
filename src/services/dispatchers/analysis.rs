//! Run comparison dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{format_estimate, Dispatcher};
use crate::domain::errors::{OrchestrationError, OrchestrationResult, ToolExecutionError};
use crate::domain::models::{
    AgentKind, DispatchOutput, DispatchResult, EstimateStatistics, PairwiseComparison, Request,
    RoutingDecision, RunComparison, RunId, RunRecord, PCM,
};
use crate::services::context::RequestContext;
use crate::services::tool_invoker::ToolInvoker;
use crate::services::tools::{decode_records, FETCH_RUNS};

pub struct AnalysisDispatcher {
    invoker: Arc<ToolInvoker>,
}

impl AnalysisDispatcher {
    pub fn new(invoker: Arc<ToolInvoker>) -> Self {
        Self { invoker }
    }
}

/// Pairwise and aggregate statistics over `runs`.
///
/// For each pair the estimate difference is compared with the combined
/// one-sigma uncertainty `sqrt(ua² + ub²)`. A pair is significant when the
/// z-score magnitude exceeds `significance_z`; two exact runs (zero combined
/// uncertainty) are significant whenever they differ at all.
pub fn compare_runs(runs: Vec<RunRecord>, significance_z: f64) -> Option<RunComparison> {
    let estimates: Vec<f64> = runs.iter().map(|r| r.estimate).collect();
    let aggregate = EstimateStatistics::from_estimates(&estimates)?;

    let mut pairs = Vec::new();
    for (i, first) in runs.iter().enumerate() {
        for second in &runs[i + 1..] {
            let delta_pcm = (second.estimate - first.estimate) * PCM;
            let combined = first.uncertainty_pcm.hypot(second.uncertainty_pcm);
            let (z_score, significant) = if combined > 0.0 {
                let z = delta_pcm / combined;
                (z, z.abs() > significance_z)
            } else {
                (0.0, delta_pcm != 0.0)
            };
            pairs.push(PairwiseComparison {
                first: first.run_id,
                second: second.run_id,
                delta_pcm,
                combined_uncertainty_pcm: combined,
                z_score,
                significant,
            });
        }
    }

    Some(RunComparison {
        runs,
        pairs,
        aggregate,
    })
}

#[async_trait]
impl Dispatcher for AnalysisDispatcher {
    fn agent(&self) -> AgentKind {
        AgentKind::Analysis
    }

    fn tools(&self) -> &'static [&'static str] {
        &[FETCH_RUNS]
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        _request: &Request,
        _routing: &RoutingDecision,
    ) -> OrchestrationResult<DispatchResult> {
        // First mention wins; a run is never compared with itself.
        let mut run_ids: Vec<RunId> = Vec::with_capacity(ctx.payload.run_ids.len());
        for id in &ctx.payload.run_ids {
            if !run_ids.contains(id) {
                run_ids.push(*id);
            }
        }
        if run_ids.len() < 2 {
            return Err(OrchestrationError::InvalidRequest(format!(
                "a comparison needs at least 2 distinct run ids, got {}",
                run_ids.len()
            )));
        }

        let value = self
            .invoker
            .invoke(ctx, FETCH_RUNS, json!({ "run_ids": run_ids }), None)
            .await?;
        let runs = decode_records(&value).map_err(|e| {
            ToolExecutionError::new(FETCH_RUNS, format!("malformed result: {e}"))
        })?;

        let missing: Vec<String> = run_ids
            .iter()
            .filter(|id| !runs.iter().any(|r| &r.run_id == *id))
            .map(RunId::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(OrchestrationError::InvalidRequest(format!(
                "unknown run ids: {}",
                missing.join(", ")
            )));
        }

        let comparison = compare_runs(runs, ctx.config.dispatch.significance_z).ok_or_else(|| {
            OrchestrationError::InvalidRequest("no runs to compare".to_string())
        })?;
        let summary = summarize(&comparison);
        let suggestions = suggest(&comparison);

        Ok(DispatchResult {
            output: Some(DispatchOutput::Analysis { comparison }),
            summary: Some(summary),
            suggestions,
            ..DispatchResult::default()
        })
    }
}

fn summarize(comparison: &RunComparison) -> String {
    let significant = comparison.pairs.iter().filter(|p| p.significant).count();
    let largest = comparison
        .pairs
        .iter()
        .map(|p| p.delta_pcm.abs())
        .fold(0.0, f64::max);
    format!(
        "Compared {} runs (mean estimate {}): largest difference {:.1} pcm, {} of {} pair(s) significant.",
        comparison.runs.len(),
        format_estimate(comparison.aggregate.mean),
        largest,
        significant,
        comparison.pairs.len()
    )
}

fn suggest(comparison: &RunComparison) -> Vec<String> {
    let significant: Vec<&PairwiseComparison> =
        comparison.pairs.iter().filter(|p| p.significant).collect();
    if significant.is_empty() {
        return vec![
            "No difference is statistically significant; tighten the uncertainties before concluding the runs agree."
                .to_string(),
        ];
    }
    significant
        .into_iter()
        .map(|p| {
            format!(
                "run-{} vs run-{}: {:+.1} pcm at z={:.1}",
                p.first, p.second, p.delta_pcm, p.z_score
            )
        })
        .collect()
}
