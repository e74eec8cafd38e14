//! Read-only run lookup dispatcher.

use std::sync::Arc;

use async_trait::async_trait;

use super::{format_estimate, Dispatcher};
use crate::domain::errors::{OrchestrationError, OrchestrationResult, ToolExecutionError};
use crate::domain::models::{
    AgentKind, ConvergenceStatus, DispatchOutput, DispatchResult, Request, RequestPayload,
    RoutingDecision, RunQuery, RunRecord, SpecFingerprint,
};
use crate::services::context::RequestContext;
use crate::services::fingerprint::Fingerprinter;
use crate::services::tool_invoker::ToolInvoker;
use crate::services::tools::{decode_records, SEARCH_RUNS};

/// Filter keys with a dedicated meaning instead of spec field equality.
const STATUS_KEYS: [&str; 2] = ["status", "convergence"];
const FINGERPRINT_KEY: &str = "fingerprint";

pub struct QueryDispatcher {
    invoker: Arc<ToolInvoker>,
}

impl QueryDispatcher {
    pub fn new(invoker: Arc<ToolInvoker>) -> Self {
        Self { invoker }
    }
}

/// Translate router-extracted criteria into a `RunQuery`.
pub fn build_query(payload: &RequestPayload, default_limit: usize, fingerprinter: &Fingerprinter) -> OrchestrationResult<RunQuery> {
    let mut query = RunQuery {
        run_ids: payload.run_ids.clone(),
        limit: Some(payload.limit.unwrap_or(default_limit)),
        ..RunQuery::default()
    };

    for (key, value) in &payload.filters {
        if STATUS_KEYS.contains(&key.as_str()) {
            let raw = value.as_str().unwrap_or_default();
            let status: ConvergenceStatus = raw
                .parse()
                .map_err(OrchestrationError::InvalidRequest)?;
            query.convergence = Some(status);
        } else if key == FINGERPRINT_KEY {
            let raw = value.as_str().unwrap_or_default().to_ascii_lowercase();
            if raw.len() != 64 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(OrchestrationError::InvalidRequest(format!(
                    "'{raw}' is not a spec fingerprint"
                )));
            }
            query.fingerprint = Some(SpecFingerprint::from_hex(raw));
        } else {
            query.spec_filters.insert(key.clone(), value.clone());
        }
    }

    // A spec attached to a lookup means "runs of exactly this spec".
    if query.fingerprint.is_none() {
        if let Some(spec) = &payload.spec {
            query.fingerprint = Some(fingerprinter.fingerprint(spec)?);
        }
    }
    Ok(query)
}

#[async_trait]
impl Dispatcher for QueryDispatcher {
    fn agent(&self) -> AgentKind {
        AgentKind::Query
    }

    fn tools(&self) -> &'static [&'static str] {
        &[SEARCH_RUNS]
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        _request: &Request,
        _routing: &RoutingDecision,
    ) -> OrchestrationResult<DispatchResult> {
        let fingerprinter = Fingerprinter::from_config(&ctx.config.invoker);
        let query = build_query(&ctx.payload, ctx.config.dispatch.default_query_limit, &fingerprinter)?;
        let args = serde_json::to_value(&query)
            .map_err(|e| OrchestrationError::InvalidRequest(format!("unencodable query: {e}")))?;
        let value = self.invoker.invoke(ctx, SEARCH_RUNS, args, None).await?;
        let records = decode_records(&value).map_err(|e| {
            ToolExecutionError::new(SEARCH_RUNS, format!("malformed result: {e}"))
        })?;

        let summary = summarize(&records);
        let suggestions = suggest(&records);
        Ok(DispatchResult {
            output: Some(DispatchOutput::Query { records }),
            summary: Some(summary),
            suggestions,
            ..DispatchResult::default()
        })
    }
}

fn summarize(records: &[RunRecord]) -> String {
    match records {
        [] => "No stored runs match.".to_string(),
        [only] => format!(
            "Found 1 run: run-{} estimate {} ± {:.1} pcm.",
            only.run_id,
            format_estimate(only.estimate),
            only.uncertainty_pcm
        ),
        [newest, ..] => format!(
            "Found {} runs; newest run-{} estimate {} ± {:.1} pcm.",
            records.len(),
            newest.run_id,
            format_estimate(newest.estimate),
            newest.uncertainty_pcm
        ),
    }
}

fn suggest(records: &[RunRecord]) -> Vec<String> {
    match records {
        [] => vec!["Broaden the filters or drop the limit.".to_string()],
        [a, b, ..] => vec![format!("Compare the two newest: compare run-{} run-{}", a.run_id, b.run_id)],
        _ => Vec::new(),
    }
}
