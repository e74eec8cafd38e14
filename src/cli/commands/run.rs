//! `simroute run`: route one request, stream its events, print the result.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use crate::adapters::classifier::AnthropicIntentClassifier;
use crate::adapters::simulation::{CommandSimulationEngine, SyntheticSimulationEngine};
use crate::adapters::sqlite::{create_pool, SqliteRunStore};
use crate::cli::output::{convergence_table, output, runs_table, sweep_table, CommandOutput};
use crate::domain::models::{
    Config, DispatchOutput, Request, RequestPayload, RequestResult, RequestStatus, RoutingMode,
};
use crate::domain::ports::{IntentClassifier, SimulationEngine};
use crate::infrastructure::config::ConfigHandle;
use crate::services::event_bus::{EventSeverity, RequestEvent};
use crate::services::orchestrator::Orchestrator;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Natural-language request
    pub text: String,

    /// JSON or YAML request payload (spec, sweep, filters, run_ids, limit)
    #[arg(short, long)]
    pub payload: Option<PathBuf>,

    /// Ask the external classifier first
    #[arg(long)]
    pub probabilistic: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct RunOutput {
    #[serde(flatten)]
    pub result: RequestResult,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let r = &self.result;
        let mut lines = vec![
            format!("Request: {}", r.request_id),
            format!(
                "Routed to: {} ({}, {} confidence {:.2})",
                r.routing.agent, r.routing.intent, r.routing.method, r.routing.confidence
            ),
            format!("Status: {}", r.status),
        ];

        if let Some(ref error) = r.error {
            lines.push(format!("Error [{}]: {}", error.kind, error.message));
        }
        if let Some(ref summary) = r.summary {
            lines.push(String::new());
            lines.push(summary.clone());
        }

        if !r.convergence_trace.is_empty() {
            lines.push(String::new());
            lines.push(convergence_table(&r.convergence_trace));
        }
        match r.output {
            Some(DispatchOutput::Sweep {
                ref parameter,
                ref points,
                ..
            }) => {
                lines.push(String::new());
                lines.push(sweep_table(parameter, points));
            }
            Some(DispatchOutput::Query { ref records }) if !records.is_empty() => {
                lines.push(String::new());
                lines.push(runs_table(records));
            }
            Some(DispatchOutput::Analysis { ref comparison }) => {
                lines.push(String::new());
                lines.push(runs_table(&comparison.runs));
                for pair in &comparison.pairs {
                    lines.push(format!(
                        "  {} vs {}: Δ {:+.1} pcm, σ {:.1} pcm, z {:.2}{}",
                        pair.first,
                        pair.second,
                        pair.delta_pcm,
                        pair.combined_uncertainty_pcm,
                        pair.z_score,
                        if pair.significant { " (significant)" } else { "" }
                    ));
                }
            }
            _ => {}
        }

        if !r.suggestions.is_empty() {
            lines.push(String::new());
            lines.push("Suggestions:".to_string());
            for suggestion in &r.suggestions {
                lines.push(format!("  - {suggestion}"));
            }
        }
        lines.push(format!("\n{} tool call(s)", r.tool_calls.len()));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.result).unwrap_or_default()
    }
}

fn read_payload(path: &std::path::Path) -> Result<RequestPayload> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("Failed to parse payload {}", path.display()))
}

fn build_engine(config: &Config) -> Result<Arc<dyn SimulationEngine>> {
    if config.simulation.command.is_some() {
        let engine = CommandSimulationEngine::from_config(&config.simulation)
            .context("Failed to configure simulation engine")?;
        return Ok(Arc::new(engine));
    }
    tracing::warn!("simulation.command not set; using the synthetic engine");
    Ok(Arc::new(SyntheticSimulationEngine::default()))
}

fn build_classifier(config: &Config) -> Option<Arc<dyn IntentClassifier>> {
    if !config.classifier.enabled {
        return None;
    }
    match AnthropicIntentClassifier::from_config(&config.classifier) {
        Ok(classifier) => Some(Arc::new(classifier)),
        Err(e) => {
            tracing::warn!(error = %e, "classifier disabled");
            None
        }
    }
}

fn log_event(event: &RequestEvent) {
    let payload = serde_json::to_string(&event.payload).unwrap_or_default();
    match event.severity {
        EventSeverity::Error => tracing::error!(seq = event.sequence.0, event = event.payload.name(), %payload, "event"),
        EventSeverity::Warning => tracing::warn!(seq = event.sequence.0, event = event.payload.name(), %payload, "event"),
        EventSeverity::Info => tracing::info!(seq = event.sequence.0, event = event.payload.name(), %payload, "event"),
        EventSeverity::Debug => tracing::debug!(seq = event.sequence.0, event = event.payload.name(), %payload, "event"),
    }
}

/// Returns whether the request completed; a failed request is reported in
/// the printed result rather than as an error.
pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<bool> {
    let payload = match args.payload {
        Some(ref path) => read_payload(path)?,
        None => RequestPayload::default(),
    };
    let mode = if args.probabilistic {
        RoutingMode::Probabilistic
    } else {
        config.routing.default_mode
    };

    let pool = create_pool(&config.database)
        .await
        .context("Failed to open run database")?;
    let store = SqliteRunStore::connect(pool)
        .await
        .context("Failed to prepare run database")?;
    let engine = build_engine(&config)?;
    let classifier = build_classifier(&config);

    let mut builder = Orchestrator::builder()
        .engine(engine)
        .store(Arc::new(store))
        .config(ConfigHandle::new(config).context("Configuration is invalid")?);
    if let Some(classifier) = classifier {
        builder = builder.classifier(classifier);
    }
    let orchestrator = Arc::new(builder.build()?);

    let request = Request::new(args.text).with_mode(mode).with_payload(payload);
    let request_id = request.id;
    let mut events = orchestrator.subscribe(request_id);
    let streamer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            log_event(&event);
        }
    });

    let handle = orchestrator.submit(request);
    let canceller = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel(request_id);
            }
        })
    };

    let result = handle.await.context("Request task failed")?;
    canceller.abort();
    streamer.await.context("Event stream task failed")?;

    output(
        &RunOutput {
            result: (*result).clone(),
        },
        json_mode,
    );
    Ok(result.status == RequestStatus::Completed)
}
