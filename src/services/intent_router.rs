//! Intent router.
//!
//! Maps a request onto one of the four specialist dispatchers. The default
//! deterministic path evaluates an ordered list of regex rules and never leaves
//! the process. The probabilistic path asks an external classifier first and
//! falls back to the rules on any failure, timeout or unusable answer; routing
//! itself never fails.
//!
//! Rules are evaluated by ascending priority, ties broken by rule name, so the
//! decision does not depend on the order rules were registered in.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::domain::errors::OrchestrationError;
use crate::domain::models::{
    AgentKind, Request, RequestPayload, RoutingConfig, RoutingDecision, RoutingMethod,
    RoutingMode, RunId, SweepParameters,
};
use crate::domain::ports::IntentClassifier;

const COMPARE_PATTERNS: &[&str] = &[
    r"(?i)\bcompar(e|es|ed|ing|ison)\b",
    r"(?i)\b(versus|vs\.?)\b",
    r"(?i)\bdiff(erence)?\b",
    r"(?i)\bagainst\b",
];

const SWEEP_PATTERNS: &[&str] = &[
    r"(?i)\bsweep(s|ing)?\b",
    r"(?i)\bscan(s|ning)?\b",
    r"(?i)\brange\b",
    r"(?i)\bvary(ing)?\b",
    r"(?i)\bparametric\b",
    r"(?i)\bfrom\s+-?[0-9.]+\s+to\s+-?[0-9.]+",
];

const LISTING_PATTERNS: &[&str] = &[
    r"(?i)\blist\b",
    r"(?i)\bshow\b",
    r"(?i)\bfind\b",
    r"(?i)\bsearch\b",
    r"(?i)\bhistory\b",
    r"(?i)\bprevious\b",
    r"(?i)\blook\s*up\b",
    r"(?i)\bwhich\s+runs\b",
];

/// Upper bound on values generated from a `from A to B step S` range.
const MAX_RANGE_POINTS: usize = 1000;
/// Points generated for a range without an explicit step.
const DEFAULT_RANGE_POINTS: usize = 5;

/// One deterministic routing rule.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub name: String,
    /// Lower evaluates first.
    pub priority: u32,
    pub agent: AgentKind,
    pub intent: String,
    /// Fixed confidence reported when the rule fires.
    pub confidence: f64,
    /// Any pattern may match; an empty list matches every text.
    patterns: Vec<Regex>,
    /// Minimum number of run identifiers the text must mention.
    min_run_ids: usize,
}

impl RoutingRule {
    /// Build a rule. Invalid patterns are logged and skipped.
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        agent: AgentKind,
        intent: impl Into<String>,
        confidence: f64,
        patterns: &[&str],
    ) -> Self {
        let name = name.into();
        let patterns = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!(rule = %name, pattern, error = %e, "skipping invalid routing pattern");
                    None
                }
            })
            .collect();
        Self {
            name,
            priority,
            agent,
            intent: intent.into(),
            confidence: confidence.clamp(0.0, 1.0),
            patterns,
            min_run_ids: 0,
        }
    }

    pub fn requiring_run_ids(mut self, count: usize) -> Self {
        self.min_run_ids = count;
        self
    }

    fn matches(&self, text: &str, run_id_count: usize) -> bool {
        run_id_count >= self.min_run_ids
            && (self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(text)))
    }
}

/// Built-in rule set, highest priority first.
pub fn default_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule::new(
            "explicit_run_comparison",
            10,
            AgentKind::Analysis,
            "compare_runs",
            0.95,
            COMPARE_PATTERNS,
        )
        .requiring_run_ids(2),
        RoutingRule::new("run_id_analysis", 20, AgentKind::Analysis, "analyze_runs", 0.75, &[])
            .requiring_run_ids(2),
        RoutingRule::new(
            "sweep_vocabulary",
            30,
            AgentKind::Sweep,
            "parameter_sweep",
            0.9,
            SWEEP_PATTERNS,
        ),
        RoutingRule::new(
            "comparison_vocabulary",
            40,
            AgentKind::Sweep,
            "compare_configurations",
            0.7,
            COMPARE_PATTERNS,
        ),
        RoutingRule::new(
            "listing_vocabulary",
            50,
            AgentKind::Query,
            "search_runs",
            0.85,
            LISTING_PATTERNS,
        ),
    ]
}

/// Structured hints pulled out of free text.
struct HintExtractor {
    run_id: Option<Regex>,
    sweep_list: Option<Regex>,
    sweep_range: Option<Regex>,
    filter: Option<Regex>,
    limit: Option<Regex>,
}

impl HintExtractor {
    fn new() -> Self {
        Self {
            run_id: Regex::new(
                r"(?i)\b(?:run-)?([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})\b",
            )
            .ok(),
            sweep_list: Regex::new(
                r"(?i)\bsweep\s+([a-z_][\w.]*)\s+(?:over|across|through|in)\s+\[?((?:-?[0-9.]+(?:e-?[0-9]+)?\s*,?\s*)+)\]?",
            )
            .ok(),
            sweep_range: Regex::new(
                r"(?i)\b([a-z_][\w.]*)\s+from\s+(-?[0-9.]+(?:e-?[0-9]+)?)\s+to\s+(-?[0-9.]+(?:e-?[0-9]+)?)(?:\s+(?:step|by)\s+([0-9.]+(?:e-?[0-9]+)?))?",
            )
            .ok(),
            filter: Regex::new(r#"\b([A-Za-z_][\w.]*)\s*=\s*("[^"]*"|[^\s,;]+)"#).ok(),
            limit: Regex::new(r"(?i)\b(?:last|top|first|limit)\s+(\d+)\b").ok(),
        }
    }

    fn run_ids(&self, text: &str) -> Vec<RunId> {
        let Some(re) = &self.run_id else {
            return Vec::new();
        };
        let mut ids: Vec<RunId> = Vec::new();
        for caps in re.captures_iter(text) {
            if let Ok(id) = caps[1].parse::<RunId>() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    fn sweep(&self, text: &str) -> Option<SweepParameters> {
        if let Some(caps) = self.sweep_list.as_ref().and_then(|re| re.captures(text)) {
            let values: Vec<Value> = caps[2]
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .filter_map(parse_number)
                .collect();
            if !values.is_empty() {
                return Some(SweepParameters {
                    parameter: caps[1].to_string(),
                    values,
                });
            }
        }

        let caps = self.sweep_range.as_ref()?.captures(text)?;
        let start: f64 = caps[2].parse().ok()?;
        let end: f64 = caps[3].parse().ok()?;
        let step = caps.get(4).and_then(|m| m.as_str().parse::<f64>().ok());
        Some(SweepParameters {
            parameter: caps[1].to_string(),
            values: range_values(start, end, step),
        })
    }

    fn filters(&self, text: &str) -> Vec<(String, Value)> {
        let Some(re) = &self.filter else {
            return Vec::new();
        };
        re.captures_iter(text)
            .map(|caps| {
                let raw = &caps[2];
                let value = if raw.starts_with('"') {
                    Value::String(raw.trim_matches('"').to_string())
                } else {
                    parse_scalar(raw)
                };
                (caps[1].to_string(), value)
            })
            .collect()
    }

    fn limit(&self, text: &str) -> Option<usize> {
        let caps = self.limit.as_ref()?.captures(text)?;
        caps[1].parse().ok()
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::from(i));
    }
    raw.parse::<f64>().ok().and_then(|f| {
        serde_json::Number::from_f64(f).map(Value::Number)
    })
}

fn parse_scalar(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => parse_number(raw).unwrap_or_else(|| Value::String(raw.to_string())),
    }
}

/// Values from `start` to `end` inclusive. Without a step, evenly spaced
/// `DEFAULT_RANGE_POINTS` values.
fn range_values(start: f64, end: f64, step: Option<f64>) -> Vec<Value> {
    let span = end - start;
    let count = match step {
        Some(step) if step > 0.0 => ((span.abs() / step) + 1e-9).floor() as usize + 1,
        _ => DEFAULT_RANGE_POINTS,
    }
    .clamp(1, MAX_RANGE_POINTS);
    let increment = match step {
        Some(step) if step > 0.0 => step * span.signum(),
        _ if count > 1 => span / (count - 1) as f64,
        _ => 0.0,
    };
    (0..count)
        .filter_map(|i| {
            let raw = start + increment * i as f64;
            // Trim accumulated binary noise (0.30000000000000004).
            let rounded = (raw * 1e9).round() / 1e9;
            if rounded.fract() == 0.0 && rounded.abs() < 9.0e15 {
                Some(Value::from(rounded as i64))
            } else {
                serde_json::Number::from_f64(rounded).map(Value::Number)
            }
        })
        .collect()
}

/// Routes requests to dispatchers.
pub struct IntentRouter {
    rules: Vec<RoutingRule>,
    hints: HintExtractor,
    classifier: Option<Arc<dyn IntentClassifier>>,
}

impl IntentRouter {
    pub fn new(classifier: Option<Arc<dyn IntentClassifier>>) -> Self {
        Self::with_rules(default_rules(), classifier)
    }

    pub fn with_rules(mut rules: Vec<RoutingRule>, classifier: Option<Arc<dyn IntentClassifier>>) -> Self {
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Self {
            rules,
            hints: HintExtractor::new(),
            classifier,
        }
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Produce the routing decision for `request`. Never fails.
    pub async fn route(&self, request: &Request, config: &RoutingConfig) -> RoutingDecision {
        match request.routing_mode {
            RoutingMode::Deterministic => self.route_deterministic(request),
            RoutingMode::Probabilistic => match self.route_probabilistic(request, config).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(
                        request_id = %request.id,
                        error = %e,
                        "probabilistic routing failed; falling back to rules"
                    );
                    let mut decision = self.route_deterministic(request);
                    let rule_reason = decision.reasoning.take().unwrap_or_default();
                    decision.reasoning = Some(format!("fallback after {e}; {rule_reason}"));
                    decision
                }
            },
        }
    }

    /// First matching rule in priority order, else a single study.
    pub fn route_deterministic(&self, request: &Request) -> RoutingDecision {
        let run_id_count = self
            .hints
            .run_ids(&request.raw_text)
            .len()
            .max(request.payload.run_ids.len());
        let matched = self
            .rules
            .iter()
            .find(|rule| rule.matches(&request.raw_text, run_id_count));

        let (agent, intent, confidence, reasoning) = match matched {
            Some(rule) => (
                rule.agent,
                rule.intent.clone(),
                rule.confidence,
                format!("matched rule '{}' (priority {})", rule.name, rule.priority),
            ),
            None => (
                AgentKind::Studies,
                AgentKind::Studies.default_intent().to_string(),
                0.5,
                "no rule matched; defaulting to a single study".to_string(),
            ),
        };
        tracing::debug!(request_id = %request.id, agent = %agent, intent = %intent, "deterministic route");

        RoutingDecision {
            request_id: request.id,
            agent,
            intent,
            confidence,
            method: RoutingMethod::Deterministic,
            reasoning: Some(reasoning),
        }
    }

    async fn route_probabilistic(
        &self,
        request: &Request,
        config: &RoutingConfig,
    ) -> Result<RoutingDecision, OrchestrationError> {
        let classifier = self.classifier.as_ref().ok_or_else(|| {
            OrchestrationError::ClassifierUnavailable("no classifier configured".to_string())
        })?;

        let timeout = Duration::from_millis(config.classifier_timeout_ms);
        let classification = tokio::time::timeout(timeout, classifier.classify(&request.raw_text))
            .await
            .map_err(|_| {
                OrchestrationError::ClassifierUnavailable(format!(
                    "classifier timed out after {}ms",
                    config.classifier_timeout_ms
                ))
            })?
            .map_err(|e| OrchestrationError::ClassifierUnavailable(e.to_string()))?;

        let agent = AgentKind::from_label(&classification.intent).ok_or_else(|| {
            OrchestrationError::ClassifierUnavailable(format!(
                "unknown intent label '{}'",
                classification.intent
            ))
        })?;
        let confidence = classification.confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(OrchestrationError::ClassifierUnavailable(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }
        if confidence < config.min_classifier_confidence {
            return Err(OrchestrationError::ClassifierUnavailable(format!(
                "confidence {confidence} below minimum {}",
                config.min_classifier_confidence
            )));
        }

        tracing::debug!(
            request_id = %request.id,
            classifier = classifier.name(),
            agent = %agent,
            confidence,
            "probabilistic route"
        );
        Ok(RoutingDecision {
            request_id: request.id,
            agent,
            intent: agent.default_intent().to_string(),
            confidence,
            method: RoutingMethod::Probabilistic,
            reasoning: (!classification.reasoning.is_empty()).then_some(classification.reasoning),
        })
    }

    /// Hints extracted from the request text.
    pub fn extract_hints(&self, text: &str) -> RequestPayload {
        RequestPayload {
            spec: None,
            sweep: self.hints.sweep(text),
            filters: self.hints.filters(text).into_iter().collect(),
            run_ids: self.hints.run_ids(text),
            limit: self.hints.limit(text),
        }
    }

    /// Request payload with gaps filled from text hints. Explicit fields win.
    pub fn resolve_payload(&self, request: &Request) -> RequestPayload {
        request
            .payload
            .clone()
            .merged_with(self.extract_hints(&request.raw_text))
    }
}
