//! Routing decision model.

use serde::{Deserialize, Serialize};

use super::request::RequestId;

/// Specialist dispatcher selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Single simulation study, possibly driven to convergence.
    Studies,
    /// Parameter sweep over a base spec.
    Sweep,
    /// Read-only lookup of stored runs.
    Query,
    /// Comparison of prior runs.
    Analysis,
}

impl AgentKind {
    pub const ALL: [Self; 4] = [Self::Studies, Self::Sweep, Self::Query, Self::Analysis];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Studies => "studies",
            Self::Sweep => "sweep",
            Self::Query => "query",
            Self::Analysis => "analysis",
        }
    }

    /// Canonical intent label produced for this agent.
    pub fn default_intent(self) -> &'static str {
        match self {
            Self::Studies => "run_study",
            Self::Sweep => "parameter_sweep",
            Self::Query => "search_runs",
            Self::Analysis => "compare_runs",
        }
    }

    /// Map a classifier label onto an agent. Accepts agent names and intent labels.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "studies" | "study" | "run_study" | "single_study" | "simulate" => Some(Self::Studies),
            "sweep" | "parameter_sweep" | "sweep_parameter" => Some(Self::Sweep),
            "query" | "search_runs" | "list_runs" | "lookup" => Some(Self::Query),
            "analysis" | "compare_runs" | "analyze_runs" | "comparison" => Some(Self::Analysis),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a routing decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMethod {
    Deterministic,
    Probabilistic,
}

impl std::fmt::Display for RoutingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deterministic => write!(f, "deterministic"),
            Self::Probabilistic => write!(f, "probabilistic"),
        }
    }
}

/// The one routing decision produced per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub request_id: RequestId,
    pub agent: AgentKind,
    pub intent: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub method: RoutingMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}
