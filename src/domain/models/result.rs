//! Dispatcher outputs and the terminal request result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::convergence::ConvergenceState;
use super::fingerprint::SpecFingerprint;
use super::request::RequestId;
use super::routing::RoutingDecision;
use super::run_record::{RunId, RunRecord};
use super::tool_call::ToolCall;

/// Terminal request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Error carried by a failed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable snake_case error kind (`invalid_request`, `tool_execution`, ...).
    pub kind: String,
    pub message: String,
}

/// Mean/min/max over a set of estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateStatistics {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// `(max - min)` in pcm.
    pub spread_pcm: f64,
}

/// One evaluated sweep value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub value: serde_json::Value,
    pub fingerprint: SpecFingerprint,
    pub estimate: f64,
    pub uncertainty_pcm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

/// Comparison of two stored runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub first: RunId,
    pub second: RunId,
    /// `second.estimate - first.estimate` in pcm.
    pub delta_pcm: f64,
    /// Combined one-sigma uncertainty of the difference in pcm.
    pub combined_uncertainty_pcm: f64,
    /// `delta_pcm / combined_uncertainty_pcm`; zero when both are exact.
    pub z_score: f64,
    pub significant: bool,
}

/// Comparison of two or more stored runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunComparison {
    pub runs: Vec<RunRecord>,
    pub pairs: Vec<PairwiseComparison>,
    pub aggregate: EstimateStatistics,
}

/// Intent-specific payload of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutput {
    Study {
        record: RunRecord,
    },
    Sweep {
        parameter: String,
        points: Vec<SweepPoint>,
        statistics: EstimateStatistics,
    },
    Query {
        records: Vec<RunRecord>,
    },
    Analysis {
        comparison: RunComparison,
    },
}

/// What a dispatcher hands back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchResult {
    pub convergence: Option<ConvergenceState>,
    pub convergence_trace: Vec<ConvergenceState>,
    pub output: Option<DispatchOutput>,
    pub summary: Option<String>,
    pub suggestions: Vec<String>,
}

/// Everything the finalizer needs to build the terminal result.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    pub routing: RoutingDecision,
    pub tool_calls: Vec<ToolCall>,
    pub dispatch: DispatchResult,
    /// Set when the request failed at any stage.
    pub error: Option<ErrorInfo>,
}

/// Terminal, immutable result of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    pub request_id: RequestId,
    pub routing: RoutingDecision,
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence: Option<ConvergenceState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub convergence_trace: Vec<ConvergenceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<DispatchOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub finalized_at: DateTime<Utc>,
}

impl EstimateStatistics {
    /// Statistics over `estimates`; `None` when empty.
    pub fn from_estimates(estimates: &[f64]) -> Option<Self> {
        if estimates.is_empty() {
            return None;
        }
        let count = estimates.len();
        let mean = estimates.iter().sum::<f64>() / count as f64;
        let min = estimates.iter().copied().fold(f64::INFINITY, f64::min);
        let max = estimates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            count,
            mean,
            min,
            max,
            spread_pcm: (max - min) * super::convergence::PCM,
        })
    }
}
