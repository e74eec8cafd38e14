//! Persisted run records and lookup criteria.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::convergence::ConvergenceStatus;
use super::fingerprint::SpecFingerprint;
use super::json_path;

/// Identifier of a completed simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim_start_matches("run-")).map(Self)
    }
}

/// Stored outcome of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub fingerprint: SpecFingerprint,
    pub spec: serde_json::Value,
    pub estimate: f64,
    pub uncertainty_pcm: f64,
    pub particles: u64,
    pub batches: u32,
    /// Terminal convergence status; `None` for one-shot sweep points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence: Option<ConvergenceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Read-only lookup criteria. Empty criteria match every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunQuery {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_ids: Vec<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<SpecFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence: Option<ConvergenceStatus>,
    /// Dotted spec path -> required value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spec_filters: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl RunQuery {
    pub fn by_run_ids(run_ids: Vec<RunId>) -> Self {
        Self {
            run_ids,
            ..Default::default()
        }
    }

    /// Whether `record` satisfies every criterion except `limit`.
    pub fn matches(&self, record: &RunRecord) -> bool {
        if !self.run_ids.is_empty() && !self.run_ids.contains(&record.run_id) {
            return false;
        }
        if let Some(ref fingerprint) = self.fingerprint {
            if fingerprint != &record.fingerprint {
                return false;
            }
        }
        if let Some(status) = self.convergence {
            if record.convergence != Some(status) {
                return false;
            }
        }
        self.spec_filters.iter().all(|(path, expected)| {
            json_path::value_at(&record.spec, path)
                .is_some_and(|actual| json_path::values_equivalent(actual, expected))
        })
    }
}
