//! Request domain model.
//!
//! A request is an immutable submission: the natural-language text used for
//! routing plus an optional structured payload from form-based front ends.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run_record::RunId;

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the intent router should classify the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Ordered keyword rules only; never leaves the process.
    #[default]
    Deterministic,
    /// External classifier first, deterministic rules on failure.
    Probabilistic,
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deterministic => write!(f, "deterministic"),
            Self::Probabilistic => write!(f, "probabilistic"),
        }
    }
}

/// Parameter sweep definition: one spec field and the values it takes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepParameters {
    /// Dotted path of the spec field to vary (e.g. `materials.fuel.enrichment`).
    pub parameter: String,
    /// Values substituted into the base spec, one simulation each.
    pub values: Vec<serde_json::Value>,
}

/// Structured inputs attached to a request.
///
/// Every field is optional; the router fills gaps from hints extracted out of
/// the request text, and explicit payload fields always win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Simulation specification (base spec for sweeps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,

    /// Sweep definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepParameters>,

    /// Spec field equality filters for run lookups.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, serde_json::Value>,

    /// Prior run identifiers for comparisons and lookups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_ids: Vec<RunId>,

    /// Maximum number of records returned by lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl RequestPayload {
    /// Fill every empty field of `self` from `fallback`.
    pub fn merged_with(mut self, fallback: Self) -> Self {
        if self.spec.is_none() {
            self.spec = fallback.spec;
        }
        if self.sweep.is_none() {
            self.sweep = fallback.sweep;
        }
        for (key, value) in fallback.filters {
            self.filters.entry(key).or_insert(value);
        }
        if self.run_ids.is_empty() {
            self.run_ids = fallback.run_ids;
        }
        if self.limit.is_none() {
            self.limit = fallback.limit;
        }
        self
    }
}

/// An incoming request. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub raw_text: String,
    #[serde(default)]
    pub routing_mode: RoutingMode,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: RequestPayload,
}

impl Request {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            raw_text: raw_text.into(),
            routing_mode: RoutingMode::default(),
            created_at: Utc::now(),
            payload: RequestPayload::default(),
        }
    }

    pub fn with_mode(mut self, mode: RoutingMode) -> Self {
        self.routing_mode = mode;
        self
    }

    pub fn with_payload(mut self, payload: RequestPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.payload.spec = Some(spec);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_merge_prefers_explicit_fields() {
        let explicit = RequestPayload {
            spec: Some(json!({"a": 1})),
            limit: Some(3),
            ..Default::default()
        };
        let mut filters = BTreeMap::new();
        filters.insert("fuel".to_string(), json!("uo2"));
        let hints = RequestPayload {
            spec: Some(json!({"a": 2})),
            filters,
            run_ids: vec![RunId::new()],
            limit: Some(10),
            ..Default::default()
        };

        let merged = explicit.merged_with(hints);
        assert_eq!(merged.spec, Some(json!({"a": 1})));
        assert_eq!(merged.limit, Some(3));
        assert_eq!(merged.filters.len(), 1);
        assert_eq!(merged.run_ids.len(), 1);
    }

    #[test]
    fn test_request_defaults_to_deterministic_routing() {
        let request = Request::new("run the pin cell");
        assert_eq!(request.routing_mode, RoutingMode::Deterministic);
        assert!(request.payload.spec.is_none());
    }
}
