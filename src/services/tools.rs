//! Built-in tools and the tool registry.
//!
//! Dispatchers never talk to the simulation engine or the run store directly;
//! they name one of these tools and hand the call to the tool invoker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::models::{RunId, RunQuery, RunRecord};
use crate::domain::ports::{EngineError, RunStore, SimulationEngine, SimulationOutcome, Tool, ToolError};

pub const RUN_SIMULATION: &str = "run_simulation";
pub const SEARCH_RUNS: &str = "search_runs";
pub const FETCH_RUNS: &str = "fetch_runs";

/// Arguments of `run_simulation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationArgs {
    pub spec: Value,
    pub particles: u64,
    pub batches: u32,
}

/// Arguments of `fetch_runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRunsArgs {
    pub run_ids: Vec<RunId>,
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: &Value) -> Result<T, ToolError> {
    T::deserialize(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Runs the stochastic simulation once. Results are reusable: the same spec at
/// the same particle and batch counts is never executed twice.
pub struct RunSimulationTool {
    engine: Arc<dyn SimulationEngine>,
}

impl RunSimulationTool {
    pub fn new(engine: Arc<dyn SimulationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for RunSimulationTool {
    fn name(&self) -> &'static str {
        RUN_SIMULATION
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn call(&self, args: &Value) -> Result<Value, ToolError> {
        let args: SimulationArgs = parse_args(args)?;
        if args.particles == 0 || args.batches == 0 {
            return Err(ToolError::InvalidArguments(
                "particles and batches must be positive".to_string(),
            ));
        }
        let outcome = self
            .engine
            .run(&args.spec, args.particles, args.batches)
            .await?;
        if !outcome.is_well_formed() {
            return Err(EngineError::MalformedOutput(format!(
                "estimate={} uncertainty_pcm={}",
                outcome.estimate, outcome.uncertainty_pcm
            ))
            .into());
        }
        Ok(serde_json::to_value(outcome)?)
    }
}

/// Filtered read-only lookup of stored runs.
pub struct SearchRunsTool {
    store: Arc<dyn RunStore>,
}

impl SearchRunsTool {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchRunsTool {
    fn name(&self) -> &'static str {
        SEARCH_RUNS
    }

    async fn call(&self, args: &Value) -> Result<Value, ToolError> {
        let query: RunQuery = parse_args(args)?;
        let records = self.store.query(&query).await?;
        Ok(serde_json::to_value(records)?)
    }
}

/// Fetch specific runs by id, in the order requested. Unknown ids are skipped.
pub struct FetchRunsTool {
    store: Arc<dyn RunStore>,
}

impl FetchRunsTool {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FetchRunsTool {
    fn name(&self) -> &'static str {
        FETCH_RUNS
    }

    async fn call(&self, args: &Value) -> Result<Value, ToolError> {
        let args: FetchRunsArgs = parse_args(args)?;
        let found = self
            .store
            .query(&RunQuery::by_run_ids(args.run_ids.clone()))
            .await?;
        let ordered: Vec<RunRecord> = args
            .run_ids
            .iter()
            .filter_map(|id| found.iter().find(|r| &r.run_id == id).cloned())
            .collect();
        Ok(serde_json::to_value(ordered)?)
    }
}

/// Decode a `run_simulation` result.
pub fn decode_outcome(value: &Value) -> Result<SimulationOutcome, serde_json::Error> {
    SimulationOutcome::deserialize(value)
}

/// Decode a `search_runs`/`fetch_runs` result.
pub fn decode_records(value: &Value) -> Result<Vec<RunRecord>, serde_json::Error> {
    Vec::<RunRecord>::deserialize(value)
}

/// Named tools available to dispatchers.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the three built-in tools.
    pub fn with_builtin_tools(engine: Arc<dyn SimulationEngine>, store: Arc<dyn RunStore>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RunSimulationTool::new(engine)));
        registry.register(Arc::new(SearchRunsTool::new(Arc::clone(&store))));
        registry.register(Arc::new(FetchRunsTool::new(store)));
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::InMemoryRunStore;
    use crate::adapters::simulation::ScriptedSimulationEngine;
    use crate::domain::models::SpecFingerprint;
    use chrono::Utc;
    use serde_json::json;

    fn record(estimate: f64) -> RunRecord {
        RunRecord {
            run_id: RunId::new(),
            fingerprint: SpecFingerprint::from_hex("cd".repeat(32)),
            spec: json!({"fuel": "uo2"}),
            estimate,
            uncertainty_pcm: 30.0,
            particles: 1000,
            batches: 10,
            convergence: None,
            iterations: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_run_simulation_validates_arguments() {
        let engine = Arc::new(ScriptedSimulationEngine::new());
        let tool = RunSimulationTool::new(engine);
        let err = tool.call(&json!({"spec": {}})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = tool
            .call(&json!({"spec": {"a": 1}, "particles": 0, "batches": 10}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_run_simulation_returns_outcome() {
        let engine = Arc::new(ScriptedSimulationEngine::new());
        engine.push_outcome(1.02, 75.0);
        let tool = RunSimulationTool::new(engine.clone());

        let value = tool
            .call(&json!({"spec": {"a": 1}, "particles": 1000, "batches": 10}))
            .await
            .unwrap();
        let outcome = decode_outcome(&value).unwrap();
        assert_eq!(outcome, SimulationOutcome::new(1.02, 75.0));
        assert_eq!(engine.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_runs_preserves_requested_order() {
        let store = Arc::new(InMemoryRunStore::new());
        let a = record(1.0);
        let b = record(1.1);
        store.put(&a.fingerprint.clone(), a.clone()).await.unwrap();
        store.put(&b.fingerprint.clone(), b.clone()).await.unwrap();

        let tool = FetchRunsTool::new(store);
        let value = tool
            .call(&json!({"run_ids": [b.run_id, a.run_id, RunId::new()]}))
            .await
            .unwrap();
        let records = decode_records(&value).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].run_id, b.run_id);
        assert_eq!(records[1].run_id, a.run_id);
    }

    #[test]
    fn test_registry_names() {
        let registry = ToolRegistry::with_builtin_tools(
            Arc::new(ScriptedSimulationEngine::new()),
            Arc::new(InMemoryRunStore::new()),
        );
        assert_eq!(registry.names(), vec![FETCH_RUNS, RUN_SIMULATION, SEARCH_RUNS]);
        assert!(registry.get(RUN_SIMULATION).unwrap().cacheable());
        assert!(!registry.get(SEARCH_RUNS).unwrap().cacheable());
    }
}
