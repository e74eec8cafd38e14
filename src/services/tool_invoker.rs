//! Tool invoker with a per-call dedup table.
//!
//! At most one execution exists per dedup key at any time. The first caller
//! (the leader) spawns the tool call as its own task; concurrent callers with
//! the same key join it and receive the same result. Completed results of
//! cacheable tools stay in the table and are served to later identical calls.
//! Failures are shared with every joined caller but never cached.
//!
//! A caller that is cancelled simply stops waiting. The shared execution is
//! aborted only when its last waiter has gone, so cancelling one request never
//! affects a sibling that joined the same execution.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::instrument;

use crate::domain::errors::{OrchestrationError, OrchestrationResult, ToolExecutionError};
use crate::domain::models::{CallOrigin, SpecFingerprint, ToolCall};
use crate::domain::ports::Tool;
use crate::services::context::RequestContext;
use crate::services::event_bus::EventPayload;
use crate::services::fingerprint::Fingerprinter;
use crate::services::templates::{self, TemplateContext};
use crate::services::tools::ToolRegistry;

type SharedOutcome = Result<Value, ToolExecutionError>;

struct InFlight {
    id: u64,
    waiters: usize,
    outcome: watch::Receiver<Option<SharedOutcome>>,
    abort: AbortHandle,
}

enum Slot {
    Running(InFlight),
    Done(Value),
}

/// How a caller got attached to a dedup key.
enum Acquired {
    Cached(Value),
    Waiting {
        origin: CallOrigin,
        outcome: watch::Receiver<Option<SharedOutcome>>,
        guard: WaiterGuard,
    },
}

/// Shared table of in-flight and completed tool executions, keyed by dedup key.
///
/// Injected into the invoker so tests can use a fresh table each.
#[derive(Default)]
pub struct DedupTable {
    slots: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
    executions: AtomicU64,
}

impl DedupTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of underlying tool executions started through this table.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Keys with an execution currently in flight.
    pub fn in_flight(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Running(_)))
            .count()
    }

    /// Keys with a cached completed result.
    pub fn cached(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Done(_)))
            .count()
    }

    /// Drop every cached result. In-flight executions are untouched.
    pub fn clear_cache(&self) {
        self.slots()
            .retain(|_, slot| matches!(slot, Slot::Running(_)));
    }

    /// Serve from cache, join the in-flight execution, or start a new one.
    ///
    /// Check-then-insert happens under a single lock acquisition.
    fn acquire(
        self: &Arc<Self>,
        key: &str,
        tool: Arc<dyn Tool>,
        args: Value,
        cache_result: bool,
    ) -> Acquired {
        let mut slots = self.slots();
        match slots.get_mut(key) {
            Some(Slot::Done(value)) => return Acquired::Cached(value.clone()),
            Some(Slot::Running(in_flight)) => {
                in_flight.waiters += 1;
                return Acquired::Waiting {
                    origin: CallOrigin::Joined,
                    outcome: in_flight.outcome.clone(),
                    guard: WaiterGuard::new(self, key, in_flight.id),
                };
            }
            None => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.executions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(None);
        let table = Arc::clone(self);
        let task_key = key.to_string();
        let handle = tokio::spawn(async move {
            let tool_name = tool.name();
            let outcome = match AssertUnwindSafe(tool.call(&args)).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(ToolExecutionError::new(tool_name, e.to_string())),
                Err(_) => Err(ToolExecutionError::new(tool_name, "tool panicked")),
            };
            table.complete(&task_key, id, &outcome, cache_result);
            let _ = tx.send(Some(outcome));
        });

        slots.insert(
            key.to_string(),
            Slot::Running(InFlight {
                id,
                waiters: 1,
                outcome: rx.clone(),
                abort: handle.abort_handle(),
            }),
        );
        Acquired::Waiting {
            origin: CallOrigin::Executed,
            outcome: rx,
            guard: WaiterGuard::new(self, key, id),
        }
    }

    fn complete(&self, key: &str, id: u64, outcome: &SharedOutcome, cache_result: bool) {
        let mut slots = self.slots();
        let owns_slot = matches!(slots.get(key), Some(Slot::Running(in_flight)) if in_flight.id == id);
        if !owns_slot {
            return;
        }
        match outcome {
            Ok(value) if cache_result => {
                slots.insert(key.to_string(), Slot::Done(value.clone()));
            }
            _ => {
                slots.remove(key);
            }
        }
    }

    fn release(&self, key: &str, id: u64) {
        let mut slots = self.slots();
        let Some(Slot::Running(in_flight)) = slots.get_mut(key) else {
            return;
        };
        if in_flight.id != id {
            return;
        }
        in_flight.waiters = in_flight.waiters.saturating_sub(1);
        if in_flight.waiters == 0 {
            in_flight.abort.abort();
            slots.remove(key);
            tracing::debug!(call_key = key, "aborted execution with no remaining waiters");
        }
    }
}

/// Registration of one caller on an in-flight execution.
///
/// Dropping it deregisters the caller; the last one to leave before the
/// execution completes aborts it.
struct WaiterGuard {
    table: Arc<DedupTable>,
    key: String,
    id: u64,
}

impl WaiterGuard {
    fn new(table: &Arc<DedupTable>, key: &str, id: u64) -> Self {
        Self {
            table: Arc::clone(table),
            key: key.to_string(),
            id,
        }
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.table.release(&self.key, self.id);
    }
}

async fn await_outcome(mut outcome: watch::Receiver<Option<SharedOutcome>>, tool_name: &str) -> SharedOutcome {
    match outcome.wait_for(Option::is_some).await {
        Ok(value) => value
            .clone()
            .unwrap_or_else(|| Err(ToolExecutionError::new(tool_name, "execution produced no result"))),
        Err(_) => Err(ToolExecutionError::new(tool_name, "execution aborted")),
    }
}

/// Executes named tools on behalf of requests.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    table: Arc<DedupTable>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, table: Arc<DedupTable>) -> Self {
        Self { registry, table }
    }

    pub fn table(&self) -> &Arc<DedupTable> {
        &self.table
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Invoke `tool_name` with `args` for the request in `ctx`.
    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        tool_name: &str,
        args: Value,
        fingerprint: Option<&SpecFingerprint>,
    ) -> OrchestrationResult<Value> {
        self.invoke_labeled(ctx, tool_name, args, fingerprint, None)
            .await
    }

    /// [`invoke`](Self::invoke), tagging logs with a convergence iteration.
    #[instrument(
        name = "tool_call",
        skip(self, ctx, args, fingerprint),
        fields(request_id = %ctx.request_id)
    )]
    pub async fn invoke_labeled(
        &self,
        ctx: &RequestContext,
        tool_name: &str,
        args: Value,
        fingerprint: Option<&SpecFingerprint>,
        iteration: Option<u32>,
    ) -> OrchestrationResult<Value> {
        if ctx.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }
        let tool = self.registry.get(tool_name).ok_or_else(|| {
            ToolExecutionError::new(tool_name, "no tool registered under this name")
        })?;

        let fingerprinter = Fingerprinter::from_config(&ctx.config.invoker);
        let call_key = fingerprinter.derive_call_key(tool_name, fingerprint, &args)?;
        let cache_result = tool.cacheable() && ctx.config.invoker.cache_completed;

        let template_ctx = TemplateContext {
            tool_name: tool_name.to_string(),
            agent: Some(ctx.agent),
            run_id: ctx.request_id.to_string(),
            iteration,
        };
        if let Some(line) = templates::render_for_tool(&ctx.config.templates, &template_ctx) {
            tracing::info!(call_key = %call_key, "{line}");
        }

        ctx.publish(EventPayload::ToolCallStarted {
            tool_name: tool_name.to_string(),
            args_digest: fingerprinter.digest(&args),
        });
        let started_at = Utc::now();
        let clock = Instant::now();

        let (origin, outcome) = match self
            .table
            .acquire(&call_key, tool, args.clone(), cache_result)
        {
            Acquired::Cached(value) => (CallOrigin::Cached, Ok(value)),
            Acquired::Waiting {
                origin,
                outcome,
                guard,
            } => {
                let result = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => None,
                    result = await_outcome(outcome, tool_name) => Some(result),
                };
                drop(guard);
                match result {
                    Some(result) => (origin, result),
                    None => {
                        tracing::info!(call_key = %call_key, "tool call abandoned by cancellation");
                        ctx.record_tool_call(ToolCall {
                            tool_name: tool_name.to_string(),
                            args,
                            started_at,
                            ended_at: Some(Utc::now()),
                            result: None,
                            error: Some("cancelled".to_string()),
                            call_key,
                            origin,
                        });
                        return Err(OrchestrationError::Cancelled);
                    }
                }
            }
        };

        let duration_ms = i64::try_from(clock.elapsed().as_millis()).unwrap_or(i64::MAX);
        match &outcome {
            Ok(_) => tracing::debug!(origin = ?origin, duration_ms, "tool call succeeded"),
            Err(e) => tracing::warn!(origin = ?origin, duration_ms, error = %e, "tool call failed"),
        }

        ctx.publish(EventPayload::ToolCallCompleted {
            tool_name: tool_name.to_string(),
            result_digest: outcome.as_ref().ok().map(|v| fingerprinter.digest(v)),
            duration_ms,
            origin,
            error: outcome.as_ref().err().map(|e| e.message.clone()),
        });
        ctx.record_tool_call(ToolCall {
            tool_name: tool_name.to_string(),
            args,
            started_at,
            ended_at: Some(Utc::now()),
            result: outcome.as_ref().ok().cloned(),
            error: outcome.as_ref().err().map(|e| e.message.clone()),
            call_key,
            origin,
        });

        outcome.map_err(OrchestrationError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::InMemoryRunStore;
    use crate::adapters::simulation::ScriptedSimulationEngine;
    use crate::domain::models::{AgentKind, Config, RequestId, RequestPayload};
    use crate::services::event_bus::EventBus;
    use crate::services::tools::{RUN_SIMULATION, SEARCH_RUNS};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx_with(bus: &Arc<EventBus>, config: Config) -> RequestContext {
        RequestContext::new(
            RequestId::new(),
            AgentKind::Studies,
            Arc::new(config),
            RequestPayload::default(),
            Arc::clone(bus),
            CancellationToken::new(),
        )
    }

    fn invoker(engine: &Arc<ScriptedSimulationEngine>) -> ToolInvoker {
        let registry = ToolRegistry::with_builtin_tools(
            Arc::clone(engine) as Arc<dyn crate::domain::ports::SimulationEngine>,
            Arc::new(InMemoryRunStore::new()),
        );
        ToolInvoker::new(Arc::new(registry), Arc::new(DedupTable::new()))
    }

    fn sim_args(particles: u64) -> Value {
        json!({"spec": {"fuel": "uo2"}, "particles": particles, "batches": 10})
    }

    #[tokio::test]
    async fn test_completed_result_is_cached() {
        let engine = Arc::new(ScriptedSimulationEngine::new());
        engine.push_outcome(1.0, 40.0);
        let invoker = invoker(&engine);
        let bus = Arc::new(EventBus::default());
        let ctx = ctx_with(&bus, Config::default());

        let first = invoker.invoke(&ctx, RUN_SIMULATION, sim_args(1000), None).await.unwrap();
        let second = invoker.invoke(&ctx, RUN_SIMULATION, sim_args(1000), None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.call_count(), 1);
        let calls = ctx.tool_calls();
        assert_eq!(calls[0].origin, CallOrigin::Executed);
        assert_eq!(calls[1].origin, CallOrigin::Cached);
        assert_eq!(invoker.table().cached(), 1);
    }

    #[tokio::test]
    async fn test_different_arguments_execute_separately() {
        let engine = Arc::new(ScriptedSimulationEngine::new());
        engine.push_outcome(1.0, 400.0);
        engine.push_outcome(1.0, 40.0);
        let invoker = invoker(&engine);
        let bus = Arc::new(EventBus::default());
        let ctx = ctx_with(&bus, Config::default());

        invoker.invoke(&ctx, RUN_SIMULATION, sim_args(1000), None).await.unwrap();
        invoker.invoke(&ctx, RUN_SIMULATION, sim_args(2000), None).await.unwrap();
        assert_eq!(engine.call_count(), 2);
        assert_eq!(invoker.table().executions(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_not_cached() {
        let engine = Arc::new(ScriptedSimulationEngine::new());
        engine.push_error("solver diverged");
        engine.push_outcome(1.0, 40.0);
        let invoker = invoker(&engine);
        let bus = Arc::new(EventBus::default());
        let ctx = ctx_with(&bus, Config::default());

        let err = invoker
            .invoke(&ctx, RUN_SIMULATION, sim_args(1000), None)
            .await
            .unwrap_err();
        match err {
            OrchestrationError::ToolExecution(e) => {
                assert_eq!(e.tool_name, RUN_SIMULATION);
                assert!(e.message.contains("solver diverged"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!ctx.tool_calls()[0].succeeded());

        invoker.invoke(&ctx, RUN_SIMULATION, sim_args(1000), None).await.unwrap();
        assert_eq!(engine.call_count(), 2);
    }

    #[tokio::test]
    async fn test_uncacheable_tools_always_execute() {
        let engine = Arc::new(ScriptedSimulationEngine::new());
        let invoker = invoker(&engine);
        let bus = Arc::new(EventBus::default());
        let ctx = ctx_with(&bus, Config::default());

        invoker.invoke(&ctx, SEARCH_RUNS, json!({}), None).await.unwrap();
        invoker.invoke(&ctx, SEARCH_RUNS, json!({}), None).await.unwrap();
        assert_eq!(invoker.table().executions(), 2);
        assert_eq!(invoker.table().cached(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_tool_error() {
        let engine = Arc::new(ScriptedSimulationEngine::new());
        let invoker = invoker(&engine);
        let bus = Arc::new(EventBus::default());
        let ctx = ctx_with(&bus, Config::default());

        let err = invoker.invoke(&ctx, "nope", json!({}), None).await.unwrap_err();
        assert_eq!(err.error_kind(), "tool_execution");
    }

    #[tokio::test]
    async fn test_events_are_published_per_call() {
        let engine = Arc::new(ScriptedSimulationEngine::new());
        engine.push_outcome(1.0, 40.0);
        let invoker = invoker(&engine);
        let bus = Arc::new(EventBus::default());
        let ctx = ctx_with(&bus, Config::default());
        let sub = bus.subscribe(ctx.request_id);

        invoker.invoke(&ctx, RUN_SIMULATION, sim_args(1000), None).await.unwrap();
        bus.close(ctx.request_id).unwrap();

        let names: Vec<&str> = sub
            .collect()
            .await
            .iter()
            .map(|e| e.payload.name())
            .collect();
        assert_eq!(names, vec!["tool_call_started", "tool_call_completed"]);
    }

    #[tokio::test]
    async fn test_cancelled_sole_waiter_aborts_execution() {
        let engine = Arc::new(ScriptedSimulationEngine::new().with_delay(Duration::from_secs(30)));
        engine.push_outcome(1.0, 40.0);
        let invoker = invoker(&engine);
        let bus = Arc::new(EventBus::default());
        let ctx = ctx_with(&bus, Config::default());

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = invoker
            .invoke(&ctx, RUN_SIMULATION, sim_args(1000), None)
            .await
            .unwrap_err();
        assert_eq!(err, OrchestrationError::Cancelled);
        assert_eq!(invoker.table().in_flight(), 0);
        assert_eq!(invoker.table().cached(), 0);
    }
}
