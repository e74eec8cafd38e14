//! Request orchestrator.
//!
//! Drives one request through the pipeline:
//! route → publish `routing_decided` → resolve payload → dispatch → finalize.
//! Every path, including failures and cancellation, ends in the finalizer so
//! each request has exactly one terminal result and one terminal event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{
    AgentKind, DispatchResult, ErrorInfo, PartialResult, Request, RequestId, RequestResult,
    RoutingDecision,
};
use crate::domain::ports::{IntentClassifier, RunStore, SimulationEngine};
use crate::infrastructure::config::ConfigHandle;
use crate::services::context::RequestContext;
use crate::services::convergence_controller::ConvergenceController;
use crate::services::dispatchers::{
    AnalysisDispatcher, Dispatcher, QueryDispatcher, StudiesDispatcher, SweepDispatcher,
};
use crate::services::event_bus::{
    EventBus, EventBusConfig, EventPayload, EventSubscription, RequestEvent,
};
use crate::services::finalizer::Finalizer;
use crate::services::intent_router::{IntentRouter, RoutingRule};
use crate::services::tool_invoker::{DedupTable, ToolInvoker};
use crate::services::tools::ToolRegistry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("no simulation engine configured")]
    MissingEngine,
    #[error("no run store configured")]
    MissingStore,
}

/// Assembles an [`Orchestrator`] from its collaborators.
#[derive(Default)]
pub struct OrchestratorBuilder {
    engine: Option<Arc<dyn SimulationEngine>>,
    store: Option<Arc<dyn RunStore>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    config: Option<ConfigHandle>,
    table: Option<Arc<DedupTable>>,
    rules: Option<Vec<RoutingRule>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, engine: Arc<dyn SimulationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(mut self, config: ConfigHandle) -> Self {
        self.config = Some(config);
        self
    }

    /// Share a dedup table with other orchestrators in the process.
    pub fn dedup_table(mut self, table: Arc<DedupTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Replace the built-in routing rules.
    pub fn rules(mut self, rules: Vec<RoutingRule>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let engine = self.engine.ok_or(BuildError::MissingEngine)?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let config = self.config.unwrap_or_default();
        let table = self.table.unwrap_or_default();

        let snapshot = config.snapshot();
        let events = Arc::new(EventBus::new(EventBusConfig::from(&snapshot.events)));
        let registry = Arc::new(ToolRegistry::with_builtin_tools(engine, Arc::clone(&store)));
        let invoker = Arc::new(ToolInvoker::new(registry, table));
        let controller = Arc::new(ConvergenceController::new(Arc::clone(&invoker)));

        let dispatchers: Vec<Arc<dyn Dispatcher>> = vec![
            Arc::new(StudiesDispatcher::new(controller, Arc::clone(&store))),
            Arc::new(SweepDispatcher::new(Arc::clone(&invoker), store)),
            Arc::new(QueryDispatcher::new(Arc::clone(&invoker))),
            Arc::new(AnalysisDispatcher::new(Arc::clone(&invoker))),
        ];
        let dispatchers = dispatchers
            .into_iter()
            .map(|d| (d.agent(), d))
            .collect();

        let router = match self.rules {
            Some(rules) => IntentRouter::with_rules(rules, self.classifier),
            None => IntentRouter::new(self.classifier),
        };

        Ok(Orchestrator {
            config,
            router,
            invoker,
            dispatchers,
            finalizer: Finalizer::new(Arc::clone(&events), snapshot.events.retained_requests),
            events,
            cancellations: Mutex::new(HashMap::new()),
        })
    }
}

/// Entry point for submitting requests.
pub struct Orchestrator {
    config: ConfigHandle,
    router: IntentRouter,
    invoker: Arc<ToolInvoker>,
    dispatchers: HashMap<AgentKind, Arc<dyn Dispatcher>>,
    events: Arc<EventBus>,
    finalizer: Finalizer,
    cancellations: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn invoker(&self) -> &Arc<ToolInvoker> {
        &self.invoker
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    /// Ordered events of one request. Subscribe before submitting to see them all.
    pub fn subscribe(&self, request_id: RequestId) -> EventSubscription {
        self.events.subscribe(request_id)
    }

    /// Every event of every request.
    pub fn subscribe_all(&self) -> broadcast::Receiver<RequestEvent> {
        self.events.subscribe_all()
    }

    /// Terminal result of a finalized request.
    pub fn result(&self, request_id: RequestId) -> Option<Arc<RequestResult>> {
        self.finalizer.result(request_id)
    }

    fn cancellations(&self) -> MutexGuard<'_, HashMap<RequestId, CancellationToken>> {
        self.cancellations.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, request_id: RequestId) -> CancellationToken {
        self.cancellations()
            .entry(request_id)
            .or_default()
            .clone()
    }

    /// Cancel a request that is still in progress.
    ///
    /// Returns false when the request is unknown or already finished.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        match self.cancellations().get(&request_id) {
            Some(token) => {
                tracing::info!(request_id = %request_id, "cancelling request");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Process `request` to completion on a background task.
    ///
    /// The request is cancellable as soon as this returns.
    pub fn submit(self: &Arc<Self>, request: Request) -> JoinHandle<Arc<RequestResult>> {
        self.register(request.id);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.process(request).await })
    }

    /// Process `request` to completion and return its terminal result.
    pub async fn process(&self, request: Request) -> Arc<RequestResult> {
        let request_id = request.id;
        if let Some(existing) = self.finalizer.result(request_id) {
            return existing;
        }
        let cancel = self.register(request_id);
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            mode = %request.routing_mode
        );
        let result = self.run(&request, cancel).instrument(span).await;
        self.cancellations().remove(&request_id);
        result
    }

    async fn run(&self, request: &Request, cancel: CancellationToken) -> Arc<RequestResult> {
        let config = self.config.snapshot();
        tracing::info!(text = %request.raw_text, "request received");

        let routing = self.router.route(request, &config.routing).await;
        if let Err(e) = self.events.publish(
            request.id,
            EventPayload::RoutingDecided {
                agent: routing.agent,
                intent: routing.intent.clone(),
                confidence: routing.confidence,
                method: routing.method,
            },
        ) {
            tracing::warn!(error = %e, "routing event not published");
        }
        tracing::info!(
            agent = %routing.agent,
            intent = %routing.intent,
            method = %routing.method,
            confidence = routing.confidence,
            "request routed"
        );

        let payload = self.router.resolve_payload(request);
        let ctx = RequestContext::new(
            request.id,
            routing.agent,
            config,
            payload,
            Arc::clone(&self.events),
            cancel,
        );

        let outcome = if ctx.is_cancelled() {
            Err(OrchestrationError::Cancelled)
        } else {
            self.dispatch(&ctx, request, &routing).await
        };

        let partial = match outcome {
            Ok(dispatch) => PartialResult {
                routing,
                tool_calls: ctx.tool_calls(),
                dispatch,
                error: None,
            },
            Err(e) => PartialResult {
                routing,
                tool_calls: ctx.tool_calls(),
                dispatch: DispatchResult::default(),
                error: Some(ErrorInfo {
                    kind: e.error_kind().to_string(),
                    message: e.to_string(),
                }),
            },
        };
        self.finalizer.finalize(request.id, partial)
    }

    #[tracing::instrument(name = "dispatch", skip_all, fields(agent = %routing.agent))]
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        request: &Request,
        routing: &RoutingDecision,
    ) -> OrchestrationResult<DispatchResult> {
        let dispatcher = self.dispatchers.get(&routing.agent).ok_or_else(|| {
            OrchestrationError::InvalidRequest(format!("no dispatcher for '{}'", routing.agent))
        })?;
        // Dispatcher first: when both are ready, the invoker has already
        // recorded the cancelled call.
        tokio::select! {
            biased;
            result = dispatcher.handle(ctx, request, routing) => result,
            () = ctx.cancel.cancelled() => Err(OrchestrationError::Cancelled),
        }
    }
}
