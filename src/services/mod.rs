//! Service layer: fingerprinting, routing, tool invocation, convergence,
//! dispatch, events and finalization.

pub mod context;
pub mod convergence_controller;
pub mod dispatchers;
pub mod event_bus;
pub mod finalizer;
pub mod fingerprint;
pub mod intent_router;
pub mod orchestrator;
pub mod study_spec;
pub mod templates;
pub mod tool_invoker;
pub mod tools;

pub use context::RequestContext;
pub use convergence_controller::{ConvergenceController, ConvergenceRun};
pub use dispatchers::{
    AnalysisDispatcher, Dispatcher, QueryDispatcher, StudiesDispatcher, SweepDispatcher,
};
pub use event_bus::{
    EventBus, EventBusConfig, EventBusError, EventPayload, EventSeverity, EventSubscription,
    RequestEvent,
};
pub use finalizer::Finalizer;
pub use fingerprint::Fingerprinter;
pub use intent_router::{IntentRouter, RoutingRule};
pub use orchestrator::{BuildError, Orchestrator, OrchestratorBuilder};
pub use study_spec::StudySpec;
pub use tool_invoker::{DedupTable, ToolInvoker};
pub use tools::ToolRegistry;
