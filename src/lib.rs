//! simroute - request orchestration for Monte-Carlo simulation studies
//!
//! Routes natural-language requests to one of four specialists (studies,
//! sweep, query, analysis), runs simulations through a deduplicating tool
//! invoker, drives particle counts until the statistical uncertainty
//! converges, and streams per-request lifecycle events.
//!
//! # Architecture
//!
//! Hexagonal layout:
//!
//! - **Domain Layer** (`domain`): models, ports and the error taxonomy
//! - **Service Layer** (`services`): router, dispatchers, invoker, convergence, events
//! - **Adapters** (`adapters`): simulation engines, run stores, intent classifiers
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use simroute::adapters::memory_store::InMemoryRunStore;
//! use simroute::adapters::simulation::SyntheticSimulationEngine;
//! use simroute::{Orchestrator, Request};
//!
//! let orchestrator = Orchestrator::builder()
//!     .engine(Arc::new(SyntheticSimulationEngine::default()))
//!     .store(Arc::new(InMemoryRunStore::new()))
//!     .build()?;
//! let result = orchestrator
//!     .process(Request::new("run to 50 pcm").with_spec(spec))
//!     .await;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{OrchestrationError, OrchestrationResult};
pub use domain::models::{
    AgentKind, Config, ConvergenceState, ConvergenceStatus, Request, RequestId, RequestPayload,
    RequestResult, RequestStatus, RoutingDecision, RoutingMode, RunId, RunQuery, RunRecord,
    SpecFingerprint,
};
pub use domain::ports::{IntentClassifier, RunStore, SimulationEngine};
pub use infrastructure::config::{ConfigError, ConfigHandle, ConfigLoader};
pub use services::orchestrator::Orchestrator;
