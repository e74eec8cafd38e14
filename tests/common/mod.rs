//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use simroute::adapters::memory_store::InMemoryRunStore;
use simroute::adapters::simulation::ScriptedSimulationEngine;
use simroute::domain::models::Config;
use simroute::services::event_bus::RequestEvent;
use simroute::services::intent_router::IntentRouter;
use simroute::{ConfigHandle, IntentClassifier, Orchestrator, RunStore, SimulationEngine};

/// A small pin-cell spec without explicit particle counts.
pub fn pin_cell_spec() -> Value {
    json!({
        "geometry": {"lattice": "square", "pitch": 1.26},
        "materials": {
            "fuel": {"enrichment": 3.1, "density": 10.4},
            "coolant": {"boron_ppm": 600}
        }
    })
}

/// Default configuration with a convergence target of 100 pcm.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.convergence.target_uncertainty_pcm = 100.0;
    config.convergence.stable_delta_pcm = 5.0;
    config.convergence.max_iterations = 5;
    config
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub engine: Arc<ScriptedSimulationEngine>,
    pub store: Arc<InMemoryRunStore>,
}

pub fn harness(config: Config) -> Harness {
    harness_with(config, ScriptedSimulationEngine::new(), None)
}

pub fn harness_with(
    config: Config,
    engine: ScriptedSimulationEngine,
    classifier: Option<Arc<dyn IntentClassifier>>,
) -> Harness {
    let engine = Arc::new(engine);
    let store = Arc::new(InMemoryRunStore::new());
    let engine_port: Arc<dyn SimulationEngine> = engine.clone();
    let store_port: Arc<dyn RunStore> = store.clone();
    let mut builder = Orchestrator::builder()
        .engine(engine_port)
        .store(store_port)
        .config(ConfigHandle::new(config).expect("test config is valid"));
    if let Some(classifier) = classifier {
        builder = builder.classifier(classifier);
    }
    Harness {
        orchestrator: Arc::new(builder.build().expect("orchestrator builds")),
        engine,
        store,
    }
}

/// Event names in publication order.
pub fn event_names(events: &[RequestEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.payload.name()).collect()
}

/// Router with the default rules and no classifier.
pub fn rules_router() -> IntentRouter {
    IntentRouter::new(None)
}

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
