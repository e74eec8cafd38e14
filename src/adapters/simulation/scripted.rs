use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ports::{EngineError, SimulationEngine, SimulationOutcome};

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub spec: serde_json::Value,
    pub particles: u64,
    pub batches: u32,
}

/// Engine that replays queued outcomes in order.
///
/// Running out of outcomes is an engine failure, so tests notice calls they
/// did not expect.
#[derive(Default)]
pub struct ScriptedSimulationEngine {
    outcomes: Mutex<VecDeque<Result<SimulationOutcome, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedSimulationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_outcome(&self, estimate: f64, uncertainty_pcm: f64) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(SimulationOutcome::new(estimate, uncertainty_pcm)));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(message.into()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SimulationEngine for ScriptedSimulationEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        spec: &serde_json::Value,
        particles: u64,
        batches: u32,
    ) -> Result<SimulationOutcome, EngineError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                spec: spec.clone(),
                particles,
                batches,
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(EngineError::Failed(message)),
            None => Err(EngineError::Failed("no scripted outcome left".to_string())),
        }
    }
}
