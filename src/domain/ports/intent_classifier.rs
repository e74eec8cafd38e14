use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::ClassifierError;

/// Label produced by an external classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Probabilistic intent classifier (typically an LLM call).
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;
}
