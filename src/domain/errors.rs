//! Domain errors for the simroute orchestration core.

use thiserror::Error;

/// A tool call failed. Shared by every caller that joined the execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool '{tool_name}' failed: {message}")]
pub struct ToolExecutionError {
    pub tool_name: String,
    pub message: String,
}

impl ToolExecutionError {
    pub fn new(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }
}

/// Errors that can terminate request processing.
///
/// Convergence exhaustion is deliberately absent: it is a terminal
/// `ConvergenceStatus`, not a failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    /// Malformed specification handed to the fingerprinter. Never retried.
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Dispatcher preconditions unmet. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    ToolExecution(#[from] ToolExecutionError),

    /// Probabilistic routing failed. Recovered inside the router.
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl OrchestrationError {
    /// Stable snake_case kind reported in events and results.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidSpec(_) => "invalid_spec",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ToolExecution(_) => "tool_execution",
            Self::ClassifierUnavailable(_) => "classifier_unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
