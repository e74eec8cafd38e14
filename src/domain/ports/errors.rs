use thiserror::Error;

/// Run store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Corrupt record {run_id}: {reason}")]
    CorruptRecord { run_id: String, reason: String },

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),
}

/// Simulation engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Simulation engine not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to launch simulation: {0}")]
    LaunchFailed(#[source] std::io::Error),

    #[error("Simulation exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("Simulation timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed simulation output: {0}")]
    MalformedOutput(String),

    #[error("Simulation failed: {0}")]
    Failed(String),
}

/// Probabilistic classifier errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Classifier API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unparseable classifier response: {0}")]
    InvalidResponse(String),
}

/// Errors raised by tools before they are wrapped into `ToolExecutionError`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
