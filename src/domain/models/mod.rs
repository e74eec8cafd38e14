pub mod config;
pub mod convergence;
pub mod fingerprint;
pub mod json_path;
pub mod request;
pub mod result;
pub mod routing;
pub mod run_record;
pub mod tool_call;

pub use config::{
    ClassifierConfig, Config, DatabaseConfig, DispatchConfig, EventsConfig, InvokerConfig,
    LogFormat, LoggingConfig, RotationPolicy, RoutingConfig, SimulationConfig,
};
pub use convergence::{ConvergenceConfig, ConvergenceState, ConvergenceStatus, PCM};
pub use fingerprint::SpecFingerprint;
pub use request::{Request, RequestId, RequestPayload, RoutingMode, SweepParameters};
pub use result::{
    DispatchOutput, DispatchResult, ErrorInfo, EstimateStatistics, PairwiseComparison,
    PartialResult, RequestResult, RequestStatus, RunComparison, SweepPoint,
};
pub use routing::{AgentKind, RoutingDecision, RoutingMethod};
pub use run_record::{RunId, RunQuery, RunRecord};
pub use tool_call::{CallOrigin, ToolCall};
