//! Specialist dispatchers.
//!
//! Each dispatcher owns a fixed subset of tools and decides which of them to
//! call, in what order, for one intent category. Precondition failures are
//! reported as `InvalidRequest` before any tool call is made.

pub mod analysis;
pub mod query;
pub mod studies;
pub mod sweep;

use async_trait::async_trait;

use crate::domain::errors::OrchestrationResult;
use crate::domain::models::{AgentKind, DispatchResult, Request, RoutingDecision};
use crate::services::context::RequestContext;

pub use analysis::AnalysisDispatcher;
pub use query::QueryDispatcher;
pub use studies::StudiesDispatcher;
pub use sweep::SweepDispatcher;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn agent(&self) -> AgentKind;

    /// Tools this dispatcher may invoke.
    fn tools(&self) -> &'static [&'static str];

    /// Handle one routed request.
    ///
    /// Tool calls are recorded on `ctx` as they happen; the returned value
    /// carries the intent-specific fields of the partial result.
    async fn handle(
        &self,
        ctx: &RequestContext,
        request: &Request,
        routing: &RoutingDecision,
    ) -> OrchestrationResult<DispatchResult>;
}

/// Format an estimate for summaries.
pub(crate) fn format_estimate(estimate: f64) -> String {
    format!("{estimate:.5}")
}
