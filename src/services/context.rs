//! Per-request execution context shared by dispatchers, the invoker and the
//! convergence controller.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::domain::models::{AgentKind, Config, RequestId, RequestPayload, ToolCall};
use crate::services::event_bus::{EventBus, EventPayload};

/// Everything a pipeline stage needs to know about the request it serves.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub agent: AgentKind,
    /// Configuration snapshot taken when the request started.
    pub config: Arc<Config>,
    /// Request payload after merging router-extracted hints.
    pub payload: RequestPayload,
    pub cancel: CancellationToken,
    events: Arc<EventBus>,
    tool_calls: Arc<Mutex<Vec<ToolCall>>>,
}

impl RequestContext {
    pub fn new(
        request_id: RequestId,
        agent: AgentKind,
        config: Arc<Config>,
        payload: RequestPayload,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            agent,
            config,
            payload,
            cancel,
            events,
            tool_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Publish on this request's stream. A closed stream is logged, not fatal.
    pub fn publish(&self, payload: EventPayload) {
        if let Err(e) = self.events.publish(self.request_id, payload) {
            tracing::warn!(request_id = %self.request_id, error = %e, "dropping event");
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn record_tool_call(&self, call: ToolCall) {
        self.tool_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    /// Tool calls made so far, in completion order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
