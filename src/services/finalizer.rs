//! Terminal result assembly.
//!
//! The finalizer is the only writer of `RequestResult`s and the only closer
//! of event streams. The first call for a request builds the result, emits the
//! terminal event and closes the stream; every later call returns the stored
//! result untouched. Results of the most recent `retained` requests are kept;
//! completed studies outlive eviction in the run store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::domain::models::{PartialResult, RequestId, RequestResult, RequestStatus};
use crate::services::event_bus::{EventBus, EventPayload};

#[derive(Default)]
struct ResultTable {
    by_id: HashMap<RequestId, Arc<RequestResult>>,
    /// Finalization order, oldest first.
    order: VecDeque<RequestId>,
}

impl ResultTable {
    fn insert(&mut self, request_id: RequestId, result: Arc<RequestResult>, retained: usize) {
        self.by_id.insert(request_id, result);
        self.order.push_back(request_id);
        while self.order.len() > retained {
            if let Some(evicted) = self.order.pop_front() {
                self.by_id.remove(&evicted);
            }
        }
    }
}

pub struct Finalizer {
    events: Arc<EventBus>,
    results: Mutex<ResultTable>,
    retained: usize,
}

impl Finalizer {
    /// Keep the results of the last `retained` finalized requests (at least one).
    pub fn new(events: Arc<EventBus>, retained: usize) -> Self {
        Self {
            events,
            results: Mutex::new(ResultTable::default()),
            retained: retained.max(1),
        }
    }

    fn results(&self) -> MutexGuard<'_, ResultTable> {
        self.results.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Produce the terminal result for `request_id`.
    ///
    /// Idempotent: a second call ignores `partial` and returns the result
    /// produced by the first.
    pub fn finalize(&self, request_id: RequestId, partial: PartialResult) -> Arc<RequestResult> {
        // Held across publish + close so concurrent callers cannot both emit a
        // terminal event.
        let mut results = self.results();
        if let Some(existing) = results.by_id.get(&request_id) {
            tracing::debug!(request_id = %request_id, "request already finalized");
            return Arc::clone(existing);
        }

        let status = if partial.error.is_some() {
            RequestStatus::Failed
        } else {
            RequestStatus::Completed
        };
        let PartialResult {
            routing,
            tool_calls,
            dispatch,
            error,
        } = partial;

        let result = Arc::new(RequestResult {
            request_id,
            routing,
            tool_calls,
            convergence: dispatch.convergence,
            convergence_trace: dispatch.convergence_trace,
            output: dispatch.output,
            summary: dispatch.summary,
            suggestions: dispatch.suggestions,
            status,
            error,
            finalized_at: Utc::now(),
        });

        let terminal = match &result.error {
            Some(error) => EventPayload::RequestFailed {
                error_kind: error.kind.clone(),
                message: error.message.clone(),
            },
            None => EventPayload::RequestCompleted {
                status,
                summary: result.summary.clone(),
            },
        };
        if let Err(e) = self.events.publish(request_id, terminal) {
            tracing::warn!(request_id = %request_id, error = %e, "terminal event not published");
        }
        if let Err(e) = self.events.close(request_id) {
            tracing::warn!(request_id = %request_id, error = %e, "event stream already closed");
        }

        match &result.error {
            Some(error) => tracing::warn!(
                request_id = %request_id,
                error_kind = %error.kind,
                tool_calls = result.tool_calls.len(),
                "request failed: {}",
                error.message
            ),
            None => tracing::info!(
                request_id = %request_id,
                agent = %result.routing.agent,
                tool_calls = result.tool_calls.len(),
                "request completed"
            ),
        }

        results.insert(request_id, Arc::clone(&result), self.retained);
        result
    }

    /// Result of an already finalized request.
    pub fn result(&self, request_id: RequestId) -> Option<Arc<RequestResult>> {
        self.results().by_id.get(&request_id).cloned()
    }

    pub fn is_finalized(&self, request_id: RequestId) -> bool {
        self.results().by_id.contains_key(&request_id)
    }

    /// Results currently held in memory.
    pub fn retained_count(&self) -> usize {
        self.results().by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AgentKind, DispatchResult, ErrorInfo, RoutingDecision, RoutingMethod,
    };

    fn partial(request_id: RequestId, error: Option<ErrorInfo>) -> PartialResult {
        PartialResult {
            routing: RoutingDecision {
                request_id,
                agent: AgentKind::Query,
                intent: "search_runs".to_string(),
                confidence: 0.85,
                method: RoutingMethod::Deterministic,
                reasoning: None,
            },
            tool_calls: Vec::new(),
            dispatch: DispatchResult {
                summary: Some("Found 0 runs".to_string()),
                ..DispatchResult::default()
            },
            error,
        }
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let events = Arc::new(EventBus::default());
        let finalizer = Finalizer::new(Arc::clone(&events), 16);
        let id = RequestId::new();

        let first = finalizer.finalize(id, partial(id, None));
        let error = ErrorInfo {
            kind: "invalid_request".to_string(),
            message: "ignored".to_string(),
        };
        let second = finalizer.finalize(id, partial(id, Some(error)));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
        assert_eq!(first.status, RequestStatus::Completed);
        // One terminal event, stream closed.
        assert_eq!(events.published_count(id), 1);
        assert!(events.is_closed(id));
    }

    #[tokio::test]
    async fn test_failed_partial_emits_request_failed() {
        let events = Arc::new(EventBus::default());
        let finalizer = Finalizer::new(Arc::clone(&events), 16);
        let id = RequestId::new();
        let subscription = events.subscribe(id);

        let result = finalizer.finalize(
            id,
            partial(
                id,
                Some(ErrorInfo {
                    kind: "tool_execution".to_string(),
                    message: "engine crashed".to_string(),
                }),
            ),
        );
        assert_eq!(result.status, RequestStatus::Failed);

        let received = subscription.collect().await;
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0].payload,
            EventPayload::RequestFailed { error_kind, .. } if error_kind == "tool_execution"
        ));
        assert!(finalizer.result(id).is_some());
    }

    #[tokio::test]
    async fn test_oldest_results_are_evicted() {
        let events = Arc::new(EventBus::default());
        let finalizer = Finalizer::new(Arc::clone(&events), 2);
        let ids: Vec<RequestId> = (0..5).map(|_| RequestId::new()).collect();
        for id in &ids {
            finalizer.finalize(*id, partial(*id, None));
        }

        assert_eq!(finalizer.retained_count(), 2);
        assert!(!finalizer.is_finalized(ids[0]));
        assert!(finalizer.result(ids[2]).is_none());
        assert!(finalizer.is_finalized(ids[3]));
        assert!(finalizer.is_finalized(ids[4]));
    }
}
