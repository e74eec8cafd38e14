//! EventBus service for per-request lifecycle streams.
//!
//! Each request owns one ordered stream with its own sequence numbers. A
//! stream is closed exactly once, by the finalizer, after its terminal event;
//! publishing to a closed stream is an error, never a panic. An optional
//! bounded replay buffer lets late subscribers catch up, and a process-wide
//! firehose carries every event of every request.
//!
//! Closed streams are retained for the most recent `retained_closed` requests
//! and then forgotten, so memory stays bounded in a long-lived process.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{
    AgentKind, CallOrigin, ConvergenceState, EventsConfig, RequestId, RequestStatus,
    RoutingMethod,
};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-request sequence number, starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub id: EventId,
    pub request_id: RequestId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub payload: EventPayload,
}

/// Lifecycle event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    RoutingDecided {
        agent: AgentKind,
        intent: String,
        confidence: f64,
        method: RoutingMethod,
    },
    ToolCallStarted {
        tool_name: String,
        args_digest: String,
    },
    ToolCallCompleted {
        tool_name: String,
        /// Absent when the call failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_digest: Option<String>,
        duration_ms: i64,
        origin: CallOrigin,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ConvergenceIteration(ConvergenceState),
    RequestCompleted {
        status: RequestStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    RequestFailed {
        error_kind: String,
        message: String,
    },
}

impl EventPayload {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoutingDecided { .. } => "routing_decided",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallCompleted { .. } => "tool_call_completed",
            Self::ConvergenceIteration(_) => "convergence_iteration",
            Self::RequestCompleted { .. } => "request_completed",
            Self::RequestFailed { .. } => "request_failed",
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::RequestFailed { .. } => EventSeverity::Error,
            Self::ToolCallCompleted { error: Some(_), .. } => EventSeverity::Warning,
            Self::ToolCallStarted { .. } => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RequestCompleted { .. } | Self::RequestFailed { .. })
    }
}

/// Event bus errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventBusError {
    #[error("event stream for request {0} is closed")]
    StreamClosed(RequestId),
}

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of each per-request broadcast channel and of the firehose.
    pub channel_capacity: usize,
    /// Events retained per request for late subscribers. Zero disables replay.
    pub replay_capacity: usize,
    /// Closed streams kept (with their replay window) before the oldest is
    /// evicted.
    pub retained_closed: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::from(&EventsConfig::default())
    }
}

impl From<&EventsConfig> for EventBusConfig {
    fn from(config: &EventsConfig) -> Self {
        Self {
            channel_capacity: config.channel_capacity.max(1),
            replay_capacity: config.replay_capacity,
            retained_closed: config.retained_requests.max(1),
        }
    }
}

struct StreamState {
    /// `None` once the stream is closed; dropping the sender ends every
    /// subscription after it drains.
    sender: Option<broadcast::Sender<RequestEvent>>,
    next_sequence: u64,
    replay: VecDeque<RequestEvent>,
}

impl StreamState {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Some(sender),
            next_sequence: 0,
            replay: VecDeque::new(),
        }
    }
}

impl StreamState {
    /// Open, never published to, and nobody listening: indistinguishable
    /// from a stream that was never created.
    fn is_idle(&self) -> bool {
        self.next_sequence == 0
            && self
                .sender
                .as_ref()
                .is_some_and(|sender| sender.receiver_count() == 0)
    }
}

#[derive(Default)]
struct StreamTable {
    states: HashMap<RequestId, StreamState>,
    /// Closed request ids, oldest first.
    closed: VecDeque<RequestId>,
}

impl StreamTable {
    fn state(&mut self, request_id: RequestId, capacity: usize) -> &mut StreamState {
        self.states
            .entry(request_id)
            .or_insert_with(|| StreamState::new(capacity))
    }

    /// Record `request_id` as closed and evict beyond `retained`.
    fn retire(&mut self, request_id: RequestId, retained: usize) {
        self.closed.push_back(request_id);
        while self.closed.len() > retained {
            if let Some(evicted) = self.closed.pop_front() {
                self.states.remove(&evicted);
                tracing::trace!(request_id = %evicted, "closed event stream evicted");
            }
        }
        self.states.retain(|_, state| !state.is_idle());
    }
}

/// Per-request event bus.
pub struct EventBus {
    config: EventBusConfig,
    streams: Mutex<StreamTable>,
    firehose: broadcast::Sender<RequestEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (firehose, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            config,
            streams: Mutex::new(StreamTable::default()),
            firehose,
        }
    }

    fn streams(&self) -> MutexGuard<'_, StreamTable> {
        // A poisoned lock only means another thread panicked mid-publish; the
        // map itself is still consistent.
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish `payload` on the stream of `request_id`.
    ///
    /// Returns the sequenced envelope, or `StreamClosed` once the stream has
    /// been closed.
    pub fn publish(
        &self,
        request_id: RequestId,
        payload: EventPayload,
    ) -> Result<RequestEvent, EventBusError> {
        let mut streams = self.streams();
        let state = streams.state(request_id, self.config.channel_capacity.max(1));
        let Some(sender) = state.sender.as_ref() else {
            return Err(EventBusError::StreamClosed(request_id));
        };

        let event = RequestEvent {
            id: EventId::new(),
            request_id,
            sequence: SequenceNumber(state.next_sequence),
            timestamp: Utc::now(),
            severity: payload.severity(),
            payload,
        };
        state.next_sequence += 1;

        // No subscribers is fine.
        let _ = sender.send(event.clone());
        let _ = self.firehose.send(event.clone());

        if self.config.replay_capacity > 0 {
            if state.replay.len() == self.config.replay_capacity {
                state.replay.pop_front();
            }
            state.replay.push_back(event.clone());
        }

        tracing::debug!(
            request_id = %request_id,
            sequence = event.sequence.0,
            event = event.payload.name(),
            "event published"
        );
        Ok(event)
    }

    /// Subscribe to the stream of `request_id`.
    ///
    /// The subscription first yields the retained replay window, then live
    /// events, and ends after the stream is closed.
    pub fn subscribe(&self, request_id: RequestId) -> EventSubscription {
        let mut streams = self.streams();
        let state = streams.state(request_id, self.config.channel_capacity.max(1));
        EventSubscription {
            request_id,
            backlog: state.replay.clone(),
            receiver: state.sender.as_ref().map(broadcast::Sender::subscribe),
        }
    }

    /// Every event of every request, from now on.
    pub fn subscribe_all(&self) -> broadcast::Receiver<RequestEvent> {
        self.firehose.subscribe()
    }

    /// Mark the stream complete. Succeeds exactly once per request while the
    /// request is retained.
    pub fn close(&self, request_id: RequestId) -> Result<(), EventBusError> {
        let mut streams = self.streams();
        let state = streams.state(request_id, self.config.channel_capacity.max(1));
        if state.sender.take().is_none() {
            return Err(EventBusError::StreamClosed(request_id));
        }
        streams.retire(request_id, self.config.retained_closed.max(1));
        tracing::debug!(request_id = %request_id, "event stream closed");
        Ok(())
    }

    /// Number of streams currently held in memory, open or closed.
    pub fn stream_count(&self) -> usize {
        self.streams().states.len()
    }

    pub fn is_closed(&self, request_id: RequestId) -> bool {
        self.streams()
            .states
            .get(&request_id)
            .is_some_and(|state| state.sender.is_none())
    }

    /// Number of events published so far on `request_id`.
    pub fn published_count(&self, request_id: RequestId) -> u64 {
        self.streams()
            .states
            .get(&request_id)
            .map_or(0, |state| state.next_sequence)
    }

    /// Active live subscribers of `request_id`.
    pub fn subscriber_count(&self, request_id: RequestId) -> usize {
        self.streams()
            .states
            .get(&request_id)
            .and_then(|state| state.sender.as_ref())
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// Ordered view of one request's events.
pub struct EventSubscription {
    request_id: RequestId,
    backlog: VecDeque<RequestEvent>,
    receiver: Option<broadcast::Receiver<RequestEvent>>,
}

impl EventSubscription {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Next event, or `None` once the stream is closed and drained.
    pub async fn next(&mut self) -> Option<RequestEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        request_id = %self.request_id,
                        skipped,
                        "event subscriber lagged; events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Drain the subscription until the stream closes.
    pub async fn collect(mut self) -> Vec<RequestEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(message: &str) -> EventPayload {
        EventPayload::RequestFailed {
            error_kind: "invalid_request".to_string(),
            message: message.to_string(),
        }
    }

    fn started(tool: &str) -> EventPayload {
        EventPayload::ToolCallStarted {
            tool_name: tool.to_string(),
            args_digest: "abc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_sequence_assignment() {
        let bus = EventBus::default();
        let request_id = RequestId::new();
        let mut sub = bus.subscribe(request_id);

        bus.publish(request_id, started("a")).unwrap();
        bus.publish(request_id, started("b")).unwrap();

        assert_eq!(sub.next().await.unwrap().sequence.0, 0);
        assert_eq!(sub.next().await.unwrap().sequence.0, 1);
        assert_eq!(bus.published_count(request_id), 2);
    }

    #[tokio::test]
    async fn test_sequences_are_per_request() {
        let bus = EventBus::default();
        let a = RequestId::new();
        let b = RequestId::new();
        bus.publish(a, started("x")).unwrap();
        let event = bus.publish(b, started("y")).unwrap();
        assert_eq!(event.sequence.0, 0);
    }

    #[tokio::test]
    async fn test_publish_after_close_is_an_error() {
        let bus = EventBus::default();
        let request_id = RequestId::new();
        bus.publish(request_id, failed("boom")).unwrap();
        bus.close(request_id).unwrap();

        assert_eq!(
            bus.publish(request_id, started("late")),
            Err(EventBusError::StreamClosed(request_id))
        );
        assert!(bus.close(request_id).is_err());
        assert!(bus.is_closed(request_id));
    }

    #[tokio::test]
    async fn test_subscription_ends_after_close() {
        let bus = EventBus::default();
        let request_id = RequestId::new();
        let sub = bus.subscribe(request_id);

        bus.publish(request_id, started("a")).unwrap();
        bus.publish(request_id, failed("boom")).unwrap();
        bus.close(request_id).unwrap();

        let events = sub.collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].payload.is_terminal());
        assert_eq!(events[1].severity, EventSeverity::Error);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_bounded_replay() {
        let bus = EventBus::new(EventBusConfig {
            channel_capacity: 16,
            replay_capacity: 2,
            retained_closed: 8,
        });
        let request_id = RequestId::new();
        for tool in ["a", "b", "c"] {
            bus.publish(request_id, started(tool)).unwrap();
        }
        bus.close(request_id).unwrap();

        let events = bus.subscribe(request_id).collect().await;
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence.0).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_late_subscriber_without_replay_sees_only_new_events() {
        let bus = EventBus::new(EventBusConfig {
            channel_capacity: 16,
            replay_capacity: 0,
            retained_closed: 8,
        });
        let request_id = RequestId::new();
        bus.publish(request_id, started("early")).unwrap();

        let mut sub = bus.subscribe(request_id);
        bus.publish(request_id, started("late")).unwrap();
        let event = sub.next().await.unwrap();
        assert_eq!(event.sequence.0, 1);
    }

    #[tokio::test]
    async fn test_closed_streams_are_evicted_beyond_retention() {
        let bus = EventBus::new(EventBusConfig {
            channel_capacity: 16,
            replay_capacity: 4,
            retained_closed: 3,
        });
        let ids: Vec<RequestId> = (0..10).map(|_| RequestId::new()).collect();
        for id in &ids {
            bus.publish(*id, started("a")).unwrap();
            bus.publish(*id, failed("boom")).unwrap();
            bus.close(*id).unwrap();
        }

        assert_eq!(bus.stream_count(), 3);
        assert!(!bus.is_closed(ids[0]));
        assert_eq!(bus.published_count(ids[0]), 0);
        for id in &ids[7..] {
            assert!(bus.is_closed(*id));
            assert_eq!(bus.subscribe(*id).collect().await.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_idle_streams_are_swept_on_close() {
        let bus = EventBus::default();
        let abandoned = RequestId::new();
        drop(bus.subscribe(abandoned));
        let watched = RequestId::new();
        let _watching = bus.subscribe(watched);

        let done = RequestId::new();
        bus.publish(done, started("a")).unwrap();
        bus.close(done).unwrap();

        // The abandoned subscription left nothing behind; the live one stays.
        assert_eq!(bus.stream_count(), 2);
        assert_eq!(bus.subscriber_count(watched), 1);
        assert_eq!(bus.subscriber_count(abandoned), 0);
    }

    #[tokio::test]
    async fn test_firehose_sees_all_requests() {
        let bus = EventBus::default();
        let mut all = bus.subscribe_all();
        let a = RequestId::new();
        let b = RequestId::new();
        bus.publish(a, started("x")).unwrap();
        bus.publish(b, started("y")).unwrap();

        assert_eq!(all.recv().await.unwrap().request_id, a);
        assert_eq!(all.recv().await.unwrap().request_id, b);
    }

    #[test]
    fn test_payload_serializes_with_type_tag() {
        let json = serde_json::to_value(started("run_simulation")).unwrap();
        assert_eq!(json["type"], "tool_call_started");
        assert_eq!(json["data"]["tool_name"], "run_simulation");
    }
}
