//! Tool call log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a caller obtained a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOrigin {
    /// This caller started the underlying execution.
    Executed,
    /// Another request's in-flight execution was joined.
    Joined,
    /// A completed result for the same call was reused.
    Cached,
}

/// Append-only record of one tool invocation made on behalf of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub args: serde_json::Value,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Dedup key the call was executed or joined under.
    pub call_key: String,
    pub origin: CallOrigin,
}

impl ToolCall {
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|ended| (ended - self.started_at).num_milliseconds().max(0))
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }
}
