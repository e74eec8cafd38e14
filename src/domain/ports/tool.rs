use async_trait::async_trait;

use super::errors::ToolError;

/// A named operation a dispatcher may ask the tool invoker to execute.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a completed result may be reused for an identical later call.
    ///
    /// Lookups against mutable state must return false.
    fn cacheable(&self) -> bool {
        false
    }

    async fn call(&self, args: &serde_json::Value) -> Result<serde_json::Value, ToolError>;
}
