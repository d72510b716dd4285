use async_trait::async_trait;
use serde_json::Value;

use crate::types::{CancelToken, ToolResult};

/// Per-request execution context passed to every tool. Tools read their
/// dependencies from constructor injection, never from process globals.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tenant_id: u64,
    pub session_id: String,
    pub request_id: String,
    pub cancel: CancelToken,
}

impl ToolContext {
    pub fn new(tenant_id: u64, session_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            session_id: session_id.into(),
            request_id: String::new(),
            cancel: CancelToken::new(),
        }
    }
}

/// The core trait for all tools (built-in & MCP).
///
/// Executions must be safe to run concurrently. A failing tool reports
/// `ToolResult { success: false, .. }` so the agent can keep going with the
/// failure as a signal; `Err` is reserved for registry-level faults.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique tool name (e.g. "knowledge_search").
    fn name(&self) -> String;

    /// Human-readable description shown to the model.
    fn description(&self) -> String;

    /// JSON Schema for the tool's arguments.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult;
}
