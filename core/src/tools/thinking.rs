// No-op reasoning tool. It fetches nothing; it gives the model a place to
// record analysis between actions.
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::traits::{Tool, ToolContext};
use crate::types::ToolResult;

pub struct ThinkingTool;

impl ThinkingTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ThinkingTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ThinkingTool {
    fn name(&self) -> String {
        "thinking".to_string()
    }

    fn description(&self) -> String {
        "Deep reasoning tool for systematic thinking. Use this frequently to analyze, \
         plan, and reflect.\n\n\
         Use at key moments: analyze the question before acting, evaluate results \
         after tool calls, organize information before answering. This is a no-op \
         tool - it doesn't fetch data, but helps structure your reasoning \
         transparently. Keep thoughts focused and end with a clear next step."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "Your thinking process and reasoning content"
                }
            },
            "required": ["thought"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        let thought = args["thought"]
            .as_str()
            .unwrap_or("Thought content not provided")
            .to_string();

        debug!(target: "tools", tool = "thinking", chars = thought.len(), "Thought recorded");

        ToolResult::ok(format!("Thought process recorded:\n\n{thought}")).with_data(json!({
            "thought": thought,
            "display_type": "thinking",
        }))
    }
}
