// Adapts remote MCP tools to the unified Tool trait.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::registry::ToolRegistry;
use super::traits::{Tool, ToolContext};
use crate::mcp::{McpClient, McpToolSpec};
use crate::types::ToolResult;

/// A remote MCP tool exposed under the `mcp_{service}_{tool}` name. All
/// protocol work happens behind the [`McpClient`] contract; this adapter
/// only shapes names, schemas and results.
pub struct McpTool {
    client: Arc<dyn McpClient>,
    spec: McpToolSpec,
}

impl McpTool {
    pub fn new(client: Arc<dyn McpClient>, spec: McpToolSpec) -> Self {
        Self { client, spec }
    }
}

/// Lowercase alphanumerics and underscores only, so the composed name stays
/// a valid identifier for the LLM tool schema.
fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> String {
        format!(
            "mcp_{}_{}",
            sanitize_name(self.client.service_name()),
            sanitize_name(&self.spec.name)
        )
    }

    fn description(&self) -> String {
        let prefix = format!("[MCP Service: {}] ", self.client.service_name());
        match &self.spec.description {
            Some(desc) if !desc.is_empty() => format!("{prefix}{desc}"),
            _ => format!("{prefix}{}", self.spec.name),
        }
    }

    fn parameters(&self) -> Value {
        if self.spec.input_schema.is_object() {
            self.spec.input_schema.clone()
        } else {
            json!({"type": "object", "properties": {}})
        }
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        match self.client.call_tool(&self.spec.name, Some(args)).await {
            Ok(outcome) if outcome.is_error => {
                warn!(
                    target: "tools",
                    tool = %self.spec.name,
                    service = %self.client.service_name(),
                    "MCP tool returned error"
                );
                ToolResult::err(outcome.content)
            }
            Ok(outcome) => {
                let output = if outcome.content.is_empty() {
                    "Tool executed successfully (no text output)".to_string()
                } else {
                    outcome.content
                };
                ToolResult::ok(output)
            }
            Err(e) => ToolResult::err(format!("MCP call failed: {e}")),
        }
    }
}

/// Scan every connected MCP client and register its tools. A service whose
/// listing fails is skipped; the rest still register.
pub async fn register_mcp_tools(registry: &ToolRegistry, clients: &[Arc<dyn McpClient>]) {
    for client in clients {
        let specs = match client.list_tools().await {
            Ok(specs) => specs,
            Err(e) => {
                warn!(
                    target: "tools",
                    service = %client.service_name(),
                    error = %e,
                    "Failed to list MCP tools, skipping service"
                );
                continue;
            }
        };
        for spec in specs {
            let tool = McpTool::new(Arc::clone(client), spec);
            info!(
                target: "tools",
                tool = %tool.name(),
                service = %client.service_name(),
                "Registered MCP tool"
            );
            registry.register(Arc::new(tool));
        }
    }
}
