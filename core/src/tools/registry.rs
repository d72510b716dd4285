use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
    KeyValue,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::traits::{Tool, ToolContext};
use crate::types::{FunctionDefinition, ToolResult};

/// A registry mapping name -> tool.
///
/// Read-mostly after startup: registration happens while wiring the
/// application, lookups and executions afterwards.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<DashMap<String, Arc<dyn Tool>>>,
    call_timeout: Duration,

    // OpenTelemetry metrics
    invocations_counter: Counter<u64>,
    errors_counter: Counter<u64>,
    timeouts_counter: Counter<u64>,
    invoke_latency: Histogram<f64>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let meter = global::meter("weknora.tool_registry");

        let invocations_counter = meter
            .u64_counter("weknora.tool_registry.invocations_total")
            .with_description("Total number of tool invocations")
            .init();

        let errors_counter = meter
            .u64_counter("weknora.tool_registry.errors_total")
            .with_description("Total number of failed tool invocations")
            .init();

        let timeouts_counter = meter
            .u64_counter("weknora.tool_registry.timeouts_total")
            .with_description("Total number of tool timeouts")
            .init();

        let invoke_latency = meter
            .f64_histogram("weknora.tool_registry.invoke_latency_ms")
            .with_description("Tool invocation latency in milliseconds")
            .init();

        Self {
            tools: Arc::new(DashMap::new()),
            call_timeout: Duration::from_secs(30),
            invocations_counter,
            errors_counter,
            timeouts_counter,
            invoke_latency,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Register a tool. Names are unique; re-registration replaces.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        info!(target: "tool_registry", tool = %name, "Registering tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.clone())
    }

    pub fn list_tools(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.key().clone()).collect()
    }

    /// Function definitions for the agent's LLM call.
    ///
    /// With an empty allow-list every tool is exposed; otherwise the
    /// intersection plus all MCP tools (`mcp_` prefix), which are always
    /// included.
    pub fn function_definitions(&self, allowed_tools: &[String]) -> Vec<FunctionDefinition> {
        let allowed: HashSet<&str> = allowed_tools.iter().map(|s| s.as_str()).collect();
        self.tools
            .iter()
            .filter(|entry| {
                allowed.is_empty()
                    || allowed.contains(entry.key().as_str())
                    || entry.key().starts_with("mcp_")
            })
            .map(|entry| FunctionDefinition {
                name: entry.value().name(),
                description: entry.value().description(),
                parameters: entry.value().parameters(),
            })
            .collect()
    }

    /// Execute a tool by name with the registry timeout.
    #[tracing::instrument(skip(self, ctx, arguments), fields(tool.name = %name))]
    pub async fn execute_tool(
        &self,
        ctx: &ToolContext,
        name: &str,
        arguments: serde_json::Value,
    ) -> ToolResult {
        let start_time = std::time::Instant::now();

        let Some(tool) = self.get(name) else {
            self.errors_counter.add(
                1,
                &[
                    KeyValue::new("tool", name.to_string()),
                    KeyValue::new("error", "not_found"),
                ],
            );
            return ToolResult::err(format!("tool not found: {name}"));
        };

        debug!(target: "tool_registry", tool = %name, "Invoking tool");

        let result = match timeout(self.call_timeout, tool.execute(ctx, arguments)).await {
            Ok(res) => res,
            Err(_) => {
                warn!(target: "tool_registry", tool = %name, "Tool execution timed out");
                self.timeouts_counter
                    .add(1, &[KeyValue::new("tool", name.to_string())]);
                ToolResult::err(format!(
                    "tool {name} timed out after {}ms",
                    self.call_timeout.as_millis()
                ))
            }
        };

        let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;
        self.invoke_latency
            .record(elapsed_ms, &[KeyValue::new("tool", name.to_string())]);

        let status = if result.success { "success" } else { "error" };
        self.invocations_counter.add(
            1,
            &[
                KeyValue::new("tool", name.to_string()),
                KeyValue::new("status", status),
            ],
        );
        if !result.success {
            warn!(
                target: "tool_registry",
                tool = %name,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Tool execution failed"
            );
            self.errors_counter.add(
                1,
                &[
                    KeyValue::new("tool", name.to_string()),
                    KeyValue::new("error", "execution"),
                ],
            );
        }

        result
    }
}
